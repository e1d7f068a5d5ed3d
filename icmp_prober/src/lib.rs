//! Concurrent ICMP echo prober for IPv4 hosts.
//!
//! A [`Pinger`] owns one raw ICMP socket, a background receive loop and a
//! pool of probe workers. [`Pinger::probe`] sends a train of echo requests
//! to one destination and resolves each of them to a [`Stat`], matching
//! replies to requests by (destination, sequence number). Designed to be
//! embedded in tools that probe many hosts at once.

mod channel;
mod error;
mod executor;
mod packet;
mod pinger;
mod table;

pub use error::ProbeError;
pub use executor::Stat;
pub use pinger::{Config, Pinger};
