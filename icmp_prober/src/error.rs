use std::net::Ipv4Addr;

use thiserror::Error;

/// Everything that can go wrong while probing.
///
/// Timeouts are deliberately absent: an unanswered echo is a normal
/// [`Stat`](crate::Stat) with `received == false`, not an error.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The raw ICMP socket could not be opened. Usually a privilege
    /// problem; nothing in this crate requests the capability for you.
    #[error("failed to open raw ICMP socket: {0}")]
    SocketOpen(#[source] std::io::Error),

    /// One echo request could not be written to the socket. Only that
    /// sequence number is lost; the rest of the request proceeds.
    #[error("failed to send echo request: {0}")]
    Send(#[source] std::io::Error),

    /// An echo was registered while the same (destination, sequence) pair
    /// was still in flight. Sequence numbers within a request are unique,
    /// so this indicates a bug rather than a runtime condition.
    #[error("echo already in flight for {dest} seq {seq}")]
    DuplicateEcho { dest: Ipv4Addr, seq: u16 },

    /// The worker pool has been shut down.
    #[error("pinger is closed")]
    Closed,
}
