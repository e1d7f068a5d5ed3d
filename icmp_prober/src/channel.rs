use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use pnet::packet::icmp::echo_request::EchoRequestPacket;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::transport::TransportChannelType::Layer4;
use pnet::transport::TransportProtocol::Ipv4;
use pnet::transport::{icmp_packet_iter, transport_channel, TransportReceiver, TransportSender};
use tracing::{trace, warn};

use crate::error::ProbeError;
use crate::packet;
use crate::table::{CorrelationTable, EchoKey, Reply};

/// Seam between the probing logic and the raw socket, so executors and the
/// worker pool can run against a fake transport in tests.
pub(crate) trait EchoSender: Send + Sync {
    /// Sends one echo request, returning the payload size written.
    fn send_echo(&self, dest: Ipv4Addr, seq: u16) -> Result<usize, ProbeError>;
}

/// Owns the ICMP raw socket: serialized sending for the worker pool plus
/// the background receive loop feeding the correlation table.
pub(crate) struct RawChannel {
    ident: u16,
    payload_size: usize,
    // pnet senders want exclusive access; the workers share one socket.
    tx: Mutex<TransportSender>,
}

impl RawChannel {
    /// Opens the raw socket and starts the receive loop on a dedicated
    /// thread. The thread is detached: it lives until the process exits.
    pub(crate) fn open(
        payload_size: usize,
        table: Arc<CorrelationTable>,
    ) -> Result<Self, ProbeError> {
        let protocol = Layer4(Ipv4(IpNextHeaderProtocols::Icmp));
        let (tx, rx) = transport_channel(4096, protocol).map_err(ProbeError::SocketOpen)?;
        let ident = packet::echo_identifier();
        std::thread::spawn(move || receive_loop(rx, ident, table));
        Ok(Self {
            ident,
            payload_size,
            tx: Mutex::new(tx),
        })
    }
}

impl EchoSender for RawChannel {
    fn send_echo(&self, dest: Ipv4Addr, seq: u16) -> Result<usize, ProbeError> {
        let buf = packet::build_echo_request(self.ident, seq, self.payload_size);
        let echo = EchoRequestPacket::new(&buf).unwrap();
        self.tx
            .lock()
            .send_to(echo, IpAddr::V4(dest))
            .map_err(ProbeError::Send)?;
        Ok(self.payload_size)
    }
}

/// Reads ICMP datagrams forever and routes echo replies to the waiter that
/// sent the matching request.
///
/// Replies carrying a foreign identifier, non-echo messages, and replies
/// whose key is no longer registered (late, duplicate, or never ours) are
/// dropped without ceremony. A failed read is logged and skipped; one bad
/// packet must not take the whole prober down.
fn receive_loop(mut rx: TransportReceiver, ident: u16, table: Arc<CorrelationTable>) {
    let mut iter = icmp_packet_iter(&mut rx);
    loop {
        let (icmp, addr) = match iter.next() {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "icmp receive failed");
                continue;
            }
        };
        let peer = match addr {
            IpAddr::V4(addr) => addr,
            _ => continue,
        };
        let reply = match packet::parse_echo_reply(&icmp) {
            Some(reply) if reply.ident == ident => reply,
            _ => continue,
        };
        let key = EchoKey {
            dest: peer,
            seq: reply.seq,
        };
        let delivered = table.deliver(
            &key,
            Reply {
                at: Instant::now(),
                size: reply.size,
            },
        );
        if !delivered {
            trace!(peer = %peer, seq = reply.seq, "late or unmatched echo reply dropped");
        }
    }
}
