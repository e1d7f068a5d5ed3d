use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::Packet;

/// ICMP echo header bytes preceding the payload.
const ECHO_HEADER_LEN: usize = 8;

/// Identifier stamped on every echo this process sends, so replies meant
/// for other pingers on the same host can be told apart.
pub(crate) fn echo_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// Builds a serialized echo request carrying `ident` and `seq` with a
/// filler payload of `payload_size` bytes.
pub(crate) fn build_echo_request(ident: u16, seq: u16, payload_size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; ECHO_HEADER_LEN + payload_size];
    for (x, byte) in buf[ECHO_HEADER_LEN..].iter_mut().enumerate() {
        *byte = x as u8;
    }
    // The buffer is sized for the header above, so the view cannot fail.
    let mut echo = MutableEchoRequestPacket::new(&mut buf).unwrap();
    echo.set_icmp_type(IcmpTypes::EchoRequest);
    echo.set_identifier(ident);
    echo.set_sequence_number(seq);
    let csum = pnet::util::checksum(echo.packet(), 1);
    echo.set_checksum(csum);
    buf
}

/// Body of a parsed echo reply.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EchoReply {
    pub(crate) ident: u16,
    pub(crate) seq: u16,
    pub(crate) size: usize,
}

/// Extracts the echo-reply body of an ICMP message, or `None` for any
/// other message type.
pub(crate) fn parse_echo_reply(packet: &IcmpPacket<'_>) -> Option<EchoReply> {
    if packet.get_icmp_type() != IcmpTypes::EchoReply {
        return None;
    }
    let reply = EchoReplyPacket::new(packet.packet())?;
    Some(EchoReply {
        ident: reply.get_identifier(),
        seq: reply.get_sequence_number(),
        size: reply.payload().len(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn echo_request_layout() {
        let buf = build_echo_request(0x1234, 7, 16);
        assert_eq!(buf.len(), ECHO_HEADER_LEN + 16);
        assert_eq!(buf[0], 8); // echo request
        assert_eq!(buf[1], 0);
        assert_ne!(u16::from_be_bytes([buf[2], buf[3]]), 0);
        assert_eq!(u16::from_be_bytes([buf[4], buf[5]]), 0x1234);
        assert_eq!(u16::from_be_bytes([buf[6], buf[7]]), 7);
        assert_eq!(&buf[ECHO_HEADER_LEN..ECHO_HEADER_LEN + 4], &[0, 1, 2, 3]);
    }

    #[test]
    fn only_echo_replies_parse() {
        let request = build_echo_request(1, 0, 4);
        let packet = IcmpPacket::new(&request).unwrap();
        assert!(parse_echo_reply(&packet).is_none());

        let mut raw = build_echo_request(0xbeef, 3, 8);
        raw[0] = 0; // flip to echo reply
        let packet = IcmpPacket::new(&raw).unwrap();
        let reply = parse_echo_reply(&packet).unwrap();
        assert_eq!(reply.ident, 0xbeef);
        assert_eq!(reply.seq, 3);
        assert_eq!(reply.size, 8);
    }
}
