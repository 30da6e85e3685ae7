//! Ethernet frame decoding for live capture
//!
//! Only the 5-tuple, TCP flags and the IPv4 total length are extracted.

use crate::types::{FlowKey, PacketRecord, Timestamp};
use chrono::Utc;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;

/// Decode one Ethernet frame, `None` when it is not IPv4
///
/// Transport headers that are missing or cut short leave ports and flags
/// at zero.
pub fn decode_frame(frame: &[u8], arrival: Timestamp) -> Option<PacketRecord> {
    let ethernet = EthernetPacket::new(frame)?;
    if ethernet.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }
    let ipv4 = Ipv4Packet::new(ethernet.payload())?;

    let protocol = ipv4.get_next_level_protocol();
    let (sport, dport, flags) = if protocol == IpNextHeaderProtocols::Tcp {
        TcpPacket::new(ipv4.payload())
            .map(|tcp| (tcp.get_source(), tcp.get_destination(), u16::from(tcp.get_flags())))
            .unwrap_or_default()
    } else if protocol == IpNextHeaderProtocols::Udp {
        UdpPacket::new(ipv4.payload())
            .map(|udp| (udp.get_source(), udp.get_destination(), 0))
            .unwrap_or_default()
    } else {
        (0, 0, 0)
    };

    Some(PacketRecord::new(
        FlowKey::new(
            ipv4.get_source(),
            ipv4.get_destination(),
            sport,
            dport,
            u32::from(protocol.0),
        ),
        flags,
        ipv4.get_total_length(),
        arrival,
    ))
}

/// Wall-clock capture time
pub fn capture_time() -> Timestamp {
    let now = Utc::now();
    Timestamp::new(
        u32::try_from(now.timestamp()).unwrap_or(u32::MAX),
        now.timestamp_subsec_micros(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_common::constants::{TCP_FLAG_ACK, TCP_FLAG_SYN};
    use std::net::Ipv4Addr;

    fn frame(ethertype: [u8; 2], protocol: u8, transport: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 12];
        out.extend_from_slice(&ethertype);

        let total = (20 + transport.len()) as u16;
        let mut ip = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, protocol, 0, 0];
        ip[2..4].copy_from_slice(&total.to_be_bytes());
        ip.extend_from_slice(&[10, 0, 0, 1]);
        ip.extend_from_slice(&[10, 0, 0, 2]);

        out.extend_from_slice(&ip);
        out.extend_from_slice(transport);
        out
    }

    #[test]
    fn test_decode_tcp_syn_ack() {
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&443u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&51000u16.to_be_bytes());
        tcp[12] = 0x50;
        tcp[13] = (TCP_FLAG_SYN | TCP_FLAG_ACK) as u8;

        let at = Timestamp::new(7, 8);
        let record = decode_frame(&frame([0x08, 0x00], 6, &tcp), at).unwrap();
        assert_eq!(record.key.src_addr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(record.key.dst_addr(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!((record.key.sport, record.key.dport), (443, 51000));
        assert_eq!(record.key.protocol, 6);
        assert_eq!(record.flags, TCP_FLAG_SYN | TCP_FLAG_ACK);
        assert_eq!(record.size, 40);
        assert_eq!(record.arrival, at);
    }

    #[test]
    fn test_decode_udp_ports() {
        let mut udp = vec![0u8; 8];
        udp[0..2].copy_from_slice(&5353u16.to_be_bytes());
        udp[2..4].copy_from_slice(&53u16.to_be_bytes());

        let record = decode_frame(&frame([0x08, 0x00], 17, &udp), Timestamp::default()).unwrap();
        assert_eq!((record.key.sport, record.key.dport), (5353, 53));
        assert_eq!(record.flags, 0);
    }

    #[test]
    fn test_other_protocols_have_no_ports() {
        let record = decode_frame(&frame([0x08, 0x00], 1, &[8, 0, 0, 0]), Timestamp::default()).unwrap();
        assert_eq!(record.key.protocol, 1);
        assert_eq!((record.key.sport, record.key.dport), (0, 0));
    }

    #[test]
    fn test_non_ipv4_is_skipped() {
        assert!(decode_frame(&frame([0x86, 0xdd], 6, &[0; 20]), Timestamp::default()).is_none());
        assert!(decode_frame(&[0u8; 6], Timestamp::default()).is_none());
    }
}
