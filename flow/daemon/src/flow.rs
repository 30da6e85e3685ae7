//! Per-flow aggregation
//!
//! A flow is created from its first packet, which also fixes its key and
//! therefore the meaning of "up" and "down" for every later packet.

use crate::types::*;
use flow_common::constants::FLOW_TIMEOUT_US;
use std::cmp::Ordering;
use std::fmt;

/// Aggregated statistics for all packets sharing one bidirectional key
#[derive(Debug, Clone)]
pub struct Flow {
    key: FlowKey,
    bytes: u64,
    packets: Vec<PacketEntry>,
}

impl Flow {
    /// Create a flow from its first packet
    pub fn new(packet: &PacketRecord) -> Self {
        let mut flow = Self {
            key: packet.key,
            bytes: 0,
            packets: Vec::with_capacity(4),
        };
        flow.insert(packet);
        flow
    }

    /// Key of the first packet
    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    /// Direction of `packet` relative to the first packet
    ///
    /// Only the source address is compared, so both ends of a flow between
    /// two ports on one host count as up.
    pub fn direction(&self, packet: &PacketRecord) -> Direction {
        if packet.key.saddr == self.key.saddr {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    /// Append a packet and account its size
    pub fn insert(&mut self, packet: &PacketRecord) {
        self.bytes += u64::from(packet.size);
        self.packets.push(PacketEntry {
            direction: self.direction(packet),
            size: packet.size,
            arrival: packet.arrival,
        });
    }

    /// Number of packets
    pub fn packet_count(&self) -> u64 {
        self.packets.len() as u64
    }

    /// Sum of packet sizes
    pub fn byte_count(&self) -> u64 {
        self.bytes
    }

    /// Per-packet entries in arrival order
    pub fn packets(&self) -> &[PacketEntry] {
        &self.packets
    }

    pub fn first_activity_time(&self) -> Timestamp {
        self.packets.first().map(|p| p.arrival).unwrap_or_default()
    }

    pub fn last_activity_time(&self) -> Timestamp {
        self.packets.last().map(|p| p.arrival).unwrap_or_default()
    }

    /// True when the flow has been idle for more than 60 seconds at `now`
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expired_after(now, FLOW_TIMEOUT_US)
    }

    /// True when the flow has been idle for more than `timeout_us` at `now`
    pub fn expired_after(&self, now: Timestamp, timeout_us: u64) -> bool {
        now.micros_since(self.last_activity_time()) > timeout_us
    }

    /// Order two flows by last activity
    pub fn cmp_activity(&self, other: &Flow) -> Ordering {
        self.last_activity_time().cmp(&other.last_activity_time())
    }

    /// Serializable summary
    pub fn summary(&self) -> FlowSummary {
        FlowSummary {
            source: format!("{}:{}", self.key.src_addr(), self.key.sport),
            destination: format!("{}:{}", self.key.dst_addr(), self.key.dport),
            protocol: self.key.protocol,
            packets: self.packet_count(),
            bytes: self.bytes,
            first_activity: self.first_activity_time().to_string(),
            last_activity: self.last_activity_time().to_string(),
        }
    }
}

/// Text form used by the flow archive (lossy, not parsed back)
impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<15}\t{:>5}\t{:<15}\t{:>5}\t{:>2}\t{}\t{}\t{}\t{}",
            self.key.src_addr().to_string(),
            self.key.sport,
            self.key.dst_addr().to_string(),
            self.key.dport,
            self.key.protocol,
            self.packet_count(),
            self.bytes,
            self.first_activity_time(),
            self.last_activity_time()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn packet(src: [u8; 4], dst: [u8; 4], size: u16, sec: u32) -> PacketRecord {
        PacketRecord::new(
            FlowKey::new(Ipv4Addr::from(src), Ipv4Addr::from(dst), 1234, 80, 6),
            0,
            size,
            Timestamp::new(sec, 0),
        )
    }

    #[test]
    fn test_flow_accumulates_packets() {
        let up = packet([10, 0, 0, 1], [10, 0, 0, 2], 100, 1);
        let mut down = packet([10, 0, 0, 1], [10, 0, 0, 2], 1500, 2);
        down.key = down.key.reversed();

        let mut flow = Flow::new(&up);
        flow.insert(&down);
        flow.insert(&packet([10, 0, 0, 1], [10, 0, 0, 2], 40, 3));

        assert_eq!(flow.packet_count(), 3);
        assert_eq!(flow.byte_count(), 1640);
        let directions: Vec<i8> = flow.packets().iter().map(|p| p.direction.sign()).collect();
        assert_eq!(directions, vec![1, -1, 1]);
        assert_eq!(flow.first_activity_time(), Timestamp::new(1, 0));
        assert_eq!(flow.last_activity_time(), Timestamp::new(3, 0));
    }

    #[test]
    fn test_same_host_flow_is_all_up() {
        let lo = Ipv4Addr::LOCALHOST;
        let request = PacketRecord::new(FlowKey::new(lo, lo, 5000, 80, 6), 0, 60, Timestamp::new(1, 0));
        let reply = PacketRecord::new(FlowKey::new(lo, lo, 80, 5000, 6), 0, 60, Timestamp::new(2, 0));

        let mut flow = Flow::new(&request);
        flow.insert(&reply);

        let directions: Vec<i8> = flow.packets().iter().map(|p| p.direction.sign()).collect();
        assert_eq!(directions, vec![1, 1]);
    }

    #[test]
    fn test_expiry_is_strictly_greater_than_timeout() {
        let flow = Flow::new(&packet([10, 0, 0, 1], [10, 0, 0, 2], 60, 100));

        assert!(!flow.is_expired(Timestamp::new(160, 0)));
        assert!(flow.is_expired(Timestamp::new(160, 1)));
        // Reference times before the last activity never expire a flow
        assert!(!flow.is_expired(Timestamp::new(10, 0)));
        assert!(flow.expired_after(Timestamp::new(101, 0), 999_999));
    }

    #[test]
    fn test_activity_ordering() {
        let older = Flow::new(&packet([10, 0, 0, 1], [10, 0, 0, 2], 60, 5));
        let newer = Flow::new(&packet([10, 0, 0, 3], [10, 0, 0, 4], 60, 6));
        assert_eq!(older.cmp_activity(&newer), Ordering::Less);
    }

    #[test]
    fn test_text_summary_columns() {
        let flow = Flow::new(&packet([10, 0, 0, 1], [10, 0, 0, 2], 60, 5));
        let line = flow.to_string();
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        assert_eq!(
            fields,
            vec!["10.0.0.1", "1234", "10.0.0.2", "80", "6", "1", "60", "5.000000", "5.000000"]
        );
        assert_eq!(flow.summary().source, "10.0.0.1:1234");
    }
}
