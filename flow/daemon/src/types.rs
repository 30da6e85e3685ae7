//! Aggregation type definitions
//!
//! Defines the data structures used by the daemon for flow aggregation
//! and report export.
//!
//! ## Organization
//!
//! This module separates record types and aggregation types:
//! - **Record Types**: fixed-layout types shared with every packet producer (from flow_common)
//! - **Aggregation Types**: types used only by the aggregator for flows and reports

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Record Types (shared with packet producers)
// ============================================================================

pub mod wire {
    //! Types shared between packet producers and the aggregator
    //!
    //! These are re-exported from the flow-common crate and must keep
    //! the 28-byte record layout.

    pub use flow_common::constants;
    pub use flow_common::types::{FlowKey, PacketRecord, Timestamp};
}

// Re-export commonly used record types at module level for convenience
pub use wire::{FlowKey, PacketRecord, Timestamp};

/// Direction of a packet relative to the first packet of its flow
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum Direction {
    /// Same source address as the first packet
    Up = 1,
    /// Reverse direction
    Down = -1,
}

impl Direction {
    /// Signed form (+1 / -1)
    pub fn sign(self) -> i8 {
        self as i8
    }
}

/// Per-packet entry stored inside a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketEntry {
    pub direction: Direction,
    pub size: u16,
    pub arrival: Timestamp,
}

/// Serializable summary of a flow
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FlowSummary {
    /// Source address:port of the first packet
    pub source: String,
    /// Destination address:port of the first packet
    pub destination: String,
    /// IP protocol number
    pub protocol: u32,
    /// Number of packets in the flow
    pub packets: u64,
    /// Total bytes across all packets
    pub bytes: u64,
    /// Arrival of the first packet (`sec.usec`)
    pub first_activity: String,
    /// Arrival of the last packet (`sec.usec`)
    pub last_activity: String,
}

/// Flow size distribution: number of flows by packet count
///
/// Bin `i` counts flows with `i + 1` packets; the last bin also holds
/// every larger flow.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowSizeDistribution {
    pub bins: Vec<u64>,
}

impl FlowSizeDistribution {
    /// Empty distribution with `bins` bins
    pub fn with_bins(bins: usize) -> Self {
        Self {
            bins: vec![0; bins],
        }
    }

    /// Count a flow of `packets` packets
    pub fn add_flow(&mut self, packets: u64) {
        if self.bins.is_empty() || packets == 0 {
            return;
        }
        let last = self.bins.len() - 1;
        let index = usize::try_from(packets - 1).map_or(last, |i| i.min(last));
        self.bins[index] += 1;
    }

    /// Total number of flows counted
    pub fn total_flows(&self) -> u64 {
        self.bins.iter().sum()
    }
}

/// Final report produced when the pipeline stops
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FlowReport {
    /// ISO 8601 timestamp when the report was generated
    pub timestamp: String,
    /// Wall-clock duration of the run in seconds
    pub duration_seconds: u64,
    /// Trace time covered by the packets seen, in seconds
    pub trace_seconds: f64,
    /// Packets produced into the conduit by the source
    pub packets_produced: u64,
    /// Packets aggregated by the flow table
    pub packets_seen: u64,
    /// Packets whose arrival preceded an earlier packet
    pub reordered_packets: u64,
    /// Flows created during the run
    pub flows_created: u64,
    /// Flows handed to the archive (expired plus flushed)
    pub flows_archived: u64,
    /// Flows still live when the report was taken
    pub live_flows: u64,
    /// Size distribution of the live flows
    pub fsd: FlowSizeDistribution,
    /// Size distribution of the live flows per protocol name
    pub fsd_by_protocol: BTreeMap<String, FlowSizeDistribution>,
}

/// Human readable protocol name
pub fn protocol_name(protocol: u32) -> String {
    use wire::constants::{IPPROTO_ICMP, IPPROTO_TCP, IPPROTO_UDP};

    match protocol {
        IPPROTO_TCP => "tcp".to_string(),
        IPPROTO_UDP => "udp".to_string(),
        IPPROTO_ICMP => "icmp".to_string(),
        other => format!("proto_{}", other),
    }
}
