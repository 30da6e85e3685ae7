//! Shared constants for the flow monitor
//!
//! These constants are used by packet producers, the aggregator and the
//! archive readers so that limits and formats stay consistent.

// ============================================================================
// Flow Lifetime
// ============================================================================

/// Idle time after which a flow is expired (60 seconds in microseconds)
///
/// Measured against the arrival time of the packet that triggers the check,
/// never against the wall clock.
pub const FLOW_TIMEOUT_US: u64 = 60_000_000;

/// Microseconds per second
pub const MICROS_PER_SEC: u64 = 1_000_000;

// ============================================================================
// Buffer and Table Sizes
// ============================================================================

/// Default number of records the packet conduit can hold
pub const DEFAULT_CONDUIT_CAPACITY: usize = 50_000;

/// Default number of bins in a flow size distribution
///
/// Flows with more packets than this saturate into the last bin.
pub const NUM_FSD_BINS: usize = 50;

/// Initial capacity hint for the flow index
pub const FLOW_TABLE_CAPACITY_HINT: usize = 65_536;

/// Records written to one archive file before rotating to a new one
pub const MAX_RECORDS_PER_FILE: u64 = 1_000_000;

// ============================================================================
// Record Layout
// ============================================================================

/// Size of one binary packet record
pub const PACKET_RECORD_SIZE: usize = 28;

/// Size of the 5-tuple portion of a packet record
pub const FLOW_KEY_SIZE: usize = 16;

// ============================================================================
// Protocol Numbers (from linux/in.h)
// ============================================================================

/// ICMP protocol number
pub const IPPROTO_ICMP: u32 = 1;

/// TCP protocol number
pub const IPPROTO_TCP: u32 = 6;

/// UDP protocol number
pub const IPPROTO_UDP: u32 = 17;

// ============================================================================
// TCP Flags (low bits of the flags field)
// ============================================================================

pub const TCP_FLAG_FIN: u16 = 0x01;
pub const TCP_FLAG_SYN: u16 = 0x02;
pub const TCP_FLAG_RST: u16 = 0x04;
pub const TCP_FLAG_PSH: u16 = 0x08;
pub const TCP_FLAG_ACK: u16 = 0x10;
pub const TCP_FLAG_URG: u16 = 0x20;

// ============================================================================
// Archive File Extensions
// ============================================================================

/// Binary packet archive
pub const EXT_PACKET_BINARY: &str = "pkt";

/// Text packet archive written by the recorder
pub const EXT_PACKET_TEXT: &str = "pkta";

/// Text packet file prepared by hand or by other tools
pub const EXT_PACKET_PLAIN: &str = "txt";

/// Text flow archive
pub const EXT_FLOW_TEXT: &str = "flw";

/// Suffix appended to compressed archives
pub const EXT_GZIP: &str = "gz";
