//! Packet record types shared by producers and the aggregator
//!
//! `PacketRecord` is `repr(C)` and exactly 28 bytes so that it can be
//! copied through the conduit and written to archives without padding.
//! Field values are held in host order; byte order is only applied when a
//! record is converted to or from its wire form.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::net::Ipv4Addr;
use core::str::FromStr;

use crate::constants::{FLOW_KEY_SIZE, MICROS_PER_SEC, PACKET_RECORD_SIZE};

/// Trace time of a packet (seconds + microseconds)
///
/// Always taken from the packet's own capture time.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    pub sec: u32,
    /// Microseconds within the second
    pub usec: u32,
}

impl Timestamp {
    /// Build a timestamp, carrying whole seconds out of `usec`
    pub const fn new(sec: u32, usec: u32) -> Self {
        let carry = usec / MICROS_PER_SEC as u32;
        Self {
            sec: sec.saturating_add(carry),
            usec: usec % MICROS_PER_SEC as u32,
        }
    }

    /// Build a timestamp from a microsecond count
    pub const fn from_micros(micros: u64) -> Self {
        let sec = micros / MICROS_PER_SEC;
        let sec = if sec > u32::MAX as u64 { u32::MAX } else { sec as u32 };
        Self {
            sec,
            usec: (micros % MICROS_PER_SEC) as u32,
        }
    }

    /// Total microseconds since the epoch
    pub const fn as_micros(&self) -> u64 {
        self.sec as u64 * MICROS_PER_SEC + self.usec as u64
    }

    /// Microseconds elapsed since `earlier`, zero if `earlier` is later
    pub const fn micros_since(&self, earlier: Timestamp) -> u64 {
        self.as_micros().saturating_sub(earlier.as_micros())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.sec, self.usec)
    }
}

/// Error returned when a timestamp string is not `<sec>.<usec>`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimestampParseError;

impl fmt::Display for TimestampParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected <seconds>.<microseconds>")
    }
}

impl FromStr for Timestamp {
    type Err = TimestampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sec, usec) = s.trim().split_once('.').ok_or(TimestampParseError)?;
        let sec = sec.parse::<u32>().map_err(|_| TimestampParseError)?;
        let usec = usec.parse::<u32>().map_err(|_| TimestampParseError)?;
        if usec >= MICROS_PER_SEC as u32 {
            return Err(TimestampParseError);
        }
        Ok(Self { sec, usec })
    }
}

/// Bidirectional flow key (5-tuple)
///
/// Two keys are equal when their fields match as-is or with source and
/// destination swapped on both address and port. The protocol is always
/// compared exactly.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FlowKey {
    /// Source IPv4 address (host order value)
    pub saddr: u32,
    /// Destination IPv4 address (host order value)
    pub daddr: u32,
    /// Source port
    pub sport: u16,
    /// Destination port
    pub dport: u16,
    /// IP protocol number
    pub protocol: u32,
}

impl FlowKey {
    /// Build a key from addresses, ports and protocol
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16, protocol: u32) -> Self {
        Self {
            saddr: u32::from(src),
            daddr: u32::from(dst),
            sport,
            dport,
            protocol,
        }
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.saddr)
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.daddr)
    }

    /// The same key seen from the other endpoint
    pub fn reversed(&self) -> Self {
        Self {
            saddr: self.daddr,
            daddr: self.saddr,
            sport: self.dport,
            dport: self.sport,
            protocol: self.protocol,
        }
    }

    /// Exact field-by-field comparison, direction included
    pub fn is_same_direction(&self, other: &FlowKey) -> bool {
        self.saddr == other.saddr
            && self.daddr == other.daddr
            && self.sport == other.sport
            && self.dport == other.dport
            && self.protocol == other.protocol
    }

    /// Direction-invariant hash of the key
    ///
    /// Computed from field values, so the result does not depend on host
    /// byte order. Each endpoint is mixed on its own and the two endpoint
    /// hashes are added, which makes swapping the endpoints a no-op.
    pub fn identity_hash(&self) -> u64 {
        let endpoints = endpoint_hash(self.saddr, self.sport)
            .wrapping_add(endpoint_hash(self.daddr, self.dport));
        mix64(endpoints ^ (self.protocol as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }
}

impl PartialEq for FlowKey {
    fn eq(&self, other: &Self) -> bool {
        if self.protocol != other.protocol {
            return false;
        }
        let forward = self.saddr == other.saddr
            && self.daddr == other.daddr
            && self.sport == other.sport
            && self.dport == other.dport;
        let swapped = self.saddr == other.daddr
            && self.daddr == other.saddr
            && self.sport == other.dport
            && self.dport == other.sport;
        forward || swapped
    }
}

impl Eq for FlowKey {}

impl Hash for FlowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.identity_hash());
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            self.src_addr(),
            self.sport,
            self.dst_addr(),
            self.dport,
            self.protocol
        )
    }
}

/// splitmix64 finalizer
const fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

const fn endpoint_hash(addr: u32, port: u16) -> u64 {
    mix64(((addr as u64) << 16) | port as u64)
}

/// One observed packet: flow key plus arrival metadata
///
/// Wire layout (28 bytes, no padding):
///
/// | offset | size | field    | byte order    |
/// |--------|------|----------|---------------|
/// | 0      | 4    | saddr    | big-endian    |
/// | 4      | 4    | daddr    | big-endian    |
/// | 8      | 2    | sport    | big-endian    |
/// | 10     | 2    | dport    | big-endian    |
/// | 12     | 4    | protocol | little-endian |
/// | 16     | 2    | flags    | little-endian |
/// | 18     | 2    | size     | little-endian |
/// | 20     | 4    | sec      | little-endian |
/// | 24     | 4    | usec     | little-endian |
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct PacketRecord {
    /// Flow identity
    pub key: FlowKey,
    /// TCP flags (zero for non-TCP packets)
    pub flags: u16,
    /// Packet size in bytes
    pub size: u16,
    /// Capture time
    pub arrival: Timestamp,
}

impl PacketRecord {
    pub fn new(key: FlowKey, flags: u16, size: u16, arrival: Timestamp) -> Self {
        Self {
            key,
            flags,
            size,
            arrival,
        }
    }

    /// Encode into the 28-byte wire form
    pub fn to_bytes(&self) -> [u8; PACKET_RECORD_SIZE] {
        let mut out = [0u8; PACKET_RECORD_SIZE];
        out[0..4].copy_from_slice(&self.key.saddr.to_be_bytes());
        out[4..8].copy_from_slice(&self.key.daddr.to_be_bytes());
        out[8..10].copy_from_slice(&self.key.sport.to_be_bytes());
        out[10..12].copy_from_slice(&self.key.dport.to_be_bytes());
        out[12..16].copy_from_slice(&self.key.protocol.to_le_bytes());
        out[16..18].copy_from_slice(&self.flags.to_le_bytes());
        out[18..20].copy_from_slice(&self.size.to_le_bytes());
        out[20..24].copy_from_slice(&self.arrival.sec.to_le_bytes());
        out[24..28].copy_from_slice(&self.arrival.usec.to_le_bytes());
        out
    }

    /// Decode from the 28-byte wire form
    pub fn from_bytes(raw: &[u8; PACKET_RECORD_SIZE]) -> Self {
        let u32_be = |at: usize| u32::from_be_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let u32_le = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let u16_be = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
        let u16_le = |at: usize| u16::from_le_bytes([raw[at], raw[at + 1]]);

        Self {
            key: FlowKey {
                saddr: u32_be(0),
                daddr: u32_be(4),
                sport: u16_be(8),
                dport: u16_be(10),
                protocol: u32_le(12),
            },
            flags: u16_le(16),
            size: u16_le(18),
            arrival: Timestamp::new(u32_le(20), u32_le(24)),
        }
    }
}

// Compile-time layout checks
// These will fail to compile if the record layout drifts
const _: () = {
    assert!(core::mem::size_of::<FlowKey>() == FLOW_KEY_SIZE);
    assert!(core::mem::size_of::<Timestamp>() == 8);
    assert!(core::mem::size_of::<PacketRecord>() == PACKET_RECORD_SIZE);
    assert!(core::mem::size_of::<PacketRecord>() % core::mem::align_of::<PacketRecord>() == 0);
};
