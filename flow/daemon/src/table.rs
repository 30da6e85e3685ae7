//! Flow table: hash index plus eviction queue
//!
//! The table is owned by the aggregation context alone. Expiry is driven by
//! packet arrival times (trace time), never by the wall clock, so replaying
//! an archive gives the same flow boundaries whatever the replay speed.
//!
//! Every live flow is in the index, in the arena and in the queue exactly
//! once. The queue is ordered by last activity, which holds because every
//! packet moves its flow to the tail and arrival times are clamped to be
//! non-decreasing.

use crate::archive::FlowSink;
use crate::error::ArchiveError;
use crate::flow::Flow;
use crate::queue::{EvictionQueue, FlowArena, FlowHandle};
use crate::types::{FlowKey, FlowSizeDistribution, PacketRecord, Timestamp};
use flow_common::constants::{FLOW_TABLE_CAPACITY_HINT, FLOW_TIMEOUT_US};
use log::{debug, info, trace};
use std::collections::HashMap;

/// What [`FlowTable::insert`] did with a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The packet started a new flow
    Created,
    /// The packet was added to a live flow
    Updated,
}

/// Live flows keyed by direction-agnostic 5-tuple
pub struct FlowTable<S: FlowSink> {
    index: HashMap<FlowKey, FlowHandle>,
    arena: FlowArena,
    queue: EvictionQueue,
    sink: S,
    timeout_us: u64,
    packets_seen: u64,
    first_packet_time: Option<Timestamp>,
    last_packet_time: Timestamp,
    flows_created: u64,
    flows_archived: u64,
    reordered_packets: u64,
}

impl<S: FlowSink> FlowTable<S> {
    /// Table with the default 60 second idle timeout
    pub fn new(sink: S) -> Self {
        Self::with_timeout(sink, FLOW_TIMEOUT_US)
    }

    /// Table expiring flows idle for more than `timeout_us` microseconds
    pub fn with_timeout(sink: S, timeout_us: u64) -> Self {
        Self {
            index: HashMap::with_capacity(FLOW_TABLE_CAPACITY_HINT),
            arena: FlowArena::with_capacity(FLOW_TABLE_CAPACITY_HINT),
            queue: EvictionQueue::new(),
            sink,
            timeout_us,
            packets_seen: 0,
            first_packet_time: None,
            last_packet_time: Timestamp::default(),
            flows_created: 0,
            flows_archived: 0,
            reordered_packets: 0,
        }
    }

    /// Aggregate one packet
    ///
    /// Flows idle for longer than the timeout at the packet's arrival are
    /// archived first. A packet arriving before the latest trace time is
    /// aggregated as if it arrived at that time.
    ///
    /// # Errors
    ///
    /// The sink failed to persist an expired flow. The packet is counted but
    /// not aggregated, and the flow that failed stays live.
    pub fn insert(&mut self, packet: &PacketRecord) -> Result<InsertOutcome, ArchiveError> {
        let mut packet = *packet;

        self.packets_seen += 1;
        if self.first_packet_time.is_none() {
            self.first_packet_time = Some(packet.arrival);
        }
        if packet.arrival < self.last_packet_time {
            trace!(
                "Packet for {} at {} precedes trace time {}",
                packet.key,
                packet.arrival,
                self.last_packet_time
            );
            self.reordered_packets += 1;
            packet.arrival = self.last_packet_time;
        } else {
            self.last_packet_time = packet.arrival;
        }

        self.expire(packet.arrival)?;

        match self.index.get(&packet.key).copied() {
            Some(handle) => {
                self.arena.flow_mut(handle).insert(&packet);
                self.queue.move_to_tail(&mut self.arena, handle);
                Ok(InsertOutcome::Updated)
            }
            None => {
                let handle = self.arena.insert(Flow::new(&packet));
                self.queue.append(&mut self.arena, handle);
                self.index.insert(packet.key, handle);
                self.flows_created += 1;
                Ok(InsertOutcome::Created)
            }
        }
    }

    /// Archive every flow idle for longer than the timeout at `now`
    ///
    /// Returns the number of flows archived. Only the head of the queue is
    /// inspected; the first live head ends the scan.
    pub fn expire(&mut self, now: Timestamp) -> Result<usize, ArchiveError> {
        let mut expired = 0;
        while let Some(handle) = self.queue.head() {
            let flow = self.arena.flow(handle);
            if !flow.expired_after(now, self.timeout_us) {
                break;
            }
            self.sink.write_flow(flow)?;
            self.retire(handle);
            expired += 1;
        }

        if expired > 0 {
            debug!("Expired {} flows at {} ({} live)", expired, now, self.len());
        }
        Ok(expired)
    }

    /// Archive every live flow regardless of age
    pub fn flush(&mut self) -> Result<usize, ArchiveError> {
        let mut flushed = 0;
        while let Some(handle) = self.queue.head() {
            self.sink.write_flow(self.arena.flow(handle))?;
            self.retire(handle);
            flushed += 1;
        }

        info!("Flushed {} live flows", flushed);
        Ok(flushed)
    }

    /// Live flow for `key` in either direction
    pub fn find(&self, key: &FlowKey) -> Option<&Flow> {
        self.index.get(key).map(|handle| self.arena.flow(*handle))
    }

    /// Flow size distribution of the live flows
    ///
    /// With `protocol` set only flows of that IP protocol are counted.
    pub fn current_fsd(&self, protocol: Option<u32>, bins: usize) -> FlowSizeDistribution {
        let mut fsd = FlowSizeDistribution::with_bins(bins);
        self.iter()
            .filter(|flow| protocol.map_or(true, |p| flow.key().protocol == p))
            .for_each(|flow| fsd.add_flow(flow.packet_count()));
        fsd
    }

    /// Live flows from least to most recently active
    pub fn iter(&self) -> impl Iterator<Item = &Flow> + '_ {
        self.queue.iter(&self.arena).map(|(_, flow)| flow)
    }

    /// Number of live flows
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn packets_seen(&self) -> u64 {
        self.packets_seen
    }

    pub fn first_packet_time(&self) -> Option<Timestamp> {
        self.first_packet_time
    }

    pub fn last_packet_time(&self) -> Option<Timestamp> {
        self.first_packet_time.map(|_| self.last_packet_time)
    }

    /// Trace time covered so far, in microseconds
    pub fn up_time(&self) -> u64 {
        self.first_packet_time
            .map_or(0, |first| self.last_packet_time.micros_since(first))
    }

    pub fn flows_created(&self) -> u64 {
        self.flows_created
    }

    pub fn flows_archived(&self) -> u64 {
        self.flows_archived
    }

    pub fn reordered_packets(&self) -> u64 {
        self.reordered_packets
    }

    pub fn timeout_us(&self) -> u64 {
        self.timeout_us
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Give up the table and keep the sink
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Unlink and destroy a flow that has been persisted
    fn retire(&mut self, handle: FlowHandle) {
        self.queue.remove(&mut self.arena, handle);
        let flow = self.arena.remove(handle);
        let indexed = self.index.remove(flow.key());
        assert_eq!(
            indexed,
            Some(handle),
            "flow index and eviction queue disagree on {}",
            flow.key()
        );
        self.flows_archived += 1;
    }
}
