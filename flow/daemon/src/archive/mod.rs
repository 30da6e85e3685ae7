//! Archival sinks for flows and packets
//!
//! The flow table only needs [`FlowSink`]; packet sources optionally record
//! what they capture through [`PacketSink`]. Both contracts are the same:
//! `write` may be called any number of times before `close`, and a failed
//! write is reported to the caller.

mod reader;
mod recorder;

pub use reader::{is_packet_archive, list_packet_files, PacketFileReader};
pub use recorder::{FlowRecorder, PacketFormat, PacketRecorder};

use crate::error::ArchiveError;
use crate::flow::Flow;
use crate::types::{FlowSummary, PacketRecord};

/// Destination for flows leaving the flow table
pub trait FlowSink {
    /// Persist one flow
    fn write_flow(&mut self, flow: &Flow) -> Result<(), ArchiveError>;

    /// Flush and release the backing storage
    fn close(&mut self) -> Result<(), ArchiveError> {
        Ok(())
    }
}

/// Destination for captured packets
pub trait PacketSink {
    /// Persist one packet
    fn write_packet(&mut self, packet: &PacketRecord) -> Result<(), ArchiveError>;

    /// Flush and release the backing storage
    fn close(&mut self) -> Result<(), ArchiveError> {
        Ok(())
    }
}

impl<T: FlowSink + ?Sized> FlowSink for Box<T> {
    fn write_flow(&mut self, flow: &Flow) -> Result<(), ArchiveError> {
        (**self).write_flow(flow)
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        (**self).close()
    }
}

impl<T: PacketSink + ?Sized> PacketSink for Box<T> {
    fn write_packet(&mut self, packet: &PacketRecord) -> Result<(), ArchiveError> {
        (**self).write_packet(packet)
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        (**self).close()
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FlowSink for NullSink {
    fn write_flow(&mut self, _flow: &Flow) -> Result<(), ArchiveError> {
        Ok(())
    }
}

impl PacketSink for NullSink {
    fn write_packet(&mut self, _packet: &PacketRecord) -> Result<(), ArchiveError> {
        Ok(())
    }
}

/// Sink that keeps a log of everything written to it
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    flows: Vec<FlowSummary>,
    packets: Vec<PacketRecord>,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flows written, in write order
    pub fn flows(&self) -> &[FlowSummary] {
        &self.flows
    }

    /// Packets written, in write order
    pub fn packets(&self) -> &[PacketRecord] {
        &self.packets
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl FlowSink for MemorySink {
    fn write_flow(&mut self, flow: &Flow) -> Result<(), ArchiveError> {
        if self.closed {
            return Err(ArchiveError::Closed);
        }
        self.flows.push(flow.summary());
        Ok(())
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        self.closed = true;
        Ok(())
    }
}

impl PacketSink for MemorySink {
    fn write_packet(&mut self, packet: &PacketRecord) -> Result<(), ArchiveError> {
        if self.closed {
            return Err(ArchiveError::Closed);
        }
        self.packets.push(*packet);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        self.closed = true;
        Ok(())
    }
}
