//! Flow Monitor Library
//!
//! Aggregates packets into bidirectional flows, expires idle flows in trace
//! time and archives them. Packets arrive from a live interface or from
//! recorded archives through a bounded single-producer/single-consumer
//! conduit.

pub mod archive;
pub mod conduit;
pub mod config;
pub mod decode;
pub mod error;
pub mod exporter;
pub mod flow;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod shutdown;
pub mod source;
pub mod table;
pub mod types;

pub use archive::{FlowRecorder, FlowSink, MemorySink, NullSink, PacketRecorder, PacketSink};
pub use conduit::{Conduit, ConduitConsumer, ConduitProducer, Interrupted};
pub use config::{PipelineConfig, ReportFormat};
pub use error::{ArchiveError, ConduitError, ConfigError, ParseError, PipelineError, SourceError};
pub use exporter::{JsonExporter, PrometheusExporter, ReportExporter};
pub use flow::Flow;
pub use pipeline::{Pipeline, PipelineOutcome};
pub use shutdown::Listening;
pub use source::{
    open_source, LiveSource, PacketSource, PcapFileSource, ReplaySource, SourceStats,
};
pub use table::{FlowTable, InsertOutcome};
pub use types::*;
