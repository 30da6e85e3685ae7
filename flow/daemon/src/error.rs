//! Typed errors for the flow daemon library
//!
//! Environment failures (files, interfaces, buffers) are returned to the
//! caller. Broken internal invariants are not represented here; they panic.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to parse a text packet record
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("unexpected trailing field {0:?}")]
    TrailingField(String),
}

/// Archive sink or reader failure
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("output directory does not exist: {0:?}")]
    MissingDirectory(PathBuf),

    #[error("not a packet archive: {0:?}")]
    UnsupportedFile(PathBuf),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} line {line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: ParseError,
    },

    #[error("{path:?} ends with a partial record of {len} bytes")]
    Truncated { path: PathBuf, len: usize },

    #[error("sink is closed")]
    Closed,
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure to set up the packet conduit
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConduitError {
    #[error("conduit capacity must be at least one record")]
    ZeroCapacity,
}

/// Packet source failure
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no such interface or archive: {0}")]
    NotFound(String),

    #[error("cannot open capture on {interface}: {source}")]
    Capture {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported datalink channel on {0}")]
    UnsupportedChannel(String),

    #[error("cannot read pcap file {path}: {source}")]
    Pcap {
        path: String,
        #[source]
        source: pcap_file::PcapError,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Invalid pipeline configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("unsupported report format: {0}. Use json or prometheus")]
    ReportFormat(String),
}

/// Failure of a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Conduit(#[from] ConduitError),

    #[error("packet source failed: {0}")]
    Source(#[from] SourceError),

    #[error("flow archive failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
