//! Pipeline configuration
//!
//! Built by the CLI from its arguments; every field has a default taken
//! from `flow_common::constants`.

use crate::archive::PacketFormat;
use crate::error::ConfigError;
use flow_common::constants::{
    DEFAULT_CONDUIT_CAPACITY, FLOW_TIMEOUT_US, MAX_RECORDS_PER_FILE, NUM_FSD_BINS,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Output format of the final report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Prometheus,
}

impl FromStr for ReportFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "prometheus" | "prom" => Ok(ReportFormat::Prometheus),
            _ => Err(ConfigError::ReportFormat(s.to_string())),
        }
    }
}

/// Everything a pipeline run needs to know
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Interface name, archive file or archive directory
    pub source: String,
    /// Records the conduit can hold
    pub conduit_capacity: usize,
    /// Idle time after which a flow is archived, in microseconds
    pub flow_timeout_us: u64,
    /// Bins of the flow size distribution
    pub fsd_bins: usize,
    /// Records per archive file before rotating
    pub records_per_file: u64,
    /// Gzip archive files when they are closed
    pub compress: bool,
    /// Where expired flows are recorded (not recorded when unset)
    pub flow_dir: Option<PathBuf>,
    /// Where captured packets are recorded (not recorded when unset)
    pub packet_dir: Option<PathBuf>,
    /// Encoding of recorded packets
    pub packet_format: PacketFormat,
    /// Progress log interval (no progress log when unset)
    pub progress_interval: Option<Duration>,
    /// Stop after this long (run until input ends or ctrl-c when unset)
    pub duration: Option<Duration>,
    /// Final report destination
    pub report_path: PathBuf,
    pub report_format: ReportFormat,
}

impl PipelineConfig {
    /// Defaults for reading from `source`
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            conduit_capacity: DEFAULT_CONDUIT_CAPACITY,
            flow_timeout_us: FLOW_TIMEOUT_US,
            fsd_bins: NUM_FSD_BINS,
            records_per_file: MAX_RECORDS_PER_FILE,
            compress: false,
            flow_dir: None,
            packet_dir: None,
            packet_format: PacketFormat::Binary,
            progress_interval: Some(Duration::from_secs(10)),
            duration: None,
            report_path: PathBuf::from("flow-report.json"),
            report_format: ReportFormat::Json,
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conduit_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "conduit capacity",
            });
        }
        if self.flow_timeout_us == 0 {
            return Err(ConfigError::Zero {
                field: "flow timeout",
            });
        }
        if self.fsd_bins == 0 {
            return Err(ConfigError::Zero { field: "FSD bins" });
        }
        if self.records_per_file == 0 {
            return Err(ConfigError::Zero {
                field: "records per file",
            });
        }
        Ok(())
    }
}
