//! Flow Monitor - Userspace Program
//!
//! Reads packets from a live interface or from recorded archives,
//! aggregates them into flows, archives expired flows and exports a
//! report when the run ends.
//!
//! ## Usage
//!
//! ```bash
//! # Capture on eth0 for 60 seconds, archive flows, export JSON
//! sudo ./flowmon --input eth0 --duration 60 --flow-dir flows/ --output report.json
//!
//! # Replay a directory of recorded packets
//! ./flowmon --input captures/ --flow-dir flows/ --compress
//!
//! # Record captured packets as text while aggregating
//! sudo ./flowmon --input eth0 --packet-dir packets/ --packet-format text
//!
//! # Replay a pcap capture
//! ./flowmon --input capture.pcap --flow-dir flows/
//!
//! # Export to Prometheus format
//! ./flowmon --input trace.pkt.gz --format prometheus --output report.prom
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use flowmon_daemon::{
    archive::{FlowRecorder, FlowSink, NullSink, PacketFormat, PacketRecorder, PacketSink},
    config::{PipelineConfig, ReportFormat},
    exporter::{JsonExporter, PrometheusExporter, ReportExporter},
    pipeline::{shutdown_signal, Pipeline},
    source::open_source,
    types::FlowReport,
};
use flow_common::constants::{
    DEFAULT_CONDUIT_CAPACITY, MAX_RECORDS_PER_FILE, MICROS_PER_SEC, NUM_FSD_BINS,
};
use log::info;
use std::{path::PathBuf, time::Duration};

/// Bidirectional flow monitor
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Network interface, pcap file, packet archive (.pkt, .pkta, .txt, optionally .gz) or archive directory
    #[clap(short, long)]
    input: String,

    /// Duration to run (in seconds, 0 = until the input ends or ctrl-c)
    #[clap(short, long, default_value_t = 0)]
    duration: u64,

    /// Output file for the final report
    #[clap(short, long, default_value = "flow-report.json")]
    output: PathBuf,

    /// Report format (json, prometheus)
    #[clap(short, long, default_value = "json")]
    format: String,

    /// Idle time after which a flow is archived (in seconds)
    #[clap(long, default_value_t = 60)]
    flow_timeout: u64,

    /// Packets the conduit can buffer between capture and aggregation
    #[clap(long, default_value_t = DEFAULT_CONDUIT_CAPACITY)]
    capacity: usize,

    /// Number of flow size distribution bins
    #[clap(long, default_value_t = NUM_FSD_BINS)]
    fsd_bins: usize,

    /// Directory to archive expired flows into
    #[clap(long)]
    flow_dir: Option<PathBuf>,

    /// Directory to record captured packets into
    #[clap(long)]
    packet_dir: Option<PathBuf>,

    /// Encoding of recorded packets (binary, text)
    #[clap(long, default_value = "binary")]
    packet_format: String,

    /// Records per archive file before rotating
    #[clap(long, default_value_t = MAX_RECORDS_PER_FILE)]
    records_per_file: u64,

    /// Gzip archive files when they are rotated
    #[clap(long)]
    compress: bool,

    /// Progress reporting interval in seconds (0 = off)
    #[clap(long, default_value_t = 10)]
    progress_interval: u64,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,
}

impl Args {
    fn to_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::new(self.input.clone());
        config.conduit_capacity = self.capacity;
        config.flow_timeout_us = self.flow_timeout.saturating_mul(MICROS_PER_SEC);
        config.fsd_bins = self.fsd_bins;
        config.records_per_file = self.records_per_file;
        config.compress = self.compress;
        config.flow_dir = self.flow_dir.clone();
        config.packet_dir = self.packet_dir.clone();
        config.packet_format = match self.packet_format.to_lowercase().as_str() {
            "binary" | "pkt" => PacketFormat::Binary,
            "text" | "pkta" => PacketFormat::Text,
            _ => anyhow::bail!(
                "Unsupported packet format: {}. Use binary or text",
                self.packet_format
            ),
        };
        config.progress_interval =
            (self.progress_interval > 0).then(|| Duration::from_secs(self.progress_interval));
        config.duration = (self.duration > 0).then(|| Duration::from_secs(self.duration));
        config.report_path = self.output.clone();
        config.report_format = self.format.parse::<ReportFormat>()?;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    print_banner();

    let config = args.to_config()?;

    info!("Starting flow monitor...");
    info!("   Input: {}", config.source);
    info!(
        "   Duration: {}",
        config
            .duration
            .map_or("until input ends".to_string(), |d| format!("{} seconds", d.as_secs()))
    );
    info!("   Flow timeout: {} seconds", args.flow_timeout);
    info!("   Conduit capacity: {} packets", config.conduit_capacity);
    info!("   Report: {:?} ({:?})", config.report_path, config.report_format);

    let source = open_source(&config.source)
        .with_context(|| format!("Failed to open input {}", config.source))?;

    let flow_sink: Box<dyn FlowSink + Send> = match &config.flow_dir {
        Some(dir) => {
            info!("   Flow archive: {:?}", dir);
            Box::new(
                FlowRecorder::new(dir, config.compress)
                    .context("Failed to open flow archive")?
                    .with_records_per_file(config.records_per_file),
            )
        }
        None => Box::new(NullSink),
    };

    let recorder: Box<dyn PacketSink + Send> = match &config.packet_dir {
        Some(dir) => {
            info!("   Packet archive: {:?} ({:?})", dir, config.packet_format);
            Box::new(
                PacketRecorder::new(dir, config.packet_format, config.compress)
                    .context("Failed to open packet archive")?
                    .with_records_per_file(config.records_per_file),
            )
        }
        None => Box::new(NullSink),
    };

    let duration = config.duration;
    let report_path = config.report_path.clone();
    let report_format = config.report_format;
    let pipeline = Pipeline::new(config)?;

    info!("Collecting flows...");
    let outcome = pipeline
        .run(source, flow_sink, recorder, shutdown_signal(duration))
        .await
        .context("Flow monitor failed")?;

    info!("Generating flow report...");

    // Export report based on format
    match report_format {
        ReportFormat::Json => {
            let exporter = JsonExporter::new(report_path.clone(), true);
            exporter.export(&outcome.report)?;
        }
        ReportFormat::Prometheus => {
            let exporter = PrometheusExporter::new(report_path.clone());
            exporter.export(&outcome.report)?;
        }
    }

    info!("Report written to {:?}", report_path);

    // Print summary
    print_summary(&outcome.report);

    Ok(())
}

fn print_banner() {
    println!(
        r#"
╔═══════════════════════════════════════════════════╗
║              Flow Monitor - flowmon               ║
║        Bidirectional Flow Aggregation             ║
╚═══════════════════════════════════════════════════╝
    "#
    );
}

fn print_summary(report: &FlowReport) {
    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  Packets produced:   {}", report.packets_produced);
    info!("  Packets aggregated: {}", report.packets_seen);
    info!("  Out of order:       {}", report.reordered_packets);
    info!("  Duration:           {} seconds", report.duration_seconds);
    info!("  Trace time:         {:.3} seconds", report.trace_seconds);
    info!("");
    info!("  Flows created:      {}", report.flows_created);
    info!("  Flows archived:     {}", report.flows_archived);
    info!("  Live at shutdown:   {}", report.live_flows);
    info!("");
    info!("  Flow size distribution (packets: flows):");
    let last = report.fsd.bins.len().saturating_sub(1);
    for (i, count) in report.fsd.bins.iter().enumerate().filter(|(_, c)| **c > 0) {
        let label = if i == last { format!("{}+", i + 1) } else { (i + 1).to_string() };
        info!("    {:>5}: {:>8}", label, count);
    }
    info!("");
    info!("  By protocol:");
    for (protocol, fsd) in &report.fsd_by_protocol {
        info!("    {:<10} {:>8} flows", protocol, fsd.total_flows());
    }
    info!("");
    info!("============================================");
}
