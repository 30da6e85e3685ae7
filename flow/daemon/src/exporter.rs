//! Report exporters
//!
//! Writes the final [`FlowReport`] as JSON or Prometheus text exposition.

use crate::types::{FlowReport, FlowSizeDistribution};
use anyhow::{Context, Result};
use std::{
    fmt::Write as _,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

/// Trait for report exporters
pub trait ReportExporter {
    /// Export a report
    ///
    /// # Arguments
    ///
    /// * `report` - Final report of a pipeline run
    fn export(&self, report: &FlowReport) -> Result<()>;
}

/// JSON exporter
pub struct JsonExporter {
    output_path: PathBuf,
    pretty: bool,
}

impl JsonExporter {
    /// Create a new JSON exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `pretty` - Enable pretty-printing
    pub fn new(output_path: PathBuf, pretty: bool) -> Self {
        Self {
            output_path,
            pretty,
        }
    }
}

impl ReportExporter for JsonExporter {
    fn export(&self, report: &FlowReport) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };

        write_file(&self.output_path, json.as_bytes())
    }
}

/// Prometheus exporter
pub struct PrometheusExporter {
    output_path: PathBuf,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    /// Convert a report to Prometheus text format
    fn to_prometheus_format(report: &FlowReport) -> String {
        let mut output = String::new();

        let counters: [(&str, &str, u64); 6] = [
            ("packets_produced_total", "Packets written into the conduit", report.packets_produced),
            ("packets_seen_total", "Packets aggregated by the flow table", report.packets_seen),
            ("packets_reordered_total", "Packets that arrived out of trace order", report.reordered_packets),
            ("flows_created_total", "Flows created", report.flows_created),
            ("flows_archived_total", "Flows handed to the archive", report.flows_archived),
            ("live_flows", "Flows live at shutdown", report.live_flows),
        ];
        for (name, help, value) in counters {
            let kind = if name.ends_with("_total") { "counter" } else { "gauge" };
            push_metric_header(&mut output, name, help, kind);
            let _ = writeln!(output, "flowmon_{} {}\n", name, value);
        }

        push_metric_header(&mut output, "duration_seconds", "Wall-clock duration of the run", "gauge");
        let _ = writeln!(output, "flowmon_duration_seconds {}\n", report.duration_seconds);

        push_metric_header(&mut output, "trace_seconds", "Trace time covered by the packets seen", "gauge");
        let _ = writeln!(output, "flowmon_trace_seconds {}\n", report.trace_seconds);

        // Flow size distribution, bin label is the packet count (last bin is "+Inf")
        push_metric_header(
            &mut output,
            "flow_size_flows",
            "Live flows by packet count",
            "gauge",
        );
        push_fsd(&mut output, "all", &report.fsd);
        for (protocol, fsd) in &report.fsd_by_protocol {
            push_fsd(&mut output, protocol, fsd);
        }
        output.push('\n');

        output
    }
}

fn push_metric_header(output: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(output, "# HELP flowmon_{} {}", name, help);
    let _ = writeln!(output, "# TYPE flowmon_{} {}", name, kind);
}

fn push_fsd(output: &mut String, protocol: &str, fsd: &FlowSizeDistribution) {
    let last = fsd.bins.len().saturating_sub(1);
    for (i, count) in fsd.bins.iter().enumerate() {
        let packets = if i == last { "+Inf".to_string() } else { (i + 1).to_string() };
        let _ = writeln!(
            output,
            "flowmon_flow_size_flows{{protocol=\"{}\",packets=\"{}\"}} {}",
            protocol, packets, count
        );
    }
}

impl ReportExporter for PrometheusExporter {
    fn export(&self, report: &FlowReport) -> Result<()> {
        let prometheus_data = Self::to_prometheus_format(report);
        write_file(&self.output_path, prometheus_data.as_bytes())
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?;

    file.write_all(data)
        .with_context(|| format!("Failed to write to output file: {:?}", path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn create_test_report() -> FlowReport {
        let mut fsd = FlowSizeDistribution::with_bins(3);
        fsd.add_flow(1);
        fsd.add_flow(1);
        fsd.add_flow(7);

        let mut fsd_by_protocol = BTreeMap::new();
        fsd_by_protocol.insert("tcp".to_string(), fsd.clone());

        FlowReport {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            duration_seconds: 60,
            trace_seconds: 59.5,
            packets_produced: 1000,
            packets_seen: 1000,
            reordered_packets: 2,
            flows_created: 40,
            flows_archived: 37,
            live_flows: 3,
            fsd,
            fsd_by_protocol,
        }
    }

    #[test]
    fn test_prometheus_format() {
        let report = create_test_report();
        let prometheus = PrometheusExporter::to_prometheus_format(&report);

        assert!(prometheus.contains("flowmon_packets_seen_total 1000"));
        assert!(prometheus.contains("# TYPE flowmon_live_flows gauge"));
        assert!(prometheus.contains("flowmon_duration_seconds 60"));
        assert!(prometheus.contains("flowmon_flow_size_flows{protocol=\"all\",packets=\"1\"} 2"));
        assert!(prometheus.contains("flowmon_flow_size_flows{protocol=\"tcp\",packets=\"+Inf\"} 1"));
    }

    #[test]
    fn test_json_export_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        JsonExporter::new(path.clone(), true)
            .export(&create_test_report())
            .unwrap();

        let back: FlowReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.flows_archived, 37);
        assert_eq!(back.fsd.bins, vec![2, 0, 1]);
    }
}
