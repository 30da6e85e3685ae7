//! Producer/consumer wiring for one monitoring run
//!
//! The packet source and the aggregation loop each run on a blocking
//! thread and meet only at the conduit. The flow table lives entirely on
//! the aggregation thread. A progress reporter task logs counters while the
//! run is in progress.

use crate::archive::{FlowSink, PacketSink};
use crate::conduit::{Conduit, ConduitConsumer, ConduitStats, Interrupted};
use crate::config::PipelineConfig;
use crate::error::{ArchiveError, ConfigError, PipelineError, SourceError};
use crate::shutdown::Listening;
use crate::source::{PacketSource, SourceStats};
use crate::table::FlowTable;
use crate::types::{protocol_name, FlowReport};
use flow_common::constants::MICROS_PER_SEC;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{self, JoinHandle};
use tokio::time::{interval, sleep};

/// Aggregation counters published for the progress reporter
#[derive(Debug, Default)]
pub struct AggregateStats {
    packets_seen: AtomicU64,
    live_flows: AtomicU64,
    flows_archived: AtomicU64,
}

impl AggregateStats {
    fn observe<S: FlowSink>(&self, table: &FlowTable<S>) {
        self.packets_seen.store(table.packets_seen(), Ordering::Relaxed);
        self.live_flows.store(table.len() as u64, Ordering::Relaxed);
        self.flows_archived.store(table.flows_archived(), Ordering::Relaxed);
    }

    pub fn packets_seen(&self) -> u64 {
        self.packets_seen.load(Ordering::Relaxed)
    }

    pub fn live_flows(&self) -> u64 {
        self.live_flows.load(Ordering::Relaxed)
    }

    pub fn flows_archived(&self) -> u64 {
        self.flows_archived.load(Ordering::Relaxed)
    }
}

/// Result of a completed run
pub struct PipelineOutcome<S> {
    pub report: FlowReport,
    pub source: SourceStats,
    /// Flow sink, already closed
    pub sink: S,
}

/// One monitoring run
pub struct Pipeline {
    config: PipelineConfig,
    listening: Arc<Listening>,
    stats: Arc<AggregateStats>,
}

impl Pipeline {
    /// Create a pipeline from a validated configuration
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            listening: Arc::new(Listening::new()),
            stats: Arc::new(AggregateStats::default()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Shutdown context shared by both halves of the run
    pub fn listening(&self) -> Arc<Listening> {
        Arc::clone(&self.listening)
    }

    pub fn stats(&self) -> Arc<AggregateStats> {
        Arc::clone(&self.stats)
    }

    /// Run until the source ends or `shutdown` completes
    ///
    /// # Arguments
    ///
    /// * `source` - Producer of packet records
    /// * `sink` - Archive for flows leaving the table
    /// * `recorder` - Archive for produced packets
    /// * `shutdown` - Future that requests a cooperative stop when it completes
    pub async fn run<S, F>(
        &self,
        mut source: Box<dyn PacketSource>,
        sink: S,
        mut recorder: Box<dyn PacketSink + Send>,
        shutdown: F,
    ) -> Result<PipelineOutcome<S>, PipelineError>
    where
        S: FlowSink + Send + 'static,
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let (producer, consumer) = Conduit::open(self.config.conduit_capacity, &self.listening)?;
        let conduit_stats = producer.stats();
        info!("Reading from {}", source.describe());

        let listening = Arc::clone(&self.listening);
        let source_task = task::spawn_blocking(move || -> Result<SourceStats, SourceError> {
            let stats = source.run(&producer, &listening, recorder.as_mut());
            let closed = recorder.close();
            let stats = stats?;
            closed?;
            Ok(stats)
        });

        let table = FlowTable::with_timeout(sink, self.config.flow_timeout_us);
        let listening = Arc::clone(&self.listening);
        let stats = Arc::clone(&self.stats);
        let bins = self.config.fsd_bins;
        let mut aggregate_task =
            task::spawn_blocking(move || aggregate(consumer, table, &listening, &stats, bins));

        let progress = self.config.progress_interval.map(|every| {
            spawn_progress_reporter(
                every,
                Arc::clone(&conduit_stats),
                Arc::clone(&self.stats),
                Arc::clone(&self.listening),
            )
        });

        let finished = tokio::select! {
            joined = &mut aggregate_task => Some(joined),
            _ = shutdown => None,
        };
        let joined = match finished {
            Some(joined) => joined,
            None => {
                info!("Shutting down...");
                self.listening.stop();
                aggregate_task.await
            }
        };

        // The consumer is gone; make sure the producer and reporter notice
        self.listening.stop();
        let source_result = source_task.await;
        if let Some(progress) = progress {
            progress.abort();
        }

        let (mut report, sink) = joined??;
        let source_stats = source_result??;

        report.packets_produced = conduit_stats.produced();
        report.duration_seconds = started.elapsed().as_secs();
        info!(
            "Run complete: {} packets, {} flows archived",
            report.packets_seen, report.flows_archived
        );

        Ok(PipelineOutcome {
            report,
            source: source_stats,
            sink,
        })
    }
}

/// Consumer context: drive the flow table until the conduit stops
fn aggregate<S: FlowSink>(
    consumer: ConduitConsumer,
    mut table: FlowTable<S>,
    listening: &Listening,
    stats: &AggregateStats,
    bins: usize,
) -> Result<(FlowReport, S), ArchiveError> {
    if let Err(e) = consume_until_stopped(&consumer, &mut table, listening, stats) {
        return Err(abandon(table, e));
    }

    let mut report = snapshot(&table, bins);
    if let Err(e) = table.flush() {
        return Err(abandon(table, e));
    }
    report.flows_archived = table.flows_archived();
    stats.observe(&table);

    let mut sink = table.into_sink();
    sink.close()?;
    Ok((report, sink))
}

fn consume_until_stopped<S: FlowSink>(
    consumer: &ConduitConsumer,
    table: &mut FlowTable<S>,
    listening: &Listening,
    stats: &AggregateStats,
) -> Result<(), ArchiveError> {
    while listening.is_listening() {
        match consumer.consume() {
            Ok(record) => {
                table.insert(&record)?;
                stats.observe(table);
            }
            Err(Interrupted::Shutdown) => {
                debug!("Aggregation interrupted by shutdown");
                break;
            }
            Err(Interrupted::Closed) => {
                info!("Packet source finished");
                break;
            }
        }
    }

    let mut drained = 0u64;
    for record in consumer.drain() {
        table.insert(&record)?;
        drained += 1;
    }
    if drained > 0 {
        info!("Aggregated {} packets still buffered at shutdown", drained);
    }
    Ok(())
}

/// Offer the remaining flows to the sink once more and close it
///
/// Returns `error`, the failure that ended aggregation.
fn abandon<S: FlowSink>(mut table: FlowTable<S>, error: ArchiveError) -> ArchiveError {
    warn!("Flow archive failed: {}", error);
    match table.flush() {
        Ok(flushed) => info!("Archived {} live flows after the failure", flushed),
        Err(e) => warn!("{} live flows not archived: {}", table.len(), e),
    }
    if let Err(e) = table.sink_mut().close() {
        warn!("Cannot close flow archive: {}", e);
    }
    error
}

/// Report of the table as it stands, before the final flush
fn snapshot<S: FlowSink>(table: &FlowTable<S>, bins: usize) -> FlowReport {
    let protocols: BTreeSet<u32> = table.iter().map(|flow| flow.key().protocol).collect();
    let fsd_by_protocol = protocols
        .into_iter()
        .map(|protocol| (protocol_name(protocol), table.current_fsd(Some(protocol), bins)))
        .collect();

    FlowReport {
        timestamp: chrono::Utc::now().to_rfc3339(),
        duration_seconds: 0,
        trace_seconds: table.up_time() as f64 / MICROS_PER_SEC as f64,
        packets_produced: 0,
        packets_seen: table.packets_seen(),
        reordered_packets: table.reordered_packets(),
        flows_created: table.flows_created(),
        flows_archived: table.flows_archived(),
        live_flows: table.len() as u64,
        fsd: table.current_fsd(None, bins),
        fsd_by_protocol,
    }
}

/// Spawn progress reporter
///
/// Creates a task that periodically logs conduit and table counters until
/// the listening context is stopped.
pub fn spawn_progress_reporter(
    every: Duration,
    conduit: Arc<ConduitStats>,
    stats: Arc<AggregateStats>,
    listening: Arc<Listening>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !listening.is_listening() {
                break;
            }
            info!(
                "Progress: {} packets produced, {} aggregated, {} live flows, {} archived",
                conduit.produced(),
                stats.packets_seen(),
                stats.live_flows(),
                stats.flows_archived()
            );
        }
    })
}

/// Completes on ctrl-c, or after `duration` when one is given
pub async fn shutdown_signal(duration: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match duration {
        Some(d) => {
            tokio::select! {
                _ = sleep(d) => info!("Duration reached, shutting down..."),
                _ = ctrl_c => info!("Interrupted, shutting down..."),
            }
        }
        None => {
            ctrl_c.await;
            info!("Interrupted, shutting down...");
        }
    }
}
