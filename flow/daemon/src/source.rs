//! Packet sources feeding the conduit
//!
//! A source runs on the producer context. It writes records into the
//! conduit in arrival order and stops at end of input, when the listening
//! context is stopped, or when the consumer has gone away.

use crate::archive::{is_packet_archive, list_packet_files, PacketFileReader, PacketSink};
use crate::conduit::{ConduitProducer, Interrupted};
use crate::decode::{capture_time, decode_frame};
use crate::error::{ArchiveError, SourceError};
use crate::shutdown::Listening;
use crate::types::{PacketRecord, Timestamp};
use log::{debug, info, warn};
use pcap_file::pcap::PcapReader;
use pcap_file::{DataLink, PcapError};
use pnet::datalink::{self, Channel, NetworkInterface};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a live capture read may block before the listening flag is polled
const LIVE_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Counters reported by a source when it stops
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Frames or records read from the input
    pub packets_read: u64,
    /// Records written into the conduit
    pub packets_produced: u64,
    /// Frames that were not IPv4, or records that could not be decoded
    pub packets_skipped: u64,
    /// Archive files read to the end
    pub files_replayed: u64,
    /// The run ended because of shutdown rather than end of input
    pub interrupted: bool,
}

/// Producer side of the pipeline
pub trait PacketSource: Send {
    /// Human readable name of the input
    fn describe(&self) -> String;

    /// True for live capture, false for replay
    fn is_live(&self) -> bool;

    /// Produce records until the input ends or the run is interrupted
    ///
    /// # Arguments
    ///
    /// * `producer` - Writing half of the conduit
    /// * `listening` - Shared shutdown context, polled between records
    /// * `recorder` - Receives a copy of every produced record
    fn run(
        &mut self,
        producer: &ConduitProducer,
        listening: &Listening,
        recorder: &mut dyn PacketSink,
    ) -> Result<SourceStats, SourceError>;
}

/// Hand one record to the conduit and the recorder
///
/// Returns `false` when the source should stop.
fn forward(
    record: PacketRecord,
    producer: &ConduitProducer,
    listening: &Listening,
    recorder: &mut dyn PacketSink,
    stats: &mut SourceStats,
) -> Result<bool, SourceError> {
    if !listening.is_listening() {
        debug!("Producer stopping, listening context stopped");
        stats.interrupted = true;
        return Ok(false);
    }

    match producer.produce(record) {
        Ok(()) => {
            stats.packets_produced += 1;
            recorder.write_packet(&record)?;
            Ok(true)
        }
        Err(Interrupted::Shutdown) => {
            debug!("Producer interrupted by shutdown");
            stats.interrupted = true;
            Ok(false)
        }
        Err(Interrupted::Closed) => {
            debug!("Consumer gone, producer stopping");
            stats.interrupted = true;
            Ok(false)
        }
    }
}

/// Replays archived packets with their recorded arrival times
#[derive(Debug, Clone)]
pub struct ReplaySource {
    name: PathBuf,
    files: Vec<PathBuf>,
}

impl ReplaySource {
    /// Replay one archive file, or every archive in a directory in name order
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let name = path.into();
        let files = if name.is_dir() {
            list_packet_files(&name)?
        } else if name.is_file() && is_packet_archive(&name) {
            vec![name.clone()]
        } else {
            return Err(SourceError::NotFound(name.display().to_string()));
        };

        if files.is_empty() {
            warn!("No packet archives found in {:?}", name);
        }
        Ok(Self { name, files })
    }

    /// Files that will be replayed, in order
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl PacketSource for ReplaySource {
    fn describe(&self) -> String {
        format!("replay of {:?} ({} files)", self.name, self.files.len())
    }

    fn is_live(&self) -> bool {
        false
    }

    fn run(
        &mut self,
        producer: &ConduitProducer,
        listening: &Listening,
        recorder: &mut dyn PacketSink,
    ) -> Result<SourceStats, SourceError> {
        let mut stats = SourceStats::default();

        for file in &self.files {
            if !listening.is_listening() {
                stats.interrupted = true;
                break;
            }
            info!("Replaying {:?}", file);

            for record in PacketFileReader::open(file)? {
                let record = match record {
                    Ok(record) => record,
                    Err(e @ (ArchiveError::Truncated { .. } | ArchiveError::Parse { .. })) => {
                        warn!("Skipping rest of {:?}: {}", file, e);
                        stats.packets_skipped += 1;
                        break;
                    }
                    Err(e) => return Err(e.into()),
                };
                stats.packets_read += 1;

                if !forward(record, producer, listening, recorder, &mut stats)? {
                    return Ok(stats);
                }
            }
            stats.files_replayed += 1;
        }

        info!(
            "Replay finished: {} files, {} packets",
            stats.files_replayed, stats.packets_produced
        );
        Ok(stats)
    }
}

/// Live capture from a network interface
pub struct LiveSource {
    interface: NetworkInterface,
}

impl LiveSource {
    /// Look up an interface by name
    pub fn open(name: &str) -> Result<Self, SourceError> {
        datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .map(|interface| Self { interface })
            .ok_or_else(|| SourceError::NotFound(name.to_string()))
    }
}

impl PacketSource for LiveSource {
    fn describe(&self) -> String {
        format!("live capture on {}", self.interface.name)
    }

    fn is_live(&self) -> bool {
        true
    }

    fn run(
        &mut self,
        producer: &ConduitProducer,
        listening: &Listening,
        recorder: &mut dyn PacketSink,
    ) -> Result<SourceStats, SourceError> {
        let config = datalink::Config {
            read_timeout: Some(LIVE_READ_TIMEOUT),
            ..Default::default()
        };
        let mut rx = match datalink::channel(&self.interface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => return Err(SourceError::UnsupportedChannel(self.interface.name.clone())),
            Err(source) => {
                return Err(SourceError::Capture {
                    interface: self.interface.name.clone(),
                    source,
                })
            }
        };
        info!("Capturing on {}", self.interface.name);

        let mut stats = SourceStats::default();
        while listening.is_listening() {
            let record = match rx.next() {
                Ok(frame) => {
                    stats.packets_read += 1;
                    decode_frame(frame, capture_time())
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                    continue
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(SourceError::Capture {
                        interface: self.interface.name.clone(),
                        source,
                    })
                }
            };

            match record {
                Some(record) => {
                    if !forward(record, producer, listening, recorder, &mut stats)? {
                        break;
                    }
                }
                None => stats.packets_skipped += 1,
            }
        }

        if !listening.is_listening() {
            stats.interrupted = true;
        }
        Ok(stats)
    }
}

/// Replays a pcap capture file, using the capture header timestamps
pub struct PcapFileSource {
    path: PathBuf,
    reader: PcapReader<BufReader<File>>,
}

impl PcapFileSource {
    /// Open a pcap file with an Ethernet link layer
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                SourceError::NotFound(path.display().to_string())
            } else {
                SourceError::Archive(ArchiveError::io(&path, e))
            }
        })?;
        let reader = PcapReader::new(BufReader::new(file)).map_err(|source| SourceError::Pcap {
            path: path.display().to_string(),
            source,
        })?;

        let datalink = reader.header().datalink;
        if datalink != DataLink::ETHERNET {
            return Err(SourceError::UnsupportedChannel(format!(
                "{} ({:?})",
                path.display(),
                datalink
            )));
        }
        Ok(Self { path, reader })
    }
}

impl PacketSource for PcapFileSource {
    fn describe(&self) -> String {
        format!("pcap replay of {:?}", self.path)
    }

    fn is_live(&self) -> bool {
        false
    }

    fn run(
        &mut self,
        producer: &ConduitProducer,
        listening: &Listening,
        recorder: &mut dyn PacketSink,
    ) -> Result<SourceStats, SourceError> {
        info!("Replaying {:?}", self.path);
        let mut stats = SourceStats::default();

        while let Some(packet) = self.reader.next_packet() {
            let packet = match packet {
                Ok(packet) => packet,
                Err(e) if is_truncated(&e) => {
                    warn!("Skipping truncated tail of {:?}", self.path);
                    stats.packets_skipped += 1;
                    break;
                }
                Err(source) => {
                    return Err(SourceError::Pcap {
                        path: self.path.display().to_string(),
                        source,
                    })
                }
            };
            stats.packets_read += 1;

            let arrival = Timestamp::new(
                u32::try_from(packet.timestamp.as_secs()).unwrap_or(u32::MAX),
                packet.timestamp.subsec_micros(),
            );
            match decode_frame(&packet.data, arrival) {
                Some(record) => {
                    if !forward(record, producer, listening, recorder, &mut stats)? {
                        return Ok(stats);
                    }
                }
                None => stats.packets_skipped += 1,
            }
        }

        stats.files_replayed = 1;
        info!(
            "Pcap replay finished: {} frames, {} packets",
            stats.packets_read, stats.packets_produced
        );
        Ok(stats)
    }
}

fn is_truncated(error: &PcapError) -> bool {
    match error {
        PcapError::IncompleteBuffer => true,
        PcapError::IoError(e) => e.kind() == io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}

/// True for paths named like pcap captures
pub fn is_pcap_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pcap") || ext.eq_ignore_ascii_case("cap"))
}

/// Pick a source for `name`
///
/// A directory or a path with a packet archive extension is replayed, and
/// so is a pcap capture. Anything else is taken as a network interface
/// name, falling back to reading `name` as a pcap file when no interface
/// matches.
pub fn open_source(name: &str) -> Result<Box<dyn PacketSource>, SourceError> {
    let path = Path::new(name);
    if path.is_dir() || is_packet_archive(path) {
        return Ok(Box::new(ReplaySource::open(path)?));
    }
    if is_pcap_file(path) {
        return Ok(Box::new(PcapFileSource::open(path)?));
    }

    match LiveSource::open(name) {
        Ok(live) => Ok(Box::new(live)),
        Err(SourceError::NotFound(_)) if path.is_file() => {
            Ok(Box::new(PcapFileSource::open(path)?))
        }
        Err(e) => Err(e),
    }
}
