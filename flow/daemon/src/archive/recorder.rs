//! Rotating file recorders
//!
//! Records are appended to a file named after the local date and time of
//! the first record it holds. After `records_per_file` records the file is
//! closed (and optionally gzipped) and the next record opens a new one.

use super::{FlowSink, PacketSink};
use crate::error::ArchiveError;
use crate::flow::Flow;
use crate::record::format_packet;
use crate::types::{PacketRecord, Timestamp};
use chrono::{Local, TimeZone};
use flate2::write::GzEncoder;
use flate2::Compression;
use flow_common::constants::{
    EXT_FLOW_TEXT, EXT_GZIP, EXT_PACKET_BINARY, EXT_PACKET_TEXT, MAX_RECORDS_PER_FILE,
};
use log::{debug, error, info};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// On-disk encoding of recorded packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFormat {
    /// 28-byte records (`.pkt`)
    Binary,
    /// One text line per packet (`.pkta`)
    Text,
}

impl PacketFormat {
    fn extension(self) -> &'static str {
        match self {
            PacketFormat::Binary => EXT_PACKET_BINARY,
            PacketFormat::Text => EXT_PACKET_TEXT,
        }
    }
}

struct OpenFile {
    path: PathBuf,
    out: BufWriter<File>,
}

/// Output directory plus the file currently being written
struct RotatingFile {
    dir: PathBuf,
    extension: &'static str,
    compress: bool,
    records_per_file: u64,
    records: u64,
    current: Option<OpenFile>,
    closed: bool,
    finished: Vec<PathBuf>,
}

impl RotatingFile {
    fn new(dir: PathBuf, extension: &'static str, compress: bool) -> Result<Self, ArchiveError> {
        if !dir.is_dir() {
            return Err(ArchiveError::MissingDirectory(dir));
        }
        Ok(Self {
            dir,
            extension,
            compress,
            records_per_file: MAX_RECORDS_PER_FILE,
            records: 0,
            current: None,
            closed: false,
            finished: Vec::new(),
        })
    }

    /// File to write the next record into, rotating when the current one is full
    fn next_slot(&mut self, stamp: Timestamp) -> Result<&mut OpenFile, ArchiveError> {
        if self.closed {
            return Err(ArchiveError::Closed);
        }
        if self.current.is_some() && self.records >= self.records_per_file {
            self.finish_current()?;
        }

        let file = match self.current.take() {
            Some(file) => file,
            None => self.open(stamp)?,
        };
        self.records += 1;
        Ok(self.current.insert(file))
    }

    fn open(&mut self, stamp: Timestamp) -> Result<OpenFile, ArchiveError> {
        let path = self.unused_path(&file_stem(stamp));
        let file = File::create(&path).map_err(|e| ArchiveError::io(&path, e))?;
        debug!("Recording to {:?}", path);

        self.records = 0;
        Ok(OpenFile {
            path,
            out: BufWriter::new(file),
        })
    }

    /// `<stem>.<ext>`, or `<stem>-N.<ext>` when that name is already taken
    fn unused_path(&self, stem: &str) -> PathBuf {
        let taken = |path: &Path| path.exists() || gz_path(path).exists();

        let first = self.dir.join(format!("{}.{}", stem, self.extension));
        if !taken(&first) {
            return first;
        }
        (1u32..)
            .map(|n| self.dir.join(format!("{}-{}.{}", stem, n, self.extension)))
            .find(|path| !taken(path))
            .unwrap_or(first)
    }

    fn finish_current(&mut self) -> Result<(), ArchiveError> {
        let Some(OpenFile { path, out }) = self.current.take() else {
            return Ok(());
        };

        let file = out
            .into_inner()
            .map_err(|e| ArchiveError::io(&path, e.into_error()))?;
        file.sync_all().map_err(|e| ArchiveError::io(&path, e))?;
        drop(file);

        let finished = if self.compress { compress_file(&path)? } else { path };
        info!("Closed archive {:?} ({} records)", finished, self.records);
        self.finished.push(finished);
        self.records = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        self.closed = true;
        self.finish_current()
    }

    fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|file| file.path.as_path())
    }
}

impl Drop for RotatingFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close archive in {:?}: {}", self.dir, e);
        }
    }
}

fn file_stem(stamp: Timestamp) -> String {
    match Local.timestamp_opt(i64::from(stamp.sec), 0).single() {
        Some(at) => at.format("%F_%T").to_string(),
        None => stamp.sec.to_string(),
    }
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(EXT_GZIP);
    PathBuf::from(name)
}

/// Gzip `path` to `path.gz` and remove the original
fn compress_file(path: &Path) -> Result<PathBuf, ArchiveError> {
    let target = gz_path(path);

    let mut input = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
    let output = File::create(&target).map_err(|e| ArchiveError::io(&target, e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());

    io::copy(&mut input, &mut encoder).map_err(|e| ArchiveError::io(&target, e))?;
    encoder
        .finish()
        .and_then(|mut out| out.flush())
        .map_err(|e| ArchiveError::io(&target, e))?;

    fs::remove_file(path).map_err(|e| ArchiveError::io(path, e))?;
    Ok(target)
}

/// Text archive of flows leaving the table (`.flw`)
pub struct FlowRecorder {
    file: RotatingFile,
}

impl FlowRecorder {
    /// Record into `dir`, which must already exist
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Result<Self, ArchiveError> {
        Ok(Self {
            file: RotatingFile::new(dir.into(), EXT_FLOW_TEXT, compress)?,
        })
    }

    /// Rotate after `records` flows instead of the default
    pub fn with_records_per_file(mut self, records: u64) -> Self {
        self.file.records_per_file = records.max(1);
        self
    }

    /// File currently open for writing
    pub fn current_path(&self) -> Option<&Path> {
        self.file.current_path()
    }

    /// Files closed so far, in closing order
    pub fn finished_files(&self) -> &[PathBuf] {
        &self.file.finished
    }
}

impl FlowSink for FlowRecorder {
    fn write_flow(&mut self, flow: &Flow) -> Result<(), ArchiveError> {
        let slot = self.file.next_slot(flow.last_activity_time())?;
        writeln!(slot.out, "{}", flow).map_err(|e| ArchiveError::io(&slot.path, e))
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        self.file.close()
    }
}

/// Archive of captured packets (`.pkt` or `.pkta`)
pub struct PacketRecorder {
    file: RotatingFile,
    format: PacketFormat,
}

impl PacketRecorder {
    /// Record into `dir`, which must already exist
    pub fn new(
        dir: impl Into<PathBuf>,
        format: PacketFormat,
        compress: bool,
    ) -> Result<Self, ArchiveError> {
        Ok(Self {
            file: RotatingFile::new(dir.into(), format.extension(), compress)?,
            format,
        })
    }

    /// Rotate after `records` packets instead of the default
    pub fn with_records_per_file(mut self, records: u64) -> Self {
        self.file.records_per_file = records.max(1);
        self
    }

    pub fn format(&self) -> PacketFormat {
        self.format
    }

    /// File currently open for writing
    pub fn current_path(&self) -> Option<&Path> {
        self.file.current_path()
    }

    /// Files closed so far, in closing order
    pub fn finished_files(&self) -> &[PathBuf] {
        &self.file.finished
    }
}

impl PacketSink for PacketRecorder {
    fn write_packet(&mut self, packet: &PacketRecord) -> Result<(), ArchiveError> {
        let format = self.format;
        let slot = self.file.next_slot(packet.arrival)?;
        let written = match format {
            PacketFormat::Binary => slot.out.write_all(&packet.to_bytes()),
            PacketFormat::Text => writeln!(slot.out, "{}", format_packet(packet)),
        };
        written.map_err(|e| ArchiveError::io(&slot.path, e))
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        self.file.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::PacketFileReader;
    use crate::types::FlowKey;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn packet(i: u32) -> PacketRecord {
        PacketRecord::new(
            FlowKey::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 4000, 80, 6),
            0x18,
            (100 + i) as u16,
            Timestamp::new(1_700_000_000 + i, i),
        )
    }

    fn read_all(path: &Path) -> Vec<PacketRecord> {
        PacketFileReader::open(path)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            PacketRecorder::new(&missing, PacketFormat::Binary, false),
            Err(ArchiveError::MissingDirectory(_))
        ));
    }

    #[test]
    fn test_rotation_splits_records_across_files() {
        let dir = TempDir::new().unwrap();
        let mut recorder = PacketRecorder::new(dir.path(), PacketFormat::Binary, false)
            .unwrap()
            .with_records_per_file(3);

        for i in 0..7 {
            recorder.write_packet(&packet(i)).unwrap();
        }
        recorder.close().unwrap();

        let files = recorder.finished_files().to_vec();
        assert_eq!(files.len(), 3);
        let counts: Vec<usize> = files.iter().map(|f| read_all(f).len()).collect();
        assert_eq!(counts, vec![3, 3, 1]);

        let sizes: Vec<u16> = files.iter().flat_map(|f| read_all(f)).map(|p| p.size).collect();
        assert_eq!(sizes, (100..107).collect::<Vec<u16>>());
        assert!(files.iter().all(|f| f.extension().unwrap() == "pkt"));
    }

    #[test]
    fn test_text_recorder_writes_parseable_lines() {
        let dir = TempDir::new().unwrap();
        let mut recorder = PacketRecorder::new(dir.path(), PacketFormat::Text, false).unwrap();
        recorder.write_packet(&packet(1)).unwrap();
        recorder.write_packet(&packet(2)).unwrap();
        let path = recorder.current_path().unwrap().to_path_buf();
        recorder.close().unwrap();

        assert_eq!(path.extension().unwrap(), "pkta");
        let back = read_all(&path);
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].to_bytes(), packet(2).to_bytes());
    }

    #[test]
    fn test_compressed_flow_archive() {
        let dir = TempDir::new().unwrap();
        let mut recorder = FlowRecorder::new(dir.path(), true).unwrap();
        recorder.write_flow(&Flow::new(&packet(1))).unwrap();
        recorder.write_flow(&Flow::new(&packet(2))).unwrap();
        recorder.close().unwrap();

        let files = recorder.finished_files();
        assert_eq!(files.len(), 1);
        assert!(files[0].to_string_lossy().ends_with(".flw.gz"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        let mut text = String::new();
        GzDecoder::new(File::open(&files[0]).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("10.0.0.1"));
    }

    #[test]
    fn test_write_after_close_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut recorder = FlowRecorder::new(dir.path(), false).unwrap();
        recorder.close().unwrap();
        assert!(matches!(
            recorder.write_flow(&Flow::new(&packet(0))),
            Err(ArchiveError::Closed)
        ));
    }

    #[test]
    fn test_existing_name_gets_a_suffix() {
        let dir = TempDir::new().unwrap();
        let mut first = PacketRecorder::new(dir.path(), PacketFormat::Binary, false).unwrap();
        first.write_packet(&packet(0)).unwrap();
        first.close().unwrap();

        let mut second = PacketRecorder::new(dir.path(), PacketFormat::Binary, false).unwrap();
        second.write_packet(&packet(0)).unwrap();
        second.close().unwrap();

        let a = &first.finished_files()[0];
        let b = &second.finished_files()[0];
        assert_ne!(a, b);
        assert!(b.file_stem().unwrap().to_string_lossy().ends_with("-1"));
    }
}
