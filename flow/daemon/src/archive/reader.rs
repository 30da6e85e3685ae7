//! Streaming reader for packet archives
//!
//! Handles binary `.pkt`, text `.pkta`/`.txt`, and the gzipped form of
//! each. The format is picked from the file name.

use crate::error::ArchiveError;
use crate::record::parse_packet;
use crate::types::PacketRecord;
use bytes::BytesMut;
use flate2::read::GzDecoder;
use flow_common::constants::{
    EXT_GZIP, EXT_PACKET_BINARY, EXT_PACKET_PLAIN, EXT_PACKET_TEXT, PACKET_RECORD_SIZE,
};
use log::debug;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Binary,
    Text,
}

/// Encoding and compression implied by a file name
fn classify(path: &Path) -> Option<(Encoding, bool)> {
    let name = path.file_name()?.to_str()?;
    let (name, compressed) = match name.strip_suffix(EXT_GZIP).and_then(|n| n.strip_suffix('.')) {
        Some(inner) => (inner, true),
        None => (name, false),
    };
    let (_, extension) = name.rsplit_once('.')?;

    let encoding = match extension {
        EXT_PACKET_BINARY => Encoding::Binary,
        EXT_PACKET_TEXT | EXT_PACKET_PLAIN => Encoding::Text,
        _ => return None,
    };
    Some((encoding, compressed))
}

/// True when `path` names a readable packet archive
pub fn is_packet_archive(path: &Path) -> bool {
    classify(path).is_some()
}

/// Packet archives directly inside `dir`, sorted by file name
pub fn list_packet_files(dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    if !dir.is_dir() {
        return Err(ArchiveError::MissingDirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ArchiveError::io(dir, e))? {
        let path = entry.map_err(|e| ArchiveError::io(dir, e))?.path();
        if path.is_file() && is_packet_archive(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

enum Frames {
    Binary {
        input: Box<dyn Read + Send>,
        buffer: BytesMut,
        scratch: Vec<u8>,
        eof: bool,
    },
    Text {
        lines: io::Lines<Box<dyn BufRead + Send>>,
        line: usize,
    },
}

/// Iterator over the records of one archive file
pub struct PacketFileReader {
    path: PathBuf,
    frames: Frames,
    done: bool,
}

impl PacketFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let (encoding, compressed) =
            classify(&path).ok_or_else(|| ArchiveError::UnsupportedFile(path.clone()))?;

        let file = File::open(&path).map_err(|e| ArchiveError::io(&path, e))?;
        let input: Box<dyn Read + Send> = if compressed {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(file)
        };
        debug!("Reading {:?} ({:?}, compressed: {})", path, encoding, compressed);

        let frames = match encoding {
            Encoding::Binary => Frames::Binary {
                input,
                buffer: BytesMut::with_capacity(READ_CHUNK),
                scratch: vec![0; READ_CHUNK],
                eof: false,
            },
            Encoding::Text => {
                let reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(input));
                Frames::Text {
                    lines: reader.lines(),
                    line: 0,
                }
            }
        };

        Ok(Self {
            path,
            frames,
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn next_binary(&mut self) -> Option<Result<PacketRecord, ArchiveError>> {
        let Frames::Binary {
            input,
            buffer,
            scratch,
            eof,
        } = &mut self.frames
        else {
            return None;
        };

        loop {
            if buffer.len() >= PACKET_RECORD_SIZE {
                let frame = buffer.split_to(PACKET_RECORD_SIZE);
                let mut raw = [0u8; PACKET_RECORD_SIZE];
                raw.copy_from_slice(&frame);
                return Some(Ok(PacketRecord::from_bytes(&raw)));
            }
            if *eof {
                if buffer.is_empty() {
                    return None;
                }
                let len = buffer.len();
                buffer.clear();
                return Some(Err(ArchiveError::Truncated {
                    path: self.path.clone(),
                    len,
                }));
            }

            match input.read(scratch) {
                Ok(0) => *eof = true,
                Ok(n) => buffer.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Some(Err(ArchiveError::io(&self.path, e))),
            }
        }
    }

    fn next_text(&mut self) -> Option<Result<PacketRecord, ArchiveError>> {
        let Frames::Text { lines, line } = &mut self.frames else {
            return None;
        };

        for text in lines.by_ref() {
            *line += 1;
            let text = match text {
                Ok(text) => text,
                Err(e) => return Some(Err(ArchiveError::io(&self.path, e))),
            };
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Some(parse_packet(&text).map_err(|source| ArchiveError::Parse {
                path: self.path.clone(),
                line: *line,
                source,
            }));
        }
        None
    }
}

impl Iterator for PacketFileReader {
    type Item = Result<PacketRecord, ArchiveError>;

    /// Stops after the first error
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = match self.frames {
            Frames::Binary { .. } => self.next_binary(),
            Frames::Text { .. } => self.next_text(),
        };
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::format_packet;
    use crate::types::{FlowKey, Timestamp};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn packet(i: u32) -> PacketRecord {
        PacketRecord::new(
            FlowKey::new(Ipv4Addr::new(172, 16, 0, 1), Ipv4Addr::new(8, 8, 8, 8), 53000, 53, 17),
            0,
            64,
            Timestamp::new(1000 + i, 250 * i),
        )
    }

    #[test]
    fn test_classify_by_name() {
        assert_eq!(classify(Path::new("a/b.pkt")), Some((Encoding::Binary, false)));
        assert_eq!(classify(Path::new("b.pkta.gz")), Some((Encoding::Text, true)));
        assert_eq!(classify(Path::new("b.txt")), Some((Encoding::Text, false)));
        assert_eq!(classify(Path::new("b.flw")), None);
        assert_eq!(classify(Path::new("gz")), None);
        assert!(!is_packet_archive(Path::new("notes.gz")));
    }

    #[test]
    fn test_gzipped_binary_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace.pkt.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::fast());
        for i in 0..1000 {
            encoder.write_all(&packet(i).to_bytes()).unwrap();
        }
        encoder.finish().unwrap();

        let records: Vec<PacketRecord> = PacketFileReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1000);
        assert_eq!(records[999].arrival, Timestamp::new(1999, 249_750));
    }

    #[test]
    fn test_partial_trailing_record_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cut.pkt");
        let mut bytes = packet(1).to_bytes().to_vec();
        bytes.extend_from_slice(&packet(2).to_bytes()[..10]);
        fs::write(&path, bytes).unwrap();

        let mut reader = PacketFileReader::open(&path).unwrap();
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(
            reader.next(),
            Some(Err(ArchiveError::Truncated { len: 10, .. }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_text_skips_blank_and_comment_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trace.txt");
        let body = format!(
            "# capture\n{}\n\n{}\n",
            format_packet(&packet(1)),
            format_packet(&packet(2))
        );
        fs::write(&path, body).unwrap();

        let records: Vec<PacketRecord> = PacketFileReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].to_bytes(), packet(1).to_bytes());
    }

    #[test]
    fn test_text_parse_error_names_the_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.pkta");
        fs::write(&path, format!("{}\nnot a packet\n", format_packet(&packet(1)))).unwrap();

        let results: Vec<_> = PacketFileReader::open(&path).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(ArchiveError::Parse { line: 2, .. })));
    }

    #[test]
    fn test_list_packet_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in ["b.pkt", "a.pkta.gz", "c.flw", "d.log"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = list_packet_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.pkta.gz", "b.pkt"]);
    }

    #[test]
    fn test_unsupported_file() {
        assert!(matches!(
            PacketFileReader::open("flows.flw"),
            Err(ArchiveError::UnsupportedFile(_))
        ));
    }
}
