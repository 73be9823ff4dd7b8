//! Legacy pcap container I/O.
//!
//! Reading goes through pcap-parser's streaming [`LegacyPcapReader`]; writing
//! is done by hand since the format is a fixed 24-byte header followed by
//! 16-byte record headers.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError, PcapHeader};
use tracing::{debug, warn};

use crate::error::{EditError, OpenError, RecordError, WriteError};

const READ_BUFFER: usize = 1 << 20;
/// Consecutive refills without a complete record before the tail is
/// declared truncated.
const MAX_REFILLS: usize = 4;

const MAGIC_MICROS: u32 = 0xa1b2_c3d4;
const MAGIC_NANOS: u32 = 0xa1b2_3c4d;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;

/// Container-level state, fixed for the lifetime of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHeader {
    pub snaplen: u32,
    pub link_type: i32,
    /// Record timestamp fractions are nanoseconds rather than microseconds.
    pub nanosecond: bool,
}

impl CaptureHeader {
    fn from_pcap(hdr: &PcapHeader) -> Self {
        Self {
            snaplen: hdr.snaplen,
            link_type: hdr.network.0,
            nanosecond: hdr.is_nanosecond_precision(),
        }
    }
}

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    /// 1-based position in the input file.
    pub frame: u64,
    pub ts_sec: u32,
    /// Microseconds or nanoseconds, per [`CaptureHeader::nanosecond`].
    pub ts_frac: u32,
    pub caplen: u32,
    pub origlen: u32,
    pub data: Vec<u8>,
}

// ─── Reader ───────────────────────────────────────────────────────────────────

enum Step {
    Record(usize, PacketRecord),
    Skip(usize),
    Refill,
    End,
    Fail(String),
}

/// Lazy, single-pass iterator over the records of a legacy pcap file.
pub struct CaptureReader {
    reader: LegacyPcapReader<BufReader<File>>,
    header: CaptureHeader,
    frame: u64,
    finished: bool,
}

impl CaptureReader {
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        let format_err = |reason: String| OpenError::Format {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|source| OpenError::Input {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = LegacyPcapReader::new(READ_BUFFER, BufReader::new(file))
            .map_err(|e| format_err(format!("{:?}", e)))?;

        let (offset, hdr) = match reader.next() {
            Ok((offset, PcapBlockOwned::LegacyHeader(hdr))) => (offset, hdr),
            Ok(_) => return Err(format_err("missing global header".into())),
            Err(e) => return Err(format_err(format!("{:?}", e))),
        };
        reader.consume(offset);

        if hdr.version_major != VERSION_MAJOR {
            return Err(format_err(format!(
                "unsupported version {}.{}",
                hdr.version_major, hdr.version_minor
            )));
        }
        let header = CaptureHeader::from_pcap(&hdr);
        debug!(
            "pcap header: snaplen={} linktype={} nanosecond={}",
            header.snaplen, header.link_type, header.nanosecond
        );

        Ok(Self {
            reader,
            header,
            frame: 0,
            finished: false,
        })
    }

    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    fn step(&mut self) -> Step {
        match self.reader.next() {
            Ok((offset, PcapBlockOwned::Legacy(pkt))) => Step::Record(
                offset,
                PacketRecord {
                    frame: self.frame + 1,
                    ts_sec: pkt.ts_sec,
                    ts_frac: pkt.ts_usec,
                    caplen: pkt.caplen,
                    origlen: pkt.origlen,
                    data: pkt.data.to_vec(),
                },
            ),
            Ok((offset, PcapBlockOwned::LegacyHeader(_))) => {
                warn!("unexpected second pcap header, ignoring");
                Step::Skip(offset)
            }
            Ok((offset, PcapBlockOwned::NG(_))) => {
                warn!("frame {}: skipping pcapng block, only legacy pcap is read", self.frame + 1);
                Step::Skip(offset)
            }
            Err(PcapError::Eof) => Step::End,
            Err(PcapError::Incomplete { .. }) => Step::Refill,
            Err(e) => Step::Fail(format!("{:?}", e)),
        }
    }

    /// Reject records that claim more captured bytes than the wire carried,
    /// and clip records longer than the snapshot length, as a capture with
    /// that limit would have stored them.
    fn check_lengths(&self, mut record: PacketRecord) -> Result<PacketRecord, RecordError> {
        if record.caplen > record.origlen {
            return Err(RecordError::Oversized {
                frame: record.frame,
                caplen: record.caplen,
                limit_name: "original length",
                limit: record.origlen,
            });
        }
        let snaplen = self.header.snaplen;
        if snaplen != 0 && record.caplen > snaplen {
            warn!(
                "frame {}: captured length {} exceeds snapshot length {}, clipping",
                record.frame, record.caplen, snaplen
            );
            record.data.truncate(snaplen as usize);
            record.caplen = snaplen;
        }
        Ok(record)
    }
}

impl Iterator for CaptureReader {
    type Item = Result<PacketRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut refills = 0;
        loop {
            match self.step() {
                Step::Record(offset, record) => {
                    self.reader.consume(offset);
                    self.frame = record.frame;
                    return Some(self.check_lengths(record));
                }
                Step::Skip(offset) => self.reader.consume(offset),
                Step::End => {
                    self.finished = true;
                    return None;
                }
                Step::Refill => {
                    if refills == MAX_REFILLS {
                        self.finished = true;
                        return Some(Err(RecordError::Truncated { frame: self.frame + 1 }));
                    }
                    refills += 1;
                    if let Err(e) = self.reader.refill() {
                        self.finished = true;
                        return Some(Err(RecordError::Malformed {
                            frame: self.frame + 1,
                            reason: format!("refill error: {:?}", e),
                        }));
                    }
                }
                Step::Fail(reason) => {
                    self.finished = true;
                    return Some(Err(RecordError::Malformed {
                        frame: self.frame + 1,
                        reason,
                    }));
                }
            }
        }
    }
}

// ─── Writer ───────────────────────────────────────────────────────────────────

/// Sequential little-endian pcap writer.
pub struct CaptureWriter {
    out: BufWriter<File>,
    path: PathBuf,
    written: u64,
}

impl CaptureWriter {
    /// Create `path` and write the global header for `header`.
    pub fn create(path: &Path, header: &CaptureHeader) -> Result<Self, EditError> {
        let file = File::create(path).map_err(|source| OpenError::Output {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            written: 0,
        };
        writer.write_global_header(header).map_err(|e| writer.io_error(e))?;
        Ok(writer)
    }

    fn write_global_header(&mut self, hdr: &CaptureHeader) -> std::io::Result<()> {
        let magic = if hdr.nanosecond { MAGIC_NANOS } else { MAGIC_MICROS };
        self.out.write_all(&magic.to_le_bytes())?;
        self.out.write_all(&VERSION_MAJOR.to_le_bytes())?;
        self.out.write_all(&VERSION_MINOR.to_le_bytes())?;
        self.out.write_all(&0i32.to_le_bytes())?;
        self.out.write_all(&0u32.to_le_bytes())?;
        self.out.write_all(&hdr.snaplen.to_le_bytes())?;
        self.out.write_all(&(hdr.link_type as u32).to_le_bytes())?;
        Ok(())
    }

    /// Append one record. The captured length is taken from the data itself.
    pub fn write(&mut self, record: &PacketRecord) -> Result<(), WriteError> {
        self.write_record(record).map_err(|e| self.io_error(e))?;
        self.written += 1;
        Ok(())
    }

    fn write_record(&mut self, record: &PacketRecord) -> std::io::Result<()> {
        let caplen = record.data.len() as u32;
        self.out.write_all(&record.ts_sec.to_le_bytes())?;
        self.out.write_all(&record.ts_frac.to_le_bytes())?;
        self.out.write_all(&caplen.to_le_bytes())?;
        self.out.write_all(&record.origlen.max(caplen).to_le_bytes())?;
        self.out.write_all(&record.data)?;
        Ok(())
    }

    /// Flush buffered output and return the number of records written.
    pub fn finish(mut self) -> Result<u64, WriteError> {
        self.out.flush().map_err(|e| self.io_error(e))?;
        Ok(self.written)
    }

    fn io_error(&self, source: std::io::Error) -> WriteError {
        WriteError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
