//! Flatten TCP/UDP-over-IPv4 packets into CSV rows.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::capture::PacketRecord;
use crate::decode::DecodedPacket;
use crate::error::{EditError, OpenError, WriteError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub timestamp: String,
    pub src: String,
    pub dst: String,
    pub protocol: u8,
    pub ttl: u8,
    pub flags: String,
    pub sport: u16,
    pub dport: u16,
    pub payload: String,
}

impl ExportRow {
    /// `None` unless the packet carries IPv4 and a TCP or UDP header.
    pub fn from_packet(record: &PacketRecord, packet: &DecodedPacket<'_>, nanosecond: bool) -> Option<Self> {
        let ip = packet.ipv4()?;
        let transport = packet.transport()?;
        let timestamp = if nanosecond {
            format!("{}.{:09}", record.ts_sec, record.ts_frac)
        } else {
            format!("{}.{:06}", record.ts_sec, record.ts_frac)
        };
        Some(Self {
            timestamp,
            src: ip.src().to_string(),
            dst: ip.dst().to_string(),
            protocol: ip.protocol(),
            ttl: ip.ttl(),
            flags: ip.flags().to_string(),
            sport: transport.src_port(),
            dport: transport.dst_port(),
            payload: String::from_utf8_lossy(packet.application()?).into_owned(),
        })
    }
}

pub struct CsvExporter {
    wtr: csv::Writer<File>,
    path: PathBuf,
    rows: u64,
}

impl CsvExporter {
    /// Create `path`; with `header` the first line names the columns.
    pub fn create(path: &Path, header: bool) -> Result<Self, EditError> {
        let file = File::create(path).map_err(|source| OpenError::Output {
            path: path.to_path_buf(),
            source,
        })?;
        let wtr = csv::WriterBuilder::new().has_headers(header).from_writer(file);
        Ok(Self {
            wtr,
            path: path.to_path_buf(),
            rows: 0,
        })
    }

    pub fn write(&mut self, row: &ExportRow) -> Result<(), WriteError> {
        self.wtr.serialize(row).map_err(|source| WriteError::Csv {
            path: self.path.clone(),
            source,
        })?;
        self.rows += 1;
        Ok(())
    }

    /// Flush and return the number of rows written.
    pub fn finish(mut self) -> Result<u64, WriteError> {
        self.wtr.flush().map_err(|source| WriteError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.rows)
    }
}
