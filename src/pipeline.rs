//! Drive one edit run: read, decode, filter or mutate, then write.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capture::{CaptureHeader, CaptureReader, CaptureWriter, PacketRecord};
use crate::config::Mode;
use crate::decode::DecodedPacket;
use crate::error::{EditError, RecordError};
use crate::export::{CsvExporter, ExportRow};
use crate::filter::{FilterRule, Verdict};
use crate::rewrite::DnsMasker;

#[derive(Debug, Clone)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
    pub mode: Mode,
    /// Output snapshot length; the input's when `None`.
    pub snaplen: Option<u32>,
    /// Text substituted for the needle under [`FilterRule::DnsMask`].
    pub replacement: String,
}

// ─── Stats ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total_packets: u64,
    pub packets_written: u64,
    pub packets_dropped: u64,
    pub packets_rewritten: u64,
    pub non_ipv4_passed: u64,
    pub record_errors: u64,
    pub rows_exported: u64,
}

impl RunStats {
    fn record_error(&mut self, err: &RecordError) {
        warn!("{}", err);
        self.record_errors += 1;
    }
}

/// Execute `job` to completion. Per-record problems are logged and counted;
/// anything returned as `Err` aborts the run.
pub fn run(job: &Job) -> Result<RunStats, EditError> {
    info!("Opening {:?}", job.input);
    let reader = CaptureReader::open(&job.input)?;
    let mut stats = RunStats::default();

    match &job.mode {
        Mode::Export { header } => export(reader, job, *header, &mut stats)?,
        Mode::Copy => {
            info!("No rule selected, copying records unchanged");
            edit(reader, job, None, &mut stats)?
        }
        Mode::Apply(rule) => {
            info!("Rule: {}", rule);
            edit(reader, job, Some(rule), &mut stats)?
        }
    }

    info!(
        "Done: {} read, {} written, {} dropped, {} rewritten, {} record errors",
        stats.total_packets,
        stats.packets_written,
        stats.packets_dropped,
        stats.packets_rewritten,
        stats.record_errors
    );
    Ok(stats)
}

/// Cut a record down to `snaplen` bytes, as a capture with that limit would
/// have stored it.
fn clip(mut record: PacketRecord, snaplen: u32) -> PacketRecord {
    if snaplen != 0 && record.data.len() > snaplen as usize {
        record.data.truncate(snaplen as usize);
        record.caplen = snaplen;
    }
    record
}

fn edit(
    reader: CaptureReader,
    job: &Job,
    rule: Option<&FilterRule>,
    stats: &mut RunStats,
) -> Result<(), EditError> {
    let input: CaptureHeader = *reader.header();
    let header = CaptureHeader {
        snaplen: job.snaplen.unwrap_or(input.snaplen),
        ..input
    };
    info!("Writing {:?}", job.output);
    let mut writer = CaptureWriter::create(&job.output, &header)?;
    let masker = match rule {
        Some(FilterRule::DnsMask { needle }) => {
            Some(DnsMasker::new(needle, &job.replacement).with_snaplen(header.snaplen))
        }
        _ => None,
    };

    for item in reader {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                stats.record_error(&e);
                continue;
            }
        };

        let Some(rule) = rule else {
            stats.total_packets += 1;
            writer.write(&clip(record, header.snaplen))?;
            continue;
        };

        let packet = match DecodedPacket::decode(&record.data, input.link_type, record.frame) {
            Ok(packet) => packet,
            Err(e) => {
                stats.record_error(&e);
                continue;
            }
        };
        stats.total_packets += 1;
        if packet.ipv4().is_none() {
            stats.non_ipv4_passed += 1;
        }

        if rule.verdict(&packet) == Verdict::Drop {
            debug!("frame {}: dropped", record.frame);
            stats.packets_dropped += 1;
            continue;
        }

        let rewritten = match &masker {
            Some(masker) => masker
                .apply(&record, &packet)
                .map_err(|source| EditError::Mutation {
                    frame: record.frame,
                    source,
                })?,
            None => None,
        };
        match rewritten {
            Some(masked) => {
                debug!(
                    "frame {}: DNS name masked ({} → {} bytes)",
                    record.frame,
                    record.data.len(),
                    masked.data.len()
                );
                stats.packets_rewritten += 1;
                writer.write(&masked)?;
            }
            None => writer.write(&clip(record, header.snaplen))?,
        }
    }

    stats.packets_written = writer.finish()?;
    Ok(())
}

fn export(
    reader: CaptureReader,
    job: &Job,
    header: bool,
    stats: &mut RunStats,
) -> Result<(), EditError> {
    let input = *reader.header();
    info!("Exporting CSV to {:?}", job.output);
    let mut exporter = CsvExporter::create(&job.output, header)?;

    for item in reader {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                stats.record_error(&e);
                continue;
            }
        };
        let packet = match DecodedPacket::decode(&record.data, input.link_type, record.frame) {
            Ok(packet) => packet,
            Err(e) => {
                stats.record_error(&e);
                continue;
            }
        };
        stats.total_packets += 1;
        match ExportRow::from_packet(&record, &packet, input.nanosecond) {
            Some(row) => exporter.write(&row)?,
            None => debug!("frame {}: no IPv4 TCP/UDP layers, not exported", record.frame),
        }
    }

    stats.rows_exported = exporter.finish()?;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::path::Path;

    use crate::capture::tests::{read_all, write_capture};
    use crate::checksum::udp_checksum_valid;
    use crate::decode::tests::{arp_frame, tcp_frame, udp_frame};
    use crate::decode::LINKTYPE_ETHERNET;
    use crate::dns::tests::query_bytes;
    use crate::error::MutationError;
    use crate::rewrite::DEFAULT_REPLACEMENT;

    fn job(input: &Path, output: &Path, mode: Mode) -> Job {
        Job {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            mode,
            snaplen: None,
            replacement: DEFAULT_REPLACEMENT.to_string(),
        }
    }

    fn apply(rule: FilterRule) -> Mode {
        Mode::Apply(rule)
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn frames_of(path: &Path) -> Vec<Vec<u8>> {
        read_all(path).1.into_iter().map(|r| r.unwrap().data).collect()
    }

    fn mixed_traffic() -> Vec<Vec<u8>> {
        vec![
            tcp_frame("10.0.0.1", 443, "10.0.0.2", 51000, 64, b"one"),
            tcp_frame("10.0.0.2", 51000, "10.0.0.1", 443, 64, b"two"),
            tcp_frame("10.0.0.3", 22, "10.0.0.4", 40000, 64, b"three"),
            arp_frame(),
            tcp_frame("10.0.0.1", 443, "10.0.0.3", 51001, 64, b"four"),
        ]
    }

    #[test]
    fn source_only_drops_both_directions_and_keeps_arp() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.pcap"), dir.path().join("out.pcap"));
        let frames = mixed_traffic();
        write_capture(&input, &frames);

        let stats = run(&job(&input, &output, apply(FilterRule::SourceOnly(ip("10.0.0.1"))))).unwrap();
        assert_eq!(stats.total_packets, 5);
        assert_eq!(stats.packets_dropped, 3);
        assert_eq!(stats.packets_written, 2);
        assert_eq!(stats.non_ipv4_passed, 1);
        assert_eq!(frames_of(&output), vec![frames[2].clone(), frames[3].clone()]);
    }

    #[test]
    fn exact_pair_leaves_the_rest_untouched_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pcap");
        let once = dir.path().join("once.pcap");
        let twice = dir.path().join("twice.pcap");
        let frames = mixed_traffic();
        write_capture(&input, &frames);
        let rule = FilterRule::ExactPair { a: ip("10.0.0.2"), b: ip("10.0.0.1") };

        let stats = run(&job(&input, &once, apply(rule.clone()))).unwrap();
        assert_eq!(stats.packets_dropped, 2);
        assert_eq!(frames_of(&once), frames[2..].to_vec());

        let again = run(&job(&once, &twice, apply(rule))).unwrap();
        assert_eq!(again.packets_dropped, 0);
        assert_eq!(std::fs::read(&once).unwrap(), std::fs::read(&twice).unwrap());
    }

    #[test]
    fn exclude_destination_keeps_only_the_allowed_peer() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.pcap"), dir.path().join("out.pcap"));
        let frames = mixed_traffic();
        write_capture(&input, &frames);

        let rule = FilterRule::ExcludeDestination { source: ip("10.0.0.1"), keep: ip("10.0.0.2") };
        let stats = run(&job(&input, &output, apply(rule))).unwrap();
        assert_eq!(stats.packets_dropped, 1);
        assert_eq!(frames_of(&output), frames[..4].to_vec());
    }

    #[test]
    fn dns_mask_preserves_count_and_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.pcap"), dir.path().join("out.pcap"));
        let frames = vec![
            udp_frame("10.0.0.5", 40000, "10.0.0.53", 53, &query_bytes(1, "secret.corp.example.com")),
            tcp_frame("10.0.0.5", 40001, "10.0.0.80", 80, 64, b"secret"),
            udp_frame("10.0.0.5", 40002, "10.0.0.53", 53, &query_bytes(2, "www.example.com")),
            arp_frame(),
        ];
        write_capture(&input, &frames);

        let rule = FilterRule::DnsMask { needle: "secret".into() };
        let stats = run(&job(&input, &output, apply(rule))).unwrap();
        assert_eq!(stats.total_packets, 4);
        assert_eq!(stats.packets_written, 4);
        assert_eq!(stats.packets_rewritten, 1);

        let out = frames_of(&output);
        assert_eq!(&out[1..], &frames[1..]);
        let pkt = DecodedPacket::decode(&out[0], LINKTYPE_ETHERNET, 1).unwrap();
        let ip4 = pkt.ipv4().unwrap();
        assert!(udp_checksum_valid(ip4.src(), ip4.dst(), ip4.payload()));
        let name = pkt.dns().unwrap().first_question_name().unwrap().to_string();
        assert_eq!(name, "masked.invalid.corp.example.com");
        assert!(!name.starts_with("secret"));
    }

    #[test]
    fn unencodable_mask_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.pcap"), dir.path().join("out.pcap"));
        write_capture(&input, &[udp_frame("10.0.0.5", 40000, "10.0.0.53", 53, &query_bytes(1, "secret.example.com"))]);

        let mut j = job(&input, &output, apply(FilterRule::DnsMask { needle: "secret".into() }));
        j.replacement = "x".repeat(64);
        match run(&j) {
            Err(EditError::Mutation { frame: 1, source: MutationError::LabelTooLong { len: 64, .. } }) => {}
            other => panic!("expected mutation error, got {:?}", other),
        }
    }

    #[test]
    fn export_writes_one_row_for_tcp_and_none_for_arp() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.pcap"), dir.path().join("out.csv"));
        write_capture(&input, &[tcp_frame("10.0.0.1", 443, "10.0.0.2", 51000, 64, b"hello"), arp_frame()]);

        let stats = run(&job(&input, &output, Mode::Export { header: false })).unwrap();
        assert_eq!(stats.total_packets, 2);
        assert_eq!(stats.rows_exported, 1);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "1700000001.250000,10.0.0.1,10.0.0.2,6,64,DF,443,51000,hello\n"
        );
    }

    #[test]
    fn empty_capture_gives_empty_valid_output() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.pcap"), dir.path().join("out.pcap"));
        write_capture(&input, &[]);

        let stats = run(&job(&input, &output, apply(FilterRule::SourceOnly(ip("10.0.0.1"))))).unwrap();
        assert_eq!(stats, RunStats::default());
        let (header, records) = read_all(&output);
        assert_eq!(header.link_type, LINKTYPE_ETHERNET);
        assert!(records.is_empty());

        let csv = dir.path().join("out.csv");
        run(&job(&input, &csv, Mode::Export { header: false })).unwrap();
        assert_eq!(std::fs::read(&csv).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn truncated_trailing_record_is_counted_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.pcap"), dir.path().join("out.pcap"));
        let good = tcp_frame("10.0.0.3", 22, "10.0.0.4", 40000, 64, b"ok");
        write_capture(&input, &[good.clone(), tcp_frame("10.0.0.3", 22, "10.0.0.4", 40000, 64, b"cut")]);
        let bytes = std::fs::read(&input).unwrap();
        std::fs::write(&input, &bytes[..bytes.len() - 20]).unwrap();

        let stats = run(&job(&input, &output, apply(FilterRule::SourceOnly(ip("10.0.0.1"))))).unwrap();
        assert_eq!(stats.packets_written, 1);
        assert_eq!(stats.record_errors, 1);
        assert_eq!(frames_of(&output), vec![good]);
    }

    #[test]
    fn short_frame_is_a_record_error() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.pcap"), dir.path().join("out.pcap"));
        write_capture(&input, &[vec![0u8; 10], arp_frame()]);

        let stats = run(&job(&input, &output, apply(FilterRule::SourceOnly(ip("10.0.0.1"))))).unwrap();
        assert_eq!(stats.record_errors, 1);
        assert_eq!(stats.packets_written, 1);
    }

    #[test]
    fn copy_mode_reproduces_the_input() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.pcap"), dir.path().join("out.pcap"));
        write_capture(&input, &mixed_traffic());

        let stats = run(&job(&input, &output, Mode::Copy)).unwrap();
        assert_eq!(stats.packets_written, 5);
        assert_eq!(std::fs::read(&input).unwrap(), std::fs::read(&output).unwrap());
    }

    #[test]
    fn snaplen_override_clips_forwarded_records() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.pcap"), dir.path().join("out.pcap"));
        let frame = tcp_frame("10.0.0.3", 22, "10.0.0.4", 40000, 64, &[b'z'; 100]);
        write_capture(&input, &[frame.clone()]);

        let mut j = job(&input, &output, Mode::Copy);
        j.snaplen = Some(64);
        run(&j).unwrap();
        let (header, records) = read_all(&output);
        assert_eq!(header.snaplen, 64);
        let rec = records[0].as_ref().unwrap();
        assert_eq!(rec.data, frame[..64].to_vec());
        assert_eq!(rec.origlen as usize, frame.len());
    }

    #[test]
    fn non_ethernet_link_type_is_echoed() {
        let dir = tempfile::tempdir().unwrap();
        let (input, output) = (dir.path().join("in.pcap"), dir.path().join("out.pcap"));
        let raw_ip = CaptureHeader { snaplen: 65535, link_type: 101, nanosecond: false };
        let frame = tcp_frame("10.0.0.1", 1, "10.0.0.2", 2, 64, b"")[14..].to_vec();
        let mut w = CaptureWriter::create(&input, &raw_ip).unwrap();
        w.write(&crate::capture::tests::record(1, frame.clone())).unwrap();
        w.finish().unwrap();

        let stats = run(&job(&input, &output, apply(FilterRule::SourceOnly(ip("10.0.0.1"))))).unwrap();
        assert_eq!(stats.non_ipv4_passed, 1);
        let (header, records) = read_all(&output);
        assert_eq!(header.link_type, 101);
        assert_eq!(records[0].as_ref().unwrap().data, frame);
    }

    #[test]
    fn missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&job(&dir.path().join("missing.pcap"), &dir.path().join("o.pcap"), Mode::Copy)).unwrap_err();
        assert!(matches!(err, EditError::Open(_)));
    }
}
