//! DNS query-name masking.
//!
//! A masked packet changes length, so every enclosing layer is rebuilt in
//! order: DNS message, UDP header and checksum, IPv4 header and checksum,
//! then the frame itself and its record lengths.

use std::net::Ipv4Addr;

use crate::capture::PacketRecord;
use crate::checksum::{internet_checksum, ipv4_transport_checksum, IPPROTO_UDP};
use crate::decode::{DecodedPacket, Transport, UDP_HEADER_LEN};
use crate::error::MutationError;

pub const DEFAULT_REPLACEMENT: &str = "masked.invalid";

pub struct DnsMasker {
    needle: Vec<u8>,
    replacement: Vec<u8>,
    snaplen: u32,
}

impl DnsMasker {
    pub fn new(needle: &str, replacement: &str) -> Self {
        Self {
            needle: needle.as_bytes().to_vec(),
            replacement: replacement.as_bytes().to_vec(),
            snaplen: 0,
        }
    }

    /// Truncate rewritten frames to `snaplen` bytes (0 disables).
    pub fn with_snaplen(mut self, snaplen: u32) -> Self {
        self.snaplen = snaplen;
        self
    }

    /// Mask the first question name of a DNS packet.
    ///
    /// Returns `Ok(None)` when the packet should be forwarded unchanged.
    pub fn apply(
        &self,
        record: &PacketRecord,
        packet: &DecodedPacket<'_>,
    ) -> Result<Option<PacketRecord>, MutationError> {
        let Some(mut msg) = packet.dns() else {
            return Ok(None);
        };
        let Some(question) = msg.questions.first_mut() else {
            return Ok(None);
        };
        let Some(masked) = question.name.replace_first(&self.needle, &self.replacement) else {
            return Ok(None);
        };
        let (Some(eth), Some(ip), Some(Transport::Udp(udp))) =
            (packet.ethernet(), packet.ipv4(), packet.transport())
        else {
            return Ok(None);
        };

        question.name = masked?;
        let dns = msg.encode()?;
        let datagram = build_udp(udp.src_port(), udp.dst_port(), ip.src(), ip.dst(), &dns)?;
        let ip_header = build_ipv4_header(ip.header(), datagram.len())?;

        let mut data = Vec::with_capacity(eth.header().len() + ip_header.len() + datagram.len());
        data.extend_from_slice(eth.header());
        data.extend_from_slice(&ip_header);
        data.extend_from_slice(&datagram);

        let full_len = data.len() as u64;
        let grown = record.origlen as i64 + data.len() as i64 - record.data.len() as i64;
        let origlen = u32::try_from(grown.max(full_len as i64)).unwrap_or(u32::MAX);
        if self.snaplen != 0 && data.len() > self.snaplen as usize {
            data.truncate(self.snaplen as usize);
        }

        Ok(Some(PacketRecord {
            frame: record.frame,
            ts_sec: record.ts_sec,
            ts_frac: record.ts_frac,
            caplen: data.len() as u32,
            origlen,
            data,
        }))
    }
}

fn u16_len(layer: &'static str, len: usize) -> Result<u16, MutationError> {
    u16::try_from(len).map_err(|_| MutationError::LengthOverflow { layer, len })
}

fn build_udp(
    sport: u16,
    dport: u16,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    payload: &[u8],
) -> Result<Vec<u8>, MutationError> {
    let length = u16_len("UDP", UDP_HEADER_LEN + payload.len())?;
    let mut out = Vec::with_capacity(length as usize);
    out.extend_from_slice(&sport.to_be_bytes());
    out.extend_from_slice(&dport.to_be_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(payload);

    let csum = match ipv4_transport_checksum(src, dst, IPPROTO_UDP, &out) {
        0 => 0xffff,
        c => c,
    };
    out[6..8].copy_from_slice(&csum.to_be_bytes());
    Ok(out)
}

/// Copy an IPv4 header (options included) with a new total length and a
/// fresh header checksum.
fn build_ipv4_header(header: &[u8], payload_len: usize) -> Result<Vec<u8>, MutationError> {
    let total = u16_len("IPv4", header.len() + payload_len)?;
    let mut out = header.to_vec();
    out[2..4].copy_from_slice(&total.to_be_bytes());
    out[10..12].copy_from_slice(&[0, 0]);
    let csum = internet_checksum(&out);
    out[10..12].copy_from_slice(&csum.to_be_bytes());
    Ok(out)
}
