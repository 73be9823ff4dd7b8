//! DNS message codec.
//!
//! Parsing follows compression pointers so every name is held in full;
//! encoding always writes names uncompressed. A message that went through
//! [`DnsMessage::parse`] and [`DnsMessage::encode`] is therefore
//! self-consistent no matter how its names were edited in between.

use std::fmt;

use thiserror::Error;

use crate::error::MutationError;

pub const HEADER_LEN: usize = 12;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_HOPS: usize = 64;

const TYPE_NS: u16 = 2;
const TYPE_CNAME: u16 = 5;
const TYPE_SOA: u16 = 6;
const TYPE_PTR: u16 = 12;
const TYPE_MX: u16 = 15;
const TYPE_SRV: u16 = 33;

/// Why a payload is not a DNS message.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DnsError {
    #[error("message truncated at offset {offset}")]
    Truncated { offset: usize },

    #[error("reserved label type {byte:#04x} at offset {offset}")]
    BadLabel { byte: u8, offset: usize },

    #[error("compression pointers loop")]
    PointerLoop,

    #[error("name longer than 255 bytes")]
    NameTooLong,
}

// ─── Names ────────────────────────────────────────────────────────────────────

/// A domain name as a list of raw labels. The root name has no labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsName {
    labels: Vec<Vec<u8>>,
}

impl DnsName {
    /// Build a name from raw labels, validating label and name lengths.
    pub fn from_labels(labels: Vec<Vec<u8>>) -> Result<Self, MutationError> {
        for label in &labels {
            if label.is_empty() {
                return Err(MutationError::EmptyLabel {
                    name: String::from_utf8_lossy(&labels.join(&b'.')).into_owned(),
                });
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(MutationError::LabelTooLong {
                    label: String::from_utf8_lossy(label).into_owned(),
                    len: label.len(),
                });
            }
        }
        let name = Self { labels };
        if name.wire_len() > MAX_NAME_LEN {
            return Err(MutationError::NameTooLong { len: name.wire_len() });
        }
        Ok(name)
    }

    /// Replace the first occurrence of `needle` in the dotted form.
    ///
    /// Only the labels the match touches are rebuilt and re-split on dots;
    /// every other label keeps its raw bytes, including any embedded 0x2e.
    /// `None` when the needle does not occur.
    pub fn replace_first(&self, needle: &[u8], replacement: &[u8]) -> Option<Result<Self, MutationError>> {
        let text = self.text();
        if needle.is_empty() || text.len() < needle.len() {
            return None;
        }
        let at = text.windows(needle.len()).position(|w| w == needle)?;
        let end = at + needle.len();

        let mut spans = Vec::with_capacity(self.labels.len());
        let mut off = 0;
        for label in &self.labels {
            spans.push((off, off + label.len()));
            off += label.len() + 1;
        }
        // A match starting or ending on a separator dot pulls in the label
        // on the far side of it.
        let first = spans.iter().position(|&(_, e)| e >= at)?;
        let last = spans.iter().position(|&(_, e)| e >= end)?;

        let mut segment = text[spans[first].0..at].to_vec();
        segment.extend_from_slice(replacement);
        segment.extend_from_slice(&text[end..spans[last].1]);

        let mut labels = self.labels[..first].to_vec();
        labels.extend(segment.split(|&b| b == b'.').map(<[u8]>::to_vec));
        labels.extend_from_slice(&self.labels[last + 1..]);
        Some(Self::from_labels(labels))
    }

    /// Dotted text form, without a trailing dot.
    pub fn text(&self) -> Vec<u8> {
        self.labels.join(&b'.')
    }

    /// Uncompressed wire length: one length byte per label plus the root byte.
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    fn encode(&self, out: &mut Vec<u8>) {
        for label in &self.labels {
            out.push(label.len() as u8);
            out.extend_from_slice(label);
        }
        out.push(0);
    }
}

impl fmt::Display for DnsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.text()))
    }
}

/// Read a name at `start`, following compression pointers.
/// Returns the name and the number of bytes it occupies at `start`.
fn read_name(msg: &[u8], start: usize) -> Result<(DnsName, usize), DnsError> {
    let mut labels = Vec::new();
    let mut pos = start;
    let mut consumed = None;
    let mut hops = 0;
    let mut wire_len = 1;

    loop {
        let len = *msg.get(pos).ok_or(DnsError::Truncated { offset: pos })? as usize;
        match len & 0xc0 {
            0x00 if len == 0 => {
                let consumed = consumed.unwrap_or_else(|| pos + 1 - start);
                return Ok((DnsName { labels }, consumed));
            }
            0x00 => {
                let end = pos + 1 + len;
                let label = msg
                    .get(pos + 1..end)
                    .ok_or(DnsError::Truncated { offset: pos })?;
                wire_len += 1 + len;
                if wire_len > MAX_NAME_LEN {
                    return Err(DnsError::NameTooLong);
                }
                labels.push(label.to_vec());
                pos = end;
            }
            0xc0 => {
                let low = *msg.get(pos + 1).ok_or(DnsError::Truncated { offset: pos + 1 })? as usize;
                if consumed.is_none() {
                    consumed = Some(pos + 2 - start);
                }
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(DnsError::PointerLoop);
                }
                pos = ((len & 0x3f) << 8) | low;
            }
            _ => {
                return Err(DnsError::BadLabel {
                    byte: len as u8,
                    offset: pos,
                })
            }
        }
    }
}

fn read_u16(msg: &[u8], pos: usize) -> Result<u16, DnsError> {
    msg.get(pos..pos + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(DnsError::Truncated { offset: pos })
}

fn read_u32(msg: &[u8], pos: usize) -> Result<u32, DnsError> {
    msg.get(pos..pos + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(DnsError::Truncated { offset: pos })
}

// ─── Sections ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: DnsName,
    pub qtype: u16,
    pub qclass: u16,
}

/// Record data. Types whose RDATA embeds names are decoded so the names can
/// be written back uncompressed; everything else is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    /// NS, CNAME, PTR.
    Name(DnsName),
    Mx {
        preference: u16,
        exchange: DnsName,
    },
    Soa {
        mname: DnsName,
        rname: DnsName,
        /// serial, refresh, retry, expire, minimum
        timers: [u32; 5],
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: DnsName,
    },
    Raw(Vec<u8>),
}

impl RData {
    fn parse(msg: &[u8], rtype: u16, start: usize, len: usize) -> Result<Self, DnsError> {
        let raw = msg
            .get(start..start + len)
            .ok_or(DnsError::Truncated { offset: start })?;
        let structured = match rtype {
            TYPE_NS | TYPE_CNAME | TYPE_PTR => read_name(msg, start)
                .ok()
                .filter(|&(_, used)| used == len)
                .map(|(name, _)| RData::Name(name)),
            TYPE_MX if len > 2 => read_name(msg, start + 2)
                .ok()
                .filter(|&(_, used)| used + 2 == len)
                .map(|(exchange, _)| RData::Mx {
                    preference: u16::from_be_bytes([raw[0], raw[1]]),
                    exchange,
                }),
            TYPE_SRV if len > 6 => read_name(msg, start + 6)
                .ok()
                .filter(|&(_, used)| used + 6 == len)
                .map(|(target, _)| RData::Srv {
                    priority: u16::from_be_bytes([raw[0], raw[1]]),
                    weight: u16::from_be_bytes([raw[2], raw[3]]),
                    port: u16::from_be_bytes([raw[4], raw[5]]),
                    target,
                }),
            TYPE_SOA => Self::parse_soa(msg, start, len),
            _ => None,
        };
        Ok(structured.unwrap_or_else(|| RData::Raw(raw.to_vec())))
    }

    fn parse_soa(msg: &[u8], start: usize, len: usize) -> Option<Self> {
        let (mname, m_used) = read_name(msg, start).ok()?;
        let (rname, r_used) = read_name(msg, start + m_used).ok()?;
        let timers_off = start + m_used + r_used;
        if m_used + r_used + 20 != len {
            return None;
        }
        let mut timers = [0u32; 5];
        for (i, t) in timers.iter_mut().enumerate() {
            *t = read_u32(msg, timers_off + i * 4).ok()?;
        }
        Some(RData::Soa { mname, rname, timers })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            RData::Name(name) => name.encode(out),
            RData::Mx { preference, exchange } => {
                out.extend_from_slice(&preference.to_be_bytes());
                exchange.encode(out);
            }
            RData::Soa { mname, rname, timers } => {
                mname.encode(out);
                rname.encode(out);
                for t in timers {
                    out.extend_from_slice(&t.to_be_bytes());
                }
            }
            RData::Srv { priority, weight, port, target } => {
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&weight.to_be_bytes());
                out.extend_from_slice(&port.to_be_bytes());
                target.encode(out);
            }
            RData::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: DnsName,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: RData,
}

impl DnsRecord {
    fn encode(&self, out: &mut Vec<u8>) -> Result<(), MutationError> {
        self.name.encode(out);
        out.extend_from_slice(&self.rtype.to_be_bytes());
        out.extend_from_slice(&self.class.to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        let len_off = out.len();
        out.extend_from_slice(&[0, 0]);
        self.rdata.encode(out);
        let rdlength = out.len() - len_off - 2;
        let rdlength = u16::try_from(rdlength).map_err(|_| MutationError::LengthOverflow {
            layer: "DNS RDATA",
            len: rdlength,
        })?;
        out[len_off..len_off + 2].copy_from_slice(&rdlength.to_be_bytes());
        Ok(())
    }
}

// ─── Message ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub additionals: Vec<DnsRecord>,
    /// Bytes after the last record, written back unchanged.
    pub trailer: Vec<u8>,
}

impl DnsMessage {
    pub fn parse(msg: &[u8]) -> Result<Self, DnsError> {
        if msg.len() < HEADER_LEN {
            return Err(DnsError::Truncated { offset: msg.len() });
        }
        let id = read_u16(msg, 0)?;
        let flags = read_u16(msg, 2)?;
        let qdcount = read_u16(msg, 4)? as usize;
        let ancount = read_u16(msg, 6)? as usize;
        let nscount = read_u16(msg, 8)? as usize;
        let arcount = read_u16(msg, 10)? as usize;

        let mut pos = HEADER_LEN;
        let mut questions = Vec::new();
        for _ in 0..qdcount {
            let (name, used) = read_name(msg, pos)?;
            pos += used;
            let qtype = read_u16(msg, pos)?;
            let qclass = read_u16(msg, pos + 2)?;
            pos += 4;
            questions.push(DnsQuestion { name, qtype, qclass });
        }
        let answers = Self::parse_records(msg, &mut pos, ancount)?;
        let authorities = Self::parse_records(msg, &mut pos, nscount)?;
        let additionals = Self::parse_records(msg, &mut pos, arcount)?;

        Ok(Self {
            id,
            flags,
            questions,
            answers,
            authorities,
            additionals,
            trailer: msg[pos..].to_vec(),
        })
    }

    fn parse_records(msg: &[u8], pos: &mut usize, count: usize) -> Result<Vec<DnsRecord>, DnsError> {
        let mut records = Vec::new();
        for _ in 0..count {
            let (name, used) = read_name(msg, *pos)?;
            *pos += used;
            let rtype = read_u16(msg, *pos)?;
            let class = read_u16(msg, *pos + 2)?;
            let ttl = read_u32(msg, *pos + 4)?;
            let rdlength = read_u16(msg, *pos + 8)? as usize;
            *pos += 10;
            let rdata = RData::parse(msg, rtype, *pos, rdlength)?;
            *pos += rdlength;
            records.push(DnsRecord { name, rtype, class, ttl, rdata });
        }
        Ok(records)
    }

    /// The name of the first question, if the message has one.
    pub fn first_question_name(&self) -> Option<&DnsName> {
        self.questions.first().map(|q| &q.name)
    }

    /// Serialize with every name written out in full.
    pub fn encode(&self) -> Result<Vec<u8>, MutationError> {
        let mut out = Vec::with_capacity(512);
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        for count in [
            self.questions.len(),
            self.answers.len(),
            self.authorities.len(),
            self.additionals.len(),
        ] {
            let count = u16::try_from(count).map_err(|_| MutationError::LengthOverflow {
                layer: "DNS section count",
                len: count,
            })?;
            out.extend_from_slice(&count.to_be_bytes());
        }
        for q in &self.questions {
            q.name.encode(&mut out);
            out.extend_from_slice(&q.qtype.to_be_bytes());
            out.extend_from_slice(&q.qclass.to_be_bytes());
        }
        for rr in self.answers.iter().chain(&self.authorities).chain(&self.additionals) {
            rr.encode(&mut out)?;
        }
        out.extend_from_slice(&self.trailer);
        Ok(out)
    }
}
