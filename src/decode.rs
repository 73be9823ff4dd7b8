//! Layered, on-demand view over a captured frame.
//!
//! Each accessor decodes one more layer from the previous one and returns
//! `None` when that layer is absent or malformed. Nothing here mutates.

use std::fmt;
use std::net::Ipv4Addr;

use crate::checksum::IPPROTO_UDP;
use crate::dns::DnsMessage;
use crate::error::RecordError;

pub const LINKTYPE_ETHERNET: i32 = 1;
pub const ETH_HEADER_LEN: usize = 14;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const IPPROTO_TCP: u8 = 6;
pub const UDP_HEADER_LEN: usize = 8;
pub const DNS_PORT: u16 = 53;

// ─── Link layer ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct EthernetFrame<'a> {
    bytes: &'a [u8],
}

impl<'a> EthernetFrame<'a> {
    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.bytes[12], self.bytes[13]])
    }

    pub fn header(&self) -> &'a [u8] {
        &self.bytes[..ETH_HEADER_LEN]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[ETH_HEADER_LEN..]
    }
}

// ─── Network layer ────────────────────────────────────────────────────────────

/// IPv4 header flags (the top three bits of the fragment word).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ipv4Flags {
    pub reserved: bool,
    pub dont_fragment: bool,
    pub more_fragments: bool,
}

impl fmt::Display for Ipv4Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.reserved, "RF"),
            (self.dont_fragment, "DF"),
            (self.more_fragments, "MF"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect();
        f.write_str(&names.join("|"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ipv4Packet<'a> {
    /// Header plus payload, cut at the total length (or at the capture end).
    bytes: &'a [u8],
    header_len: usize,
    total_len: usize,
}

impl<'a> Ipv4Packet<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < IPV4_MIN_HEADER_LEN || data[0] >> 4 != 4 {
            return None;
        }
        let header_len = ((data[0] & 0x0f) as usize) * 4;
        let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if header_len < IPV4_MIN_HEADER_LEN || data.len() < header_len || total_len < header_len {
            return None;
        }
        Some(Self {
            bytes: &data[..total_len.min(data.len())],
            header_len,
            total_len,
        })
    }

    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.bytes[12], self.bytes[13], self.bytes[14], self.bytes[15])
    }

    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.bytes[16], self.bytes[17], self.bytes[18], self.bytes[19])
    }

    pub fn protocol(&self) -> u8 {
        self.bytes[9]
    }

    pub fn ttl(&self) -> u8 {
        self.bytes[8]
    }

    pub fn flags(&self) -> Ipv4Flags {
        let b = self.bytes[6];
        Ipv4Flags {
            reserved: b & 0x80 != 0,
            dont_fragment: b & 0x40 != 0,
            more_fragments: b & 0x20 != 0,
        }
    }

    /// Fragment offset in 8-byte units.
    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.bytes[6] & 0x1f, self.bytes[7]])
    }

    pub fn is_fragment(&self) -> bool {
        self.flags().more_fragments || self.fragment_offset() != 0
    }

    pub fn header(&self) -> &'a [u8] {
        &self.bytes[..self.header_len]
    }

    /// True when every byte of the datagram was captured.
    pub fn is_complete(&self) -> bool {
        self.bytes.len() == self.total_len
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[self.header_len..]
    }
}

// ─── Transport layer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct TcpSegment<'a> {
    bytes: &'a [u8],
    data_offset: usize,
}

impl<'a> TcpSegment<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < 20 {
            return None;
        }
        let data_offset = ((data[12] >> 4) as usize) * 4;
        if data_offset < 20 || data.len() < data_offset {
            return None;
        }
        Some(Self { bytes: data, data_offset })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.bytes[0], self.bytes[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[self.data_offset..]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UdpDatagram<'a> {
    bytes: &'a [u8],
    length: usize,
}

impl<'a> UdpDatagram<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < UDP_HEADER_LEN {
            return None;
        }
        let length = u16::from_be_bytes([data[4], data[5]]) as usize;
        if length < UDP_HEADER_LEN {
            return None;
        }
        Some(Self {
            bytes: &data[..length.min(data.len())],
            length,
        })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.bytes[0], self.bytes[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]])
    }

    pub fn is_complete(&self) -> bool {
        self.bytes.len() == self.length
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[UDP_HEADER_LEN..]
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Transport<'a> {
    Tcp(TcpSegment<'a>),
    Udp(UdpDatagram<'a>),
}

impl<'a> Transport<'a> {
    pub fn src_port(&self) -> u16 {
        match self {
            Transport::Tcp(t) => t.src_port(),
            Transport::Udp(u) => u.src_port(),
        }
    }

    pub fn dst_port(&self) -> u16 {
        match self {
            Transport::Tcp(t) => t.dst_port(),
            Transport::Udp(u) => u.dst_port(),
        }
    }

    pub fn payload(&self) -> &'a [u8] {
        match self {
            Transport::Tcp(t) => t.payload(),
            Transport::Udp(u) => u.payload(),
        }
    }
}

// ─── Packet ───────────────────────────────────────────────────────────────────

/// A frame plus the link type it was captured with.
#[derive(Debug, Clone, Copy)]
pub struct DecodedPacket<'a> {
    data: &'a [u8],
    link_type: i32,
}

impl<'a> DecodedPacket<'a> {
    /// Fails only when the frame cannot even hold its declared link header.
    pub fn decode(data: &'a [u8], link_type: i32, frame: u64) -> Result<Self, RecordError> {
        if link_type == LINKTYPE_ETHERNET && data.len() < ETH_HEADER_LEN {
            return Err(RecordError::ShortFrame {
                frame,
                len: data.len(),
                link_type,
            });
        }
        Ok(Self { data, link_type })
    }

    pub fn ethernet(&self) -> Option<EthernetFrame<'a>> {
        (self.link_type == LINKTYPE_ETHERNET).then_some(EthernetFrame { bytes: self.data })
    }

    pub fn ipv4(&self) -> Option<Ipv4Packet<'a>> {
        let eth = self.ethernet()?;
        if eth.ethertype() != ETHERTYPE_IPV4 {
            return None;
        }
        Ipv4Packet::parse(eth.payload())
    }

    /// TCP or UDP header; only present on the first fragment of a datagram.
    pub fn transport(&self) -> Option<Transport<'a>> {
        let ip = self.ipv4()?;
        if ip.fragment_offset() != 0 {
            return None;
        }
        match ip.protocol() {
            IPPROTO_TCP => TcpSegment::parse(ip.payload()).map(Transport::Tcp),
            IPPROTO_UDP => UdpDatagram::parse(ip.payload()).map(Transport::Udp),
            _ => None,
        }
    }

    pub fn application(&self) -> Option<&'a [u8]> {
        self.transport().map(|t| t.payload())
    }

    /// Structured DNS, for complete unfragmented UDP datagrams on port 53.
    pub fn dns(&self) -> Option<DnsMessage> {
        let ip = self.ipv4()?;
        if ip.is_fragment() || !ip.is_complete() {
            return None;
        }
        let Some(Transport::Udp(udp)) = self.transport() else {
            return None;
        };
        if udp.src_port() != DNS_PORT && udp.dst_port() != DNS_PORT {
            return None;
        }
        if !udp.is_complete() {
            return None;
        }
        DnsMessage::parse(udp.payload()).ok()
    }
}
