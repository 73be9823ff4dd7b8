//! RFC 1071 one's-complement checksums for IPv4 headers and UDP datagrams.

use std::net::Ipv4Addr;

pub const IPPROTO_UDP: u8 = 17;

fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let Some(&last) = chunks.remainder().first() {
        sum += (last as u32) << 8;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Checksum over `data` alone (IPv4 header checksum).
pub fn internet_checksum(data: &[u8]) -> u16 {
    fold(sum_words(data, 0))
}

/// Transport checksum bound to the IPv4 pseudo-header.
///
/// `segment` is the full transport header plus payload; its own checksum field
/// must be zero when computing and left in place when verifying (a valid
/// segment then folds to zero).
pub fn ipv4_transport_checksum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, segment: &[u8]) -> u16 {
    let mut sum = sum_words(&src.octets(), 0);
    sum = sum_words(&dst.octets(), sum);
    sum += protocol as u32;
    sum += segment.len() as u32;
    fold(sum_words(segment, sum))
}

/// True when a UDP datagram's checksum matches its pseudo-header.
/// A zero checksum means the sender did not compute one.
pub fn udp_checksum_valid(src: Ipv4Addr, dst: Ipv4Addr, datagram: &[u8]) -> bool {
    if datagram.len() < 8 {
        return false;
    }
    if datagram[6] == 0 && datagram[7] == 0 {
        return true;
    }
    ipv4_transport_checksum(src, dst, IPPROTO_UDP, datagram) == 0
}
