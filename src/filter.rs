//! Selection rules and the keep/drop decision.

use std::fmt;
use std::net::Ipv4Addr;

use crate::decode::DecodedPacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop,
}

/// The single rule applied during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRule {
    /// Drop traffic exchanged between `a` and `b`, in either direction.
    ExactPair { a: Ipv4Addr, b: Ipv4Addr },
    /// Drop traffic between `source` and any host other than `keep`.
    ExcludeDestination { source: Ipv4Addr, keep: Ipv4Addr },
    /// Drop every packet with this address as either endpoint.
    SourceOnly(Ipv4Addr),
    /// Rewrite DNS question names containing `needle`; never drops.
    DnsMask { needle: String },
}

impl FilterRule {
    /// Decide a packet's fate from its IPv4 endpoints. Frames without an
    /// IPv4 layer are always kept.
    pub fn verdict(&self, packet: &DecodedPacket<'_>) -> Verdict {
        match packet.ipv4() {
            Some(ip) if self.matches(ip.src(), ip.dst()) => Verdict::Drop,
            _ => Verdict::Keep,
        }
    }

    pub fn matches(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        match self {
            FilterRule::ExactPair { a, b } => (src == *a && dst == *b) || (src == *b && dst == *a),
            // Both disjuncts compare against the packet's own direction.
            FilterRule::ExcludeDestination { source, keep } => {
                (src == *source && dst != *keep) || (src != *keep && dst == *source)
            }
            FilterRule::SourceOnly(addr) => src == *addr || dst == *addr,
            FilterRule::DnsMask { .. } => false,
        }
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterRule::ExactPair { a, b } => write!(f, "removing packets between {a} and {b}"),
            FilterRule::ExcludeDestination { source, keep } => {
                write!(f, "removing packets between {source} and anything but {keep}")
            }
            FilterRule::SourceOnly(addr) => write!(f, "removing packets to and from {addr}"),
            FilterRule::DnsMask { needle } => {
                write!(f, "replacing {needle:?} in DNS question names")
            }
        }
    }
}
