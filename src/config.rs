//! Turn raw command-line selections into a single run mode.

use std::net::Ipv4Addr;

use crate::error::ConfigError;
use crate::filter::FilterRule;

/// What a run does with each record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Copy every record unchanged.
    Copy,
    /// Write CSV rows instead of a capture.
    Export { header: bool },
    Apply(FilterRule),
}

/// Option values as given on the command line, before validation.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub removesrc: Option<String>,
    pub removedst: Option<String>,
    pub dstipnot: Option<String>,
    pub remove_all: Option<String>,
    pub mask_dns: Option<String>,
    /// Replacement text for `mask_dns`.
    pub mask_with: String,
    pub tocsv: bool,
    pub csv_header: bool,
}

fn parse_addr(flag: &'static str, value: &str) -> Result<Ipv4Addr, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidAddress {
        flag,
        value: value.to_string(),
    })
}

impl Selection {
    pub fn resolve(&self) -> Result<Mode, ConfigError> {
        if self.removedst.is_some() && self.dstipnot.is_some() {
            return Err(ConfigError::DestinationConflict);
        }
        if self.removesrc.is_none() {
            if self.removedst.is_some() {
                return Err(ConfigError::MissingSource { flag: "--removedst" });
            }
            if self.dstipnot.is_some() {
                return Err(ConfigError::MissingSource { flag: "--dstipnot" });
            }
        }

        let chosen: Vec<&'static str> = [
            ("--removesrc", self.removesrc.is_some()),
            ("--remove-all", self.remove_all.is_some()),
            ("--mask-dns", self.mask_dns.is_some()),
            ("--tocsv", self.tocsv),
        ]
        .into_iter()
        .filter_map(|(flag, set)| set.then_some(flag))
        .collect();
        if let [first, second, ..] = chosen[..] {
            return Err(ConfigError::ConflictingModes { first, second });
        }

        if let Some(src) = &self.removesrc {
            let source = parse_addr("--removesrc", src)?;
            let rule = match (&self.removedst, &self.dstipnot) {
                (Some(dst), _) => FilterRule::ExactPair {
                    a: source,
                    b: parse_addr("--removedst", dst)?,
                },
                (_, Some(keep)) => FilterRule::ExcludeDestination {
                    source,
                    keep: parse_addr("--dstipnot", keep)?,
                },
                (None, None) => FilterRule::SourceOnly(source),
            };
            return Ok(Mode::Apply(rule));
        }
        if let Some(addr) = &self.remove_all {
            return Ok(Mode::Apply(FilterRule::SourceOnly(parse_addr("--remove-all", addr)?)));
        }
        if let Some(needle) = &self.mask_dns {
            if needle.is_empty() {
                return Err(ConfigError::EmptyNeedle);
            }
            if self.mask_with.starts_with(needle.as_str()) {
                return Err(ConfigError::ReplacementKeepsNeedle {
                    needle: needle.clone(),
                    replacement: self.mask_with.clone(),
                });
            }
            return Ok(Mode::Apply(FilterRule::DnsMask { needle: needle.clone() }));
        }
        if self.tocsv {
            return Ok(Mode::Export { header: self.csv_header });
        }
        Ok(Mode::Copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn nothing_selected_copies() {
        assert_eq!(Selection::default().resolve(), Ok(Mode::Copy));
    }

    #[test]
    fn source_and_destination_make_a_pair() {
        let sel = Selection {
            removesrc: some("10.0.0.1"),
            removedst: some("10.0.0.2"),
            ..Default::default()
        };
        assert_eq!(
            sel.resolve(),
            Ok(Mode::Apply(FilterRule::ExactPair {
                a: Ipv4Addr::new(10, 0, 0, 1),
                b: Ipv4Addr::new(10, 0, 0, 2),
            }))
        );
    }

    #[test]
    fn source_with_dstipnot_excludes() {
        let sel = Selection {
            removesrc: some("10.0.0.1"),
            dstipnot: some("10.0.0.9"),
            ..Default::default()
        };
        assert_eq!(
            sel.resolve(),
            Ok(Mode::Apply(FilterRule::ExcludeDestination {
                source: Ipv4Addr::new(10, 0, 0, 1),
                keep: Ipv4Addr::new(10, 0, 0, 9),
            }))
        );
    }

    #[test]
    fn remove_all_and_bare_source_are_equivalent() {
        let a = Selection { removesrc: some("192.168.1.5"), ..Default::default() };
        let b = Selection { remove_all: some("192.168.1.5"), ..Default::default() };
        assert_eq!(a.resolve(), b.resolve());
        assert_eq!(a.resolve(), Ok(Mode::Apply(FilterRule::SourceOnly(Ipv4Addr::new(192, 168, 1, 5)))));
    }

    #[test]
    fn destination_flags_conflict() {
        let sel = Selection {
            removesrc: some("10.0.0.1"),
            removedst: some("10.0.0.2"),
            dstipnot: some("10.0.0.3"),
            ..Default::default()
        };
        assert_eq!(sel.resolve(), Err(ConfigError::DestinationConflict));
    }

    #[test]
    fn destination_needs_source() {
        let sel = Selection { dstipnot: some("10.0.0.3"), ..Default::default() };
        assert_eq!(sel.resolve(), Err(ConfigError::MissingSource { flag: "--dstipnot" }));
        let sel = Selection { removedst: some("10.0.0.3"), ..Default::default() };
        assert_eq!(sel.resolve(), Err(ConfigError::MissingSource { flag: "--removedst" }));
    }

    #[test]
    fn modes_are_exclusive() {
        let sel = Selection {
            mask_dns: some("corp"),
            tocsv: true,
            ..Default::default()
        };
        assert_eq!(
            sel.resolve(),
            Err(ConfigError::ConflictingModes { first: "--mask-dns", second: "--tocsv" })
        );
    }

    #[test]
    fn bad_input_is_rejected() {
        let sel = Selection { removesrc: some("10.0.0.300"), ..Default::default() };
        assert!(matches!(sel.resolve(), Err(ConfigError::InvalidAddress { flag: "--removesrc", .. })));
        let sel = Selection { mask_dns: some(""), ..Default::default() };
        assert_eq!(sel.resolve(), Err(ConfigError::EmptyNeedle));
    }

    #[test]
    fn replacement_must_not_start_with_needle() {
        for needle in ["masked", "m", "masked.invalid"] {
            let sel = Selection {
                mask_dns: some(needle),
                mask_with: "masked.invalid".into(),
                ..Default::default()
            };
            assert_eq!(
                sel.resolve(),
                Err(ConfigError::ReplacementKeepsNeedle {
                    needle: needle.into(),
                    replacement: "masked.invalid".into(),
                })
            );
        }
        let sel = Selection {
            mask_dns: some("corp"),
            mask_with: "masked.invalid".into(),
            ..Default::default()
        };
        assert!(sel.resolve().is_ok());
    }

    #[test]
    fn export_carries_header_choice() {
        let sel = Selection { tocsv: true, csv_header: true, ..Default::default() };
        assert_eq!(sel.resolve(), Ok(Mode::Export { header: true }));
    }
}
