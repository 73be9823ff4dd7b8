//! Error types for every stage of an edit run.
//!
//! Only [`RecordError`] is recoverable: the pipeline logs it, skips the record
//! and keeps going. [`ConfigError`] is raised before the run starts; the rest
//! abort the run through [`EditError`].

use std::path::PathBuf;

use thiserror::Error;

/// Invalid option combinations, detected before any file is touched.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--removedst and --dstipnot cannot be used together")]
    DestinationConflict,

    #[error("{flag} requires --removesrc")]
    MissingSource { flag: &'static str },

    #[error("{first} and {second} select different modes; pick one")]
    ConflictingModes {
        first: &'static str,
        second: &'static str,
    },

    #[error("{flag}: {value:?} is not an IPv4 address")]
    InvalidAddress { flag: &'static str, value: String },

    #[error("--mask-dns needs a non-empty substring")]
    EmptyNeedle,

    #[error("--mask-with {replacement:?} starts with the --mask-dns text {needle:?}, so masked names would still match")]
    ReplacementKeepsNeedle { needle: String, replacement: String },
}

/// The input capture or the output file could not be opened.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("cannot open {path:?}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} is not a legacy pcap file: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("cannot create {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single record could not be read or decoded.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    #[error("frame {frame}: record is truncated or larger than the read buffer")]
    Truncated { frame: u64 },

    #[error("frame {frame}: malformed record: {reason}")]
    Malformed { frame: u64, reason: String },

    #[error("frame {frame}: captured length {caplen} exceeds {limit_name} {limit}")]
    Oversized {
        frame: u64,
        caplen: u32,
        limit_name: &'static str,
        limit: u32,
    },

    #[error("frame {frame}: {len} bytes is too short for link type {link_type}")]
    ShortFrame {
        frame: u64,
        len: usize,
        link_type: i32,
    },
}

/// Re-encoding a rewritten DNS packet could not produce consistent bytes.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MutationError {
    #[error("DNS name {name:?} has an empty label")]
    EmptyLabel { name: String },

    #[error("DNS label {label:?} is {len} bytes (max 63)")]
    LabelTooLong { label: String, len: usize },

    #[error("DNS name is {len} bytes on the wire (max 255)")]
    NameTooLong { len: usize },

    #[error("{layer} length {len} does not fit in 16 bits")]
    LengthOverflow { layer: &'static str, len: usize },
}

/// Output I/O failed.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("write to {path:?} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV write to {path:?} failed: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Fatal errors surfaced by [`crate::pipeline::run`].
#[derive(Error, Debug)]
pub enum EditError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error("frame {frame}: cannot re-encode masked DNS packet: {source}")]
    Mutation {
        frame: u64,
        #[source]
        source: MutationError,
    },

    #[error(transparent)]
    Write(#[from] WriteError),
}
