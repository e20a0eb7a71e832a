//! Error types for the streaming engine.

use std::collections::HashSet;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Edge, NodeId};

/// Errors raised by the graph engine.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A second graph was opened while another was still live.
    #[error("only one graph may be open at a time; drop the other graph first")]
    GraphAlreadyOpen,

    /// An update arrived after a query locked the graph.
    #[error("the graph cannot be updated: a connectivity query has locked it")]
    UpdateLocked,

    /// Every sketch level of some live component was consumed without
    /// isolating an edge. The partition computed so far is attached.
    #[error("sampling exhausted on {failed} live component(s) in round {round}")]
    SamplingExhausted {
        round: usize,
        failed: usize,
        partial: Vec<HashSet<NodeId>>,
    },

    /// A verification hook rejected a sampled edge or a round outcome.
    #[error("verification failed in round {round}: {reason}")]
    VerificationFailed {
        round: usize,
        edge: Option<Edge>,
        reason: String,
    },

    /// An I/O failure in serialization, backup, or gutter spill files.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed serialized sketch-state file.
    #[error("bad sketch-state file: {0}")]
    BadStateFile(String),

    /// A configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A stream error surfaced through a graph operation.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Errors raised by the binary stream readers and writer.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream file could not be opened.
    #[error("could not open stream file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A read failed mid-stream.
    #[error("stream read failed at byte offset {offset}: {source}")]
    Read { offset: u64, source: std::io::Error },

    /// The stream header was truncated or inconsistent with the file size.
    #[error("bad stream header: {0}")]
    BadHeader(String),

    /// A record with an unknown type byte.
    #[error("invalid record type {value} at byte offset {offset}")]
    BadRecord { offset: u64, value: u8 },

    /// The writer was finalized with a record count different from the
    /// count declared in the header.
    #[error("stream writer finalized with {written} records, header declared {declared}")]
    CountMismatch { declared: u64, written: u64 },
}

/// Result alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
