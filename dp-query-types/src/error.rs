use thiserror::Error;

use crate::instant::Instant;

/// Errors raised while draining a single Stream Worker or Channel (C2/C3).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("server rejected the request: {code}: {message}")]
    Rejected { code: String, message: String },

    #[error("server sent an exceptional payload after the first response: {code}: {message}")]
    Errored { code: String, message: String },

    #[error("transport terminated: {0}")]
    Terminated(String),

    #[error("message buffer is not accepting new messages")]
    NotAccepting,

    #[error("message buffer closed")]
    Closed,
}

/// Errors raised by the Correlator (C4).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CorrelatorError {
    #[error("bucket for source {source_name} has neither a uniform clock nor an explicit timestamp list")]
    UnsupportedProvenance { source_name: String },

    #[error("column {source_name} has {actual} samples, expected {expected} from its provenance")]
    BadColumnSize {
        source_name: String,
        expected: usize,
        actual: usize,
    },

    #[error("source {source_name} appears more than once in the same correlated block")]
    DuplicateSource { source_name: String },

    #[error("correlated blocks are not strictly increasing by start time at index {index}")]
    BadOrdering { index: usize },
}

/// Errors raised by the Super-Domain Materializer (C6).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaterializeError {
    #[error("PV {pv} has conflicting types across blocks in the same super domain")]
    InconsistentType { pv: String },

    #[error("timestamp {timestamp} and PV {pv} were each contributed more than once in the same super domain")]
    DuplicateCell { timestamp: Instant, pv: String },
}

/// Errors raised while building or querying the Aggregate & Table (C7).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("configuration permits neither a static nor a lazy table for a result of this size")]
    NotRepresentable,
}

/// The single tagged error surfaced to callers of the Query Facade (C8).
///
/// Every stage-specific error converts into this enum via `#[from]`; no
/// stage's error type is exposed on the public facade API directly.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DpQueryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request carries no PV names")]
    EmptyRequest,

    #[error("invalid time range: end is before begin")]
    InvalidRange,

    #[error("stream mode {0:?} is not valid for this operation")]
    InvalidStreamMode(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Correlator(#[from] CorrelatorError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("operation was cancelled")]
    Cancelled,
}

impl DpQueryError {
    /// `true` for kinds the design marks as "expected" (cancellation) as
    /// opposed to genuine failures — useful for callers deciding whether to
    /// log at `warn` or `info`.
    pub fn is_expected_cancellation(&self) -> bool {
        matches!(self, DpQueryError::Cancelled)
    }
}
