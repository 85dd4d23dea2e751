//! Error taxonomy for the detection and scoring core.
//!
//! Most call sites simply propagate failures with `anyhow::Context`, the way
//! the rest of this codebase does. The cases that need to be told apart —
//! ingestion validation, concurrent-upsert conflicts, transient network
//! failures, and the pipeline orchestrator's hard/soft step policy — return
//! this enum directly so the caller can match on kind instead of downcasting.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RadianceError {
    /// A single ingested record failed normalization (bad MMSI, out-of-range
    /// coordinate, malformed timestamp). The caller drops the record,
    /// increments an error counter, and continues.
    #[error("validation failed for field `{field}`: {reason}")]
    Validation { field: String, reason: String },

    /// A concurrent vessel insert hit a uniqueness constraint. Recovery is
    /// release-savepoint-and-requery, never an outer rollback.
    #[error("uniqueness conflict on {entity} key {key}")]
    UniquenessConflict { entity: String, key: String },

    /// Connect failure, HTTP 429/5xx, or timeout. Retryable with bounded
    /// backoff honoring `Retry-After`.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// HTTP 401 on a token-based API. Caller invalidates the cached token,
    /// refreshes once, and retries the request once.
    #[error("auth token expired")]
    AuthExpired,

    /// Missing YAML file or missing expected section. Fatal at load time —
    /// the pipeline must not start.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A detector raised during its own run. Soft: the pipeline step is
    /// recorded as failed and the run continues in `partial` status.
    #[error("detector `{detector}` failed: {source}")]
    DetectorFailure {
        detector: String,
        #[source]
        source: anyhow::Error,
    },

    /// Risk scoring or gap detection raised. Hard: the run aborts with
    /// status `failed`.
    #[error("scoring failed: {0}")]
    ScoringFailure(anyhow::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RadianceError {
    /// Whether this error kind, per §7's policy table, should abort the
    /// enclosing pipeline run rather than just being recorded.
    pub fn is_hard(&self) -> bool {
        matches!(self, RadianceError::ScoringFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, RadianceError>;
