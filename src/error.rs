//! Error types for postie
//!
//! Mirrors the error taxonomy a posting job actually needs to classify: what
//! gets retried locally, what marks a provider degraded, and what aborts the
//! job outright.

use thiserror::Error;

/// Result type alias for postie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for postie
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing or invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx-level database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error reading a source file or writing output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// yEnc/article encoding error
    #[error("encode error: {0}")]
    Encode(String),

    /// Network error classified as transient -- retry locally
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Network error classified as permanent -- do not retry against this provider
    #[error("permanent network error: {0}")]
    PermanentNetwork(String),

    /// Provider rejected credentials
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Provider reported quota/retention exhaustion
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Post-check could not find a previously posted article
    #[error("article missing: {0}")]
    ArticleMissing(String),

    /// PAR2 executor failed
    #[error("PAR2 error: {0}")]
    Par2(#[from] Par2Error),

    /// Job or operation was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Job is paused (not a failure, short-circuits in-flight work)
    #[error("paused")]
    Paused,

    /// Unrecoverable error that aborts the whole job
    #[error("fatal error: {0}")]
    Fatal(String),

    /// NZB assembly failed
    #[error("NZB error: {0}")]
    Nzb(String),

    /// Requested queue/job item does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether this error should be retried locally against the same provider.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }

    /// Whether this error should mark the offending provider degraded and
    /// fail over to a sibling provider.
    pub fn is_provider_degraded(&self) -> bool {
        matches!(self, Error::AuthFailure(_) | Error::QuotaExceeded(_))
    }

    /// Whether this error aborts the whole job rather than just one file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_) | Error::Config(_))
    }
}

/// Errors from the durable queue's storage layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Could not open or connect to the queue database
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    /// A query failed to execute
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Referenced row does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors from the PAR2 executor
#[derive(Debug, Error)]
pub enum Par2Error {
    /// Neither `par2` nor `parpar` could be located
    #[error("no PAR2 binary available: {0}")]
    BinaryNotFound(String),

    /// Failed to spawn or communicate with the external process
    #[error("failed to execute PAR2 binary: {0}")]
    Spawn(String),

    /// The external process exited with a non-zero status
    #[error("PAR2 binary exited with status {status}: {detail}")]
    ExitFailure {
        /// Process exit status, if the OS reported one
        status: i32,
        /// Tail of stdout/stderr captured for diagnostics
        detail: String,
    },

    /// No output files matched `*.par2` after a successful run
    #[error("PAR2 binary produced no output files")]
    NoOutput,
}
