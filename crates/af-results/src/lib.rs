//! af-results: run fingerprints, on-disk run store and the history index.

pub mod hash;
pub mod history;
pub mod store;
pub mod types;

pub use hash::{FINGERPRINT_SCHEMA, Fingerprint, compute_fingerprint};
pub use history::RunHistory;
pub use store::RunStore;
pub use types::*;

pub type ResultsResult<T> = Result<T, ResultsError>;

#[derive(thiserror::Error, Debug)]
pub enum ResultsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Run not found: {fingerprint}")]
    RunNotFound { fingerprint: String },

    #[error("Cache corruption in {fingerprint}: {reason}")]
    CacheCorruption { fingerprint: String, reason: String },

    #[error("Results of {fingerprint} were evicted")]
    Evicted { fingerprint: String },

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),
}

impl ResultsError {
    pub(crate) fn corruption(fingerprint: &Fingerprint, reason: impl Into<String>) -> Self {
        ResultsError::CacheCorruption {
            fingerprint: fingerprint.to_string(),
            reason: reason.into(),
        }
    }
}
