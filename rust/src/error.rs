use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Failures that escape the sync engine. Local storage and parse problems
/// never show up here; they degrade to cache misses at the cache boundary.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No usable credential. Callers must not fetch or send until the app
    /// shell re-establishes a session.
    #[error("authentication required")]
    AuthRequired,

    /// Transport-level failure. Cached data is untouched and the operation
    /// is safe to retry.
    #[error("network failure: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("backend error ({status}): {message}")]
    Backend { status: u16, message: String },
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
