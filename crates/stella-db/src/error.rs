use rusqlite::ErrorCode;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Every failure the engine surfaces. Kinds stay distinguishable so callers
/// can decide what is retryable; the engine itself never retries.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or out-of-range argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A user tried to rate their own post.
    #[error("users cannot vote on their own posts")]
    SelfVoteForbidden,

    /// Actor is not allowed to perform this transition.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Referenced entity is absent or no longer visible.
    #[error("not found: {0}")]
    NotFound(String),

    /// State-machine precondition violated or a uniqueness race was lost.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A bounded wait for the store expired.
    #[error("timed out waiting for the store")]
    Timeout,

    /// The store cannot be reached or opened.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Unexpected SQLite failure.
    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),
}

impl EngineError {
    /// True for failures a caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
            match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => return Self::Timeout,
                ErrorCode::ConstraintViolation => {
                    return Self::Conflict(
                        message.clone().unwrap_or_else(|| "constraint violation".into()),
                    );
                }
                ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::NotADatabase => return Self::Unavailable(err.to_string()),
                _ => {}
            }
        }
        Self::Storage(err)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}
