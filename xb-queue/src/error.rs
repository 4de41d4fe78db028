/// Errors raised by the persistent queue (§7: `QueueQuotaExceeded`,
/// `ResourceDbUnavailable`, `ResourceDbUnknown`).
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue quota exceeded: {reason}")]
    QuotaExceeded { reason: String },

    #[error("persistent store unavailable: {0}")]
    DbUnavailable(String),

    #[error("persistent store error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("stored blob is not valid base64: {0}")]
    CorruptBlob(String),

    #[error("stored byte_size ({stored}) does not match decoded blob length ({decoded})")]
    SizeMismatch { stored: i64, decoded: usize },
}
