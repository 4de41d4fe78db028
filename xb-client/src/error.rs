use std::time::Duration;

/// Typed error surface for every externally visible fallible operation
/// (§7): every public call returns either a value or one of these variants,
/// never an untyped exception.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("not connected")]
    NotConnected,

    #[error("no connection")]
    NoConnection,

    #[error("no connection (POLLING)")]
    NoConnectionPolling,

    #[error("no connection (DEAD)")]
    NoConnectionDead,

    #[error("response timed out after {0:?}")]
    ResponseTimeout(Duration),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("internal null pointer: {what}")]
    NullPointer { what: &'static str },

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Queue(#[from] xb_queue::QueueError),

    #[error("persistent store unavailable: {0}")]
    DbUnavailable(String),

    /// A non-communication error surfaced verbatim from the broker (§7:
    /// "surfaced to the caller with remote=true").
    #[error("remote exception {error_code}: {message}")]
    Remote { error_code: String, message: String },

    #[error(transparent)]
    Frame(#[from] xb_wire::FrameError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn is_remote(&self) -> bool {
        matches!(self, ClientError::Remote { .. })
    }
}
