use std::io;

/// Errors produced while encoding or decoding a [`crate::Frame`].
///
/// A malformed frame is always a protocol error, never a transport error —
/// `std::io::Error`s from the underlying stream are surfaced verbatim by the
/// caller and never wrapped here (see §4.1: "`TransportError` is transparent
/// to the codec").
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("invalid total length field {0:?}")]
    InvalidLength(Vec<u8>),

    #[error("unknown frame type byte {0:#04x}")]
    UnknownType(u8),

    #[error("missing NUL terminator while reading {field}")]
    UnterminatedField { field: &'static str },

    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("content length {declared} does not fit in the remaining {available} bytes")]
    ContentLengthOverflow { declared: u64, available: usize },

    #[error("frame declares totalLen={declared} but {actual} bytes were read")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}
