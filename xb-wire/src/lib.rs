//! Wire protocol frame codec and message data model.
//!
//! This crate knows nothing about sockets or threads: it turns a typed
//! [`Frame`] into bytes and back, per §6.1 of the wire protocol binding.
//! [`crate::transport`]-level concerns (who owns the stream, when to
//! retry) live one layer up, in `xb-client`.

#[macro_use]
extern crate log;

mod error;
mod frame;
mod message;
mod method;
mod request_id;

pub use error::FrameError;
pub use frame::{Frame, FrameBody, FrameType, PROTOCOL_VERSION};
pub use message::MessageUnit;
pub use method::Method;
pub use request_id::{RequestId, RequestIdGenerator};
