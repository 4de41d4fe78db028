//! Priority-ordered, on-disk queue of pending invocations (C6, §4.6).

#[macro_use]
extern crate log;

mod entry;
mod error;
mod store;

pub use entry::QueueEntry;
pub use error::QueueError;
pub use store::PersistentQueue;
