#[macro_use]
extern crate log;

mod config;
mod controller;
mod correlator;
mod error;
mod facade;
mod hooks;
mod receiver;
mod router;
mod scheduler;
mod transport;

pub mod cli;

pub use config::ClientConfig;
pub use controller::ConnState;
pub use error::ClientError;
pub use facade::{ReceiveTopic, Session};
pub use hooks::{ConnectionHooks, NoopHooks};
pub use router::UpdateHandler;

pub use xb_queue::QueueError;
pub use xb_wire::{FrameError, Method, MessageUnit};
