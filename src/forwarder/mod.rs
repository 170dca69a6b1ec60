pub mod batch;
pub mod batcher;
pub mod client;
pub mod runner;

pub use batch::Batch;
pub use client::{PushClient, PushError, PushTransport};
pub use runner::Forwarder;
