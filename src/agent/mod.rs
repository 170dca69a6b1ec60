pub mod api;
pub mod runner;
pub mod server;

pub use runner::{AgentError, AgentRunner, AgentSockets};
