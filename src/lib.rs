pub mod agent;
pub mod cli;
pub mod config;
pub mod enrich;
pub mod forwarder;
pub mod labels;
pub mod metrics;
pub mod protocol;
pub mod retry;
pub mod source;
pub mod store;
