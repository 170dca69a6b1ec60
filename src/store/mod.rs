//! Store side: the ingest endpoint, stream index, query engine and alert
//! evaluator, served over one HTTP API.

pub mod alert;
pub mod api;
pub mod index;
pub mod ingest;
pub mod query;
pub mod relations;
pub mod runner;
pub mod selector;
pub mod server;

pub use alert::{Alert, AlertBoard, AlertEvaluator};
pub use index::{Entry, StreamIndex, TimeRange};
pub use ingest::{IngestError, Ingester};
pub use query::{query, query_limited, Direction, StreamResult};
pub use runner::{StoreError, StoreRunner};
pub use selector::{Selector, SelectorError};
