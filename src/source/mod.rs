pub mod reader;
pub mod record;
pub mod rotation;
pub mod syslog;
pub mod timestamp;

pub use reader::{FileWatcher, ReaderError};
pub use record::{LogRecord, Origin};
pub use syslog::{run_syslog_receiver, SyslogError};
