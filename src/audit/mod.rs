pub mod sink;

pub use sink::{AuditError, AuditRecord, AuditSink, AuditWriter, LogLevel};
