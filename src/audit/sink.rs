use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engine::{MatchSink, MatchedRule, Severity};

/// Errors that can occur while writing the audit log.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Log level a rule match is reported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Critical,
    Error,
    Warn,
    Info,
    Debug,
}

impl From<Severity> for LogLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Emergency | Severity::Alert | Severity::Critical => LogLevel::Critical,
            Severity::Error => LogLevel::Error,
            Severity::Warning => LogLevel::Warn,
            Severity::Notice | Severity::Info => LogLevel::Info,
            Severity::Debug => LogLevel::Debug,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Critical => "critical",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

/// One line of the audit file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(flatten)]
    pub rule: MatchedRule,
}

/// Append-only JSON-lines writer for audit records.
pub struct AuditWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    entries_written: u64,
}

impl AuditWriter {
    /// Open or create an audit file for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;

        Ok(AuditWriter {
            writer: BufWriter::new(file),
            path: path.as_ref().to_path_buf(),
            entries_written: 0,
        })
    }

    /// Append a record and flush it.
    pub fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        let json = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        self.entries_written += 1;
        Ok(())
    }

    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Destination for rule matches raised by every compiled engine.
///
/// Matches always go to the tracing log at the mapped level; when an
/// audit file is configured they are also appended there.
pub struct AuditSink {
    file: Option<Mutex<AuditWriter>>,
    matches_total: AtomicU64,
    write_errors: AtomicU64,
}

impl AuditSink {
    /// Sink that only logs.
    pub fn log_only() -> Self {
        AuditSink {
            file: None,
            matches_total: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        }
    }

    /// Sink that logs and appends to the given audit file.
    pub fn with_file(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let writer = AuditWriter::open(path)?;
        Ok(AuditSink {
            file: Some(Mutex::new(writer)),
            matches_total: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        })
    }

    /// Path of the audit file, if any.
    pub fn path(&self) -> Option<PathBuf> {
        self.file.as_ref().map(|w| w.lock().path().to_path_buf())
    }

    pub fn matches_total(&self) -> u64 {
        self.matches_total.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Record a rule match.
    pub fn record(&self, matched: &MatchedRule) {
        self.matches_total.fetch_add(1, Ordering::Relaxed);

        let level = LogLevel::from(matched.severity);
        let line = matched.log_line();
        match level {
            LogLevel::Critical => {
                error!(severity = "critical", rule_id = matched.rule_id, "{}", line)
            }
            LogLevel::Error => error!(rule_id = matched.rule_id, "{}", line),
            LogLevel::Warn => warn!(rule_id = matched.rule_id, "{}", line),
            LogLevel::Info => info!(rule_id = matched.rule_id, "{}", line),
            LogLevel::Debug => debug!(rule_id = matched.rule_id, "{}", line),
        }

        if let Some(file) = &self.file {
            let record = AuditRecord {
                timestamp: Utc::now(),
                level,
                rule: matched.clone(),
            };
            if let Err(e) = file.lock().append(&record) {
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to write audit record");
            }
        }
    }
}

impl MatchSink for AuditSink {
    fn on_match(&self, matched: &MatchedRule) {
        self.record(matched);
    }
}

impl fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditSink")
            .field("path", &self.path())
            .field("matches_total", &self.matches_total())
            .finish()
    }
}
