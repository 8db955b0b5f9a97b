use serde::{Deserialize, Serialize};
use std::fmt;

/// Rule severity as declared in the rule source.
///
/// Ordered from most to least severe, mirroring syslog levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Severity {
    /// Parse from the textual form used in directives.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "emergency" => Some(Severity::Emergency),
            "alert" => Some(Severity::Alert),
            "critical" => Some(Severity::Critical),
            "error" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "notice" => Some(Severity::Notice),
            "info" => Some(Severity::Info),
            "debug" => Some(Severity::Debug),
            _ => None,
        }
    }

    /// All severities, most severe first.
    pub fn all() -> [Severity; 8] {
        [
            Severity::Emergency,
            Severity::Alert,
            Severity::Critical,
            Severity::Error,
            Severity::Warning,
            Severity::Notice,
            Severity::Info,
            Severity::Debug,
        ]
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Notice
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Emergency => "emergency",
            Severity::Alert => "alert",
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Info => "info",
            Severity::Debug => "debug",
        };
        f.write_str(s)
    }
}

/// A rule match raised by the engine during evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRule {
    /// Transaction the match belongs to
    pub tx_id: String,

    /// Rule identifier
    pub rule_id: u32,

    /// Declared severity
    pub severity: Severity,

    /// Phase in which the rule fired
    pub phase: String,

    /// Human-readable rule message
    pub message: String,

    /// The value that matched
    pub data: String,

    /// Whether the match interrupted the transaction
    pub disruptive: bool,
}

impl MatchedRule {
    /// Render the match as a single log line.
    pub fn log_line(&self) -> String {
        format!(
            "[id \"{}\"] [severity \"{}\"] [phase \"{}\"] [msg \"{}\"] [data \"{}\"] [tx \"{}\"]",
            self.rule_id, self.severity, self.phase, self.message, self.data, self.tx_id
        )
    }
}
