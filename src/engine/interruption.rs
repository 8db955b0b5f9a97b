use serde::{Deserialize, Serialize};
use std::fmt;

/// Status an engine attaches to interruptions raised by body limits.
pub const BODY_LIMIT_STATUS: u16 = 413;

/// Blocking verdict produced by a phase evaluation.
///
/// "No action" is modelled as `None` at every call site, so an
/// `Interruption` value always means block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interruption {
    /// Rule that caused the interruption (0 for engine-internal limits)
    pub rule_id: u32,

    /// Status code suggested by the engine
    pub status: u16,

    /// Optional replacement payload for the synthesized reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl Interruption {
    /// Create an interruption raised by a rule.
    pub fn rule(rule_id: u32, status: u16) -> Self {
        Interruption {
            rule_id,
            status,
            payload: None,
        }
    }

    /// Create an interruption raised by a body size limit.
    pub fn body_limit() -> Self {
        Interruption {
            rule_id: 0,
            status: BODY_LIMIT_STATUS,
            payload: None,
        }
    }

    /// Attach a replacement payload.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Returns true if this interruption came from a size limit rather than a rule.
    #[inline]
    pub fn is_body_limit(&self) -> bool {
        self.rule_id == 0
    }
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_body_limit() {
            write!(f, "body limit exceeded (status {})", self.status)
        } else {
            write!(f, "rule {} (status {})", self.rule_id, self.status)
        }
    }
}
