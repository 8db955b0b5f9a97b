use std::fmt;

/// Position of a stream in the inspection sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Phase {
    #[default]
    Idle,
    ConnectionOpened,
    RequestHeadersEvaluated,
    RequestBodyEvaluated,
    ResponseHeadersEvaluated,
    ResponseBodyEvaluated,
    Closed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::ConnectionOpened => "connection_opened",
            Phase::RequestHeadersEvaluated => "request_headers_evaluated",
            Phase::RequestBodyEvaluated => "request_body_evaluated",
            Phase::ResponseHeadersEvaluated => "response_headers_evaluated",
            Phase::ResponseBodyEvaluated => "response_body_evaluated",
            Phase::Closed => "closed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-only phase cursor.
///
/// A phase may be entered late or skipped past, never re-entered.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseCursor {
    current: Phase,
}

impl PhaseCursor {
    pub fn new() -> Self {
        PhaseCursor::default()
    }

    #[inline]
    pub fn current(&self) -> Phase {
        self.current
    }

    /// True once `phase` has been entered or passed.
    #[inline]
    pub fn reached(&self, phase: Phase) -> bool {
        self.current >= phase
    }

    /// Move to `phase` if it lies ahead. Returns false when already there or past it.
    pub fn advance(&mut self, phase: Phase) -> bool {
        if phase > self.current {
            self.current = phase;
            true
        } else {
            false
        }
    }
}
