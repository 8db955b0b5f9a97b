//! The slice of the host proxy's callback surface the filter consumes.

use std::fmt;

/// Result of a filter callback, telling the host how to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// Forward the current headers or data unchanged.
    Continue,
    /// Hold the data and re-deliver it, accumulated, with the next chunk.
    StopAndBuffer,
    /// A local reply was sent; stop forwarding this stream.
    LocalReply,
}

/// Why the host tore a stream down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    Normal,
    Terminate,
}

impl fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestroyReason::Normal => write!(f, "normal"),
            DestroyReason::Terminate => write!(f, "terminate"),
        }
    }
}

/// A synthesized response sent back in place of the upstream one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReply {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
    /// Response code details recorded by the host
    pub details: String,
}

impl LocalReply {
    pub fn new(status: u16, details: impl Into<String>) -> Self {
        LocalReply {
            status,
            body: String::new(),
            headers: Vec::new(),
            details: details.into(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// Ordered header enumeration.
pub trait HeaderMap {
    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_>;

    fn get(&self, key: &str) -> Option<&str> {
        self.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v)
    }
}

/// Request headers plus the pseudo-header facts the host exposes.
pub trait RequestHeaderMap: HeaderMap {
    /// Host (authority), empty when absent.
    fn host(&self) -> &str;

    fn path(&self) -> &str;

    fn method(&self) -> &str;

    /// Negotiated protocol, when the host knows it.
    fn protocol(&self) -> Option<&str>;
}

/// A body chunk as delivered by the host.
///
/// After a [`FilterStatus::StopAndBuffer`] the host re-delivers everything
/// buffered so far with the next chunk appended.
pub trait BufferInstance {
    fn bytes(&self) -> &[u8];

    fn len(&self) -> usize {
        self.bytes().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the buffered bytes in place.
    fn set(&mut self, data: &[u8]);
}

impl BufferInstance for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self.as_slice()
    }

    fn set(&mut self, data: &[u8]) {
        self.clear();
        self.extend_from_slice(data);
    }
}

/// Per-stream accessors and actions provided by the host.
pub trait FilterCallbacks {
    /// Client socket address as `ip:port`.
    fn downstream_remote_address(&self) -> String;

    /// Local socket address the client connected to, as `ip:port`.
    fn downstream_local_address(&self) -> String;

    /// Upstream response status, once known.
    fn response_code(&self) -> Option<u16>;

    fn send_local_reply(&self, reply: LocalReply);
}
