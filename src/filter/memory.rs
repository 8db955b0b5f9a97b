//! In-memory host: drives one exchange through a [`WafFilter`] the way a
//! proxy would, including stop-and-buffer accumulation and local replies.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use super::factory::FilterFactory;
use super::host::{
    DestroyReason, FilterCallbacks, FilterStatus, HeaderMap, LocalReply, RequestHeaderMap,
};
use super::reply::Latch;
use super::session::WafFilter;

/// Plain ordered header list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }
}

impl HeaderMap for Headers {
    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(self.0.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Request line, Host and headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub host: String,
    pub path: String,
    pub protocol: Option<String>,
    pub headers: Headers,
}

impl RequestHead {
    pub fn new(
        method: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        RequestHead {
            method: method.into(),
            host: host.into(),
            path: path.into(),
            protocol: None,
            headers: Headers::default(),
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(key, value);
        self
    }
}

impl HeaderMap for RequestHead {
    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        self.headers.iter()
    }
}

impl RequestHeaderMap for RequestHead {
    fn host(&self) -> &str {
        &self.host
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }
}

/// A full request as the client sends it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub head: RequestHead,
    pub body: Vec<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(head: RequestHead) -> Self {
        HttpRequest { head, body: Vec::new() }
    }

    pub fn with_chunk(mut self, chunk: impl Into<Vec<u8>>) -> Self {
        self.body.push(chunk.into());
        self
    }
}

/// A full response as the upstream returns it.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<Vec<u8>>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        HttpResponse {
            status,
            headers: Headers::default(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(key, value);
        self
    }

    pub fn with_chunk(mut self, chunk: impl Into<Vec<u8>>) -> Self {
        self.body.push(chunk.into());
        self
    }
}

#[derive(Debug, Default)]
struct HostState {
    remote_address: String,
    local_address: String,
    response_code: Option<u16>,
    replies: Vec<LocalReply>,
}

/// Callback handle shared between the host and the filter.
#[derive(Debug, Clone, Default)]
pub struct MemoryCallbacks {
    state: Arc<Mutex<HostState>>,
}

impl MemoryCallbacks {
    pub fn new(remote_address: impl Into<String>, local_address: impl Into<String>) -> Self {
        MemoryCallbacks {
            state: Arc::new(Mutex::new(HostState {
                remote_address: remote_address.into(),
                local_address: local_address.into(),
                ..HostState::default()
            })),
        }
    }

    pub fn set_response_code(&self, code: u16) {
        self.state.lock().response_code = Some(code);
    }

    /// Local replies the filter has sent, in order.
    pub fn replies(&self) -> Vec<LocalReply> {
        self.state.lock().replies.clone()
    }
}

impl FilterCallbacks for MemoryCallbacks {
    fn downstream_remote_address(&self) -> String {
        self.state.lock().remote_address.clone()
    }

    fn downstream_local_address(&self) -> String {
        self.state.lock().local_address.clone()
    }

    fn response_code(&self) -> Option<u16> {
        self.state.lock().response_code
    }

    fn send_local_reply(&self, reply: LocalReply) {
        self.state.lock().replies.push(reply);
    }
}

/// What the client and the upstream observed for one exchange.
#[derive(Debug, Clone, Serialize)]
pub struct StreamOutcome {
    /// Status the client received
    pub status: u16,
    /// Body the client received
    #[serde(with = "lossy_body")]
    pub body: Vec<u8>,
    /// Whether the request was forwarded upstream at all
    pub upstream_reached: bool,
    /// Request body bytes the upstream received
    #[serde(with = "lossy_body")]
    pub upstream_body: Vec<u8>,
    /// Local reply details, when one replaced the exchange
    pub reply: Option<String>,
    pub body_suppressed: bool,
    pub rule_set: Option<String>,
}

mod lossy_body {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(body))
    }
}

/// Drives one exchange through a filter.
pub struct MemoryStream {
    remote_address: String,
    local_address: String,
}

impl Default for MemoryStream {
    fn default() -> Self {
        MemoryStream {
            remote_address: "127.0.0.1:40000".to_string(),
            local_address: "127.0.0.1:8080".to_string(),
        }
    }
}

impl MemoryStream {
    pub fn new(remote_address: impl Into<String>, local_address: impl Into<String>) -> Self {
        MemoryStream {
            remote_address: remote_address.into(),
            local_address: local_address.into(),
        }
    }

    /// Run the exchange and tear the stream down.
    pub fn run(
        &self,
        factory: &FilterFactory,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> StreamOutcome {
        let callbacks = MemoryCallbacks::new(&self.remote_address, &self.local_address);
        let mut filter = factory.create(callbacks.clone());

        let mut upstream_body = Vec::new();
        let mut downstream_body = Vec::new();
        let mut upstream_reached = false;
        let mut body_suppressed = false;

        'exchange: {
            let end = request.body.is_empty();
            if filter.decode_headers(&request.head, end) == FilterStatus::LocalReply {
                break 'exchange;
            }
            let Some(forwarded) = pump(&request.body, |buf, end| filter.decode_data(buf, end))
            else {
                break 'exchange;
            };
            upstream_body = forwarded;
            upstream_reached = true;

            callbacks.set_response_code(response.status);
            let end = response.body.is_empty();
            if filter.encode_headers(&response.headers, end) == FilterStatus::LocalReply {
                break 'exchange;
            }
            let Some(forwarded) = pump(&response.body, |buf, end| filter.encode_data(buf, end))
            else {
                break 'exchange;
            };
            body_suppressed = filter.latch() == Some(Latch::Suppressed);
            downstream_body = forwarded;
        }

        let rule_set = filter.rule_set().map(str::to_string);
        let reply = callbacks.replies().into_iter().next();
        let outcome = match reply {
            Some(reply) => {
                // The local reply travels back through the encode path.
                let headers = reply
                    .headers
                    .iter()
                    .fold(Headers::default(), |h, (k, v)| h.with(k, v));
                filter.encode_headers(&headers, reply.body.is_empty());
                let mut body = reply.body.clone().into_bytes();
                if !body.is_empty() {
                    filter.encode_data(&mut body, true);
                }
                StreamOutcome {
                    status: reply.status,
                    body,
                    upstream_reached,
                    upstream_body,
                    reply: Some(reply.details),
                    body_suppressed: false,
                    rule_set,
                }
            }
            None => StreamOutcome {
                status: response.status,
                body: downstream_body,
                upstream_reached,
                upstream_body,
                reply: None,
                body_suppressed,
                rule_set,
            },
        };

        filter.on_log();
        filter.on_destroy(DestroyReason::Normal);
        outcome
    }
}

/// Feed chunks through a data callback with host buffering semantics.
///
/// Returns the bytes forwarded, or `None` when a local reply ended the stream.
fn pump<F>(chunks: &[Vec<u8>], mut on_data: F) -> Option<Vec<u8>>
where
    F: FnMut(&mut Vec<u8>, bool) -> FilterStatus,
{
    let mut forwarded = Vec::new();
    let mut buffer = Vec::new();

    for (i, chunk) in chunks.iter().enumerate() {
        buffer.extend_from_slice(chunk);
        let end = i + 1 == chunks.len();
        match on_data(&mut buffer, end) {
            FilterStatus::Continue => forwarded.append(&mut buffer),
            FilterStatus::StopAndBuffer => {}
            FilterStatus::LocalReply => return None,
        }
    }
    forwarded.append(&mut buffer);

    Some(forwarded)
}

/// Filter handle for a standalone stream, mostly for benches.
pub fn filter_for(factory: &FilterFactory) -> WafFilter<MemoryCallbacks> {
    factory.create(MemoryCallbacks::new("127.0.0.1:40000", "127.0.0.1:8080"))
}
