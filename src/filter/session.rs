use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::directives::{BodyErrorPolicy, FilterConfig};
use crate::engine::Interruption;
use crate::observability::FilterMetrics;

use super::address::{parse_socket_address, server_name};
use super::host::{
    BufferInstance, DestroyReason, FilterCallbacks, FilterStatus, HeaderMap, LocalReply,
    RequestHeaderMap,
};
use super::lifecycle::TransactionScope;
use super::phase::{Phase, PhaseCursor};
use super::reply::{Latch, ReplyBridge, STATUS_BAD_REQUEST, STATUS_FORBIDDEN};

/// Protocol assumed when the host cannot report one.
pub const DEFAULT_PROTOCOL: &str = "HTTP/2.0";

/// A verdict that ends the exchange with a local reply.
#[derive(Debug, Clone)]
struct Rejection {
    status: u16,
    details: &'static str,
    payload: Option<String>,
}

impl Rejection {
    fn new(status: u16, details: &'static str) -> Self {
        Rejection {
            status,
            details,
            payload: None,
        }
    }

    /// Carry the engine's replacement payload, if any, into the reply body.
    fn with_payload(mut self, it: &Interruption) -> Self {
        self.payload = it.payload.clone();
        self
    }

    fn into_reply(self) -> LocalReply {
        let reply = LocalReply::new(self.status, self.details);
        match self.payload {
            Some(body) => reply.with_body(body),
            None => reply,
        }
    }
}

/// Outcome of response body evaluation that is not a plain continue.
#[derive(Debug, Clone)]
enum Disruption {
    Reply(Rejection),
    SuppressBody,
}

impl From<Rejection> for Disruption {
    fn from(rejection: Rejection) -> Self {
        Disruption::Reply(rejection)
    }
}

/// Bytes of one body direction already handed to the engine.
///
/// After a stop-and-buffer the host re-delivers the whole accumulated
/// buffer, so only the suffix past `written` is new.
#[derive(Debug, Default, Clone, Copy)]
struct BodyWindow {
    written: usize,
}

impl BodyWindow {
    fn unseen<'a>(&mut self, data: &'a [u8]) -> &'a [u8] {
        if data.len() < self.written {
            debug!(
                buffered = data.len(),
                written = self.written,
                "Buffer shorter than bytes already written, treating it as a fresh delivery"
            );
            self.written = 0;
        }
        &data[self.written..]
    }

    fn mark(&mut self, buffered: usize) {
        self.written = buffered;
    }

    /// The host forwarded and dropped its buffer.
    fn drained(&mut self) {
        self.written = 0;
    }
}

/// Per-stream inspection state machine.
///
/// Maps host callbacks onto engine phases for one request/response exchange.
/// The transaction is opened on request headers and released exactly once,
/// from [`on_destroy`](Self::on_destroy) or, failing that, on drop.
pub struct WafFilter<C: FilterCallbacks> {
    callbacks: C,
    config: Arc<FilterConfig>,
    metrics: Arc<FilterMetrics>,
    scope: Option<TransactionScope>,
    protocol: String,
    cursor: PhaseCursor,
    reply: ReplyBridge,
    request_body: BodyWindow,
    response_body: BodyWindow,
    response_headers_forwarded: bool,
}

impl<C: FilterCallbacks> WafFilter<C> {
    pub fn new(callbacks: C, config: Arc<FilterConfig>, metrics: Arc<FilterMetrics>) -> Self {
        WafFilter {
            callbacks,
            config,
            metrics,
            scope: None,
            protocol: String::new(),
            cursor: PhaseCursor::new(),
            reply: ReplyBridge::new(),
            request_body: BodyWindow::default(),
            response_body: BodyWindow::default(),
            response_headers_forwarded: false,
        }
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn phase(&self) -> Phase {
        self.cursor.current()
    }

    pub fn latch(&self) -> Option<Latch> {
        self.reply.latch()
    }

    pub fn is_interrupted(&self) -> bool {
        self.reply.is_interrupted()
    }

    /// True while a transaction is open for this stream.
    pub fn is_inspecting(&self) -> bool {
        self.scope.is_some()
    }

    /// Rule set bound to this stream, if inspection started.
    pub fn rule_set(&self) -> Option<&str> {
        self.scope.as_ref().map(|s| s.rule_set())
    }

    pub fn decode_headers<H: RequestHeaderMap + ?Sized>(
        &mut self,
        headers: &H,
        _end_stream: bool,
    ) -> FilterStatus {
        if self.scope.is_some() || self.reply.is_interrupted() {
            return FilterStatus::Continue;
        }
        match self.inspect_request_headers(headers) {
            Ok(status) => status,
            Err(rejection) => self.reject(rejection),
        }
    }

    pub fn decode_data<B: BufferInstance + ?Sized>(
        &mut self,
        buffer: &mut B,
        end_stream: bool,
    ) -> FilterStatus {
        if self.reply.is_interrupted() {
            debug!("Interruption already handled");
            return FilterStatus::LocalReply;
        }
        match self.inspect_request_body(buffer.bytes(), end_stream) {
            Ok(status) => status,
            Err(rejection) => self.reject(rejection),
        }
    }

    pub fn decode_trailers<H: HeaderMap + ?Sized>(&mut self, _trailers: &H) -> FilterStatus {
        FilterStatus::Continue
    }

    pub fn encode_headers<H: HeaderMap + ?Sized>(
        &mut self,
        headers: &H,
        _end_stream: bool,
    ) -> FilterStatus {
        if self.reply.is_interrupted() {
            debug!("Interruption already handled, sending the local reply downstream");
            return FilterStatus::Continue;
        }
        match self.inspect_response_headers(headers) {
            Ok(status) => status,
            Err(rejection) => self.reject(rejection),
        }
    }

    pub fn encode_data<B: BufferInstance + ?Sized>(
        &mut self,
        buffer: &mut B,
        end_stream: bool,
    ) -> FilterStatus {
        match self.reply.latch() {
            Some(Latch::Suppressed) => return self.reply.suppress(buffer),
            Some(Latch::Blocked(_)) => return FilterStatus::Continue,
            None => {}
        }
        match self.inspect_response_body(buffer.bytes(), end_stream) {
            Ok(status) => status,
            Err(Disruption::Reply(rejection)) => self.reject(rejection),
            Err(Disruption::SuppressBody) => {
                self.metrics.record_suppression();
                self.reply.suppress(buffer)
            }
        }
    }

    pub fn encode_trailers<H: HeaderMap + ?Sized>(&mut self, _trailers: &H) -> FilterStatus {
        FilterStatus::Continue
    }

    pub fn on_log(&mut self) {}

    /// Stream teardown. Runs the finalizer; later calls are no-ops.
    pub fn on_destroy(&mut self, reason: DestroyReason) {
        self.finish(reason);
    }

    fn reject(&mut self, rejection: Rejection) -> FilterStatus {
        if !self.reply.is_interrupted() {
            self.metrics.record_block(rejection.status);
        }
        self.reply.block(&self.callbacks, rejection.into_reply())
    }

    fn inspect_request_headers<H: RequestHeaderMap + ?Sized>(
        &mut self,
        headers: &H,
    ) -> Result<FilterStatus, Rejection> {
        let host = headers.host();
        let Some(engine) = self.config.registry().select(host).cloned() else {
            debug!("No Host, skipping inspection");
            self.metrics.record_stream(false);
            return Ok(FilterStatus::Continue);
        };
        self.metrics.record_stream(true);

        let scope = self.scope.insert(TransactionScope::open(&engine));
        scope.add_request_header("Host", host);

        let server = server_name(host).map_err(|e| {
            info!(host, error = %e, "Failed to parse server name from Host");
            Rejection::new(STATUS_BAD_REQUEST, "Failed to parse server name from Host")
        })?;
        scope.set_server_name(server);

        if scope.is_rule_engine_off() {
            debug!(tx_id = %scope.id(), "Rule engine off, passing stream through");
            return Ok(FilterStatus::Continue);
        }

        let remote = self.callbacks.downstream_remote_address();
        let (client_ip, client_port) = parse_socket_address(&remote).map_err(|e| {
            info!(address = %remote, error = %e, "Malformed downstream remote address");
            Rejection::new(STATUS_BAD_REQUEST, "RemotePort formatting error")
        })?;
        let local = self.callbacks.downstream_local_address();
        let (server_ip, server_port) = parse_socket_address(&local).map_err(|e| {
            info!(address = %local, error = %e, "Malformed downstream local address");
            Rejection::new(STATUS_BAD_REQUEST, "LocalPort formatting error")
        })?;
        scope.process_connection(client_ip, client_port, server_ip, server_port);
        self.cursor.advance(Phase::ConnectionOpened);

        let protocol = match headers.protocol() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => {
                warn!(
                    tx_id = %scope.id(),
                    fallback = DEFAULT_PROTOCOL,
                    "Protocol unavailable from host"
                );
                DEFAULT_PROTOCOL.to_string()
            }
        };
        scope.process_uri(headers.path(), headers.method(), &protocol);
        self.protocol = protocol;

        for (key, value) in headers.iter() {
            scope.add_request_header(key, value);
        }

        self.cursor.advance(Phase::RequestHeadersEvaluated);
        if let Some(it) = scope.process_request_headers() {
            log_interruption(scope, &it, "request_headers");
            let rejection =
                Rejection::new(STATUS_FORBIDDEN, "Reject because of bad request header");
            return Err(rejection.with_payload(&it));
        }

        Ok(FilterStatus::Continue)
    }

    fn inspect_request_body(
        &mut self,
        data: &[u8],
        end_stream: bool,
    ) -> Result<FilterStatus, Rejection> {
        if self.cursor.reached(Phase::RequestBodyEvaluated) {
            return Ok(FilterStatus::Continue);
        }
        let Some(scope) = self.scope.as_mut() else {
            return Ok(FilterStatus::Continue);
        };
        if scope.is_rule_engine_off() {
            return Ok(FilterStatus::Continue);
        }
        let policy = self.config.body_error_policy();

        if !scope.is_request_body_accessible() {
            debug!(tx_id = %scope.id(), "Skipping request body inspection, body access is off");
            self.cursor.advance(Phase::RequestBodyEvaluated);
            return evaluate_request_body(scope, policy, &self.metrics);
        }

        let unseen = self.request_body.unseen(data);
        if !unseen.is_empty() {
            match scope.write_request_body(unseen) {
                Ok(None) => self.request_body.mark(data.len()),
                Ok(Some(it)) => {
                    log_interruption(scope, &it, "request_body_write");
                    let rejection = Rejection::new(STATUS_BAD_REQUEST, "RequestBody is over limit");
                    return Err(rejection.with_payload(&it));
                }
                Err(e) => {
                    self.metrics.record_engine_error();
                    warn!(tx_id = %scope.id(), error = %e, "Failed to write request body");
                    self.request_body.drained();
                    return Ok(FilterStatus::Continue);
                }
            }
        }

        if end_stream {
            self.cursor.advance(Phase::RequestBodyEvaluated);
            return evaluate_request_body(scope, policy, &self.metrics);
        }

        Ok(FilterStatus::StopAndBuffer)
    }

    fn inspect_response_headers<H: HeaderMap + ?Sized>(
        &mut self,
        headers: &H,
    ) -> Result<FilterStatus, Rejection> {
        let Some(scope) = self.scope.as_mut() else {
            return Ok(FilterStatus::Continue);
        };
        if scope.is_rule_engine_off() {
            return Ok(FilterStatus::Continue);
        }

        if self.cursor.advance(Phase::RequestBodyEvaluated) {
            debug!(
                tx_id = %scope.id(),
                "Request body phase pending, evaluating before response headers"
            );
            match scope.process_request_body() {
                Ok(None) => {}
                Ok(Some(it)) => {
                    log_interruption(scope, &it, "request_body");
                    let rejection =
                        Rejection::new(STATUS_FORBIDDEN, "Reject because of bad request body");
                    return Err(rejection.with_payload(&it));
                }
                Err(e) => {
                    self.metrics.record_engine_error();
                    warn!(tx_id = %scope.id(), error = %e, "Failed to process request body");
                }
            }
        }

        let status = self.callbacks.response_code().unwrap_or(0);
        for (key, value) in headers.iter() {
            scope.add_response_header(key, value);
        }

        self.cursor.advance(Phase::ResponseHeadersEvaluated);
        if let Some(it) = scope.process_response_headers(status, &self.protocol) {
            log_interruption(scope, &it, "response_headers");
            let rejection =
                Rejection::new(STATUS_FORBIDDEN, "Reject because of bad response header");
            return Err(rejection.with_payload(&it));
        }

        self.response_headers_forwarded = true;
        Ok(FilterStatus::Continue)
    }

    fn inspect_response_body(
        &mut self,
        data: &[u8],
        end_stream: bool,
    ) -> Result<FilterStatus, Disruption> {
        if self.cursor.reached(Phase::ResponseBodyEvaluated) {
            return Ok(FilterStatus::Continue);
        }
        let Some(scope) = self.scope.as_mut() else {
            return Ok(FilterStatus::Continue);
        };
        if scope.is_rule_engine_off() {
            return Ok(FilterStatus::Continue);
        }
        let committed = self.response_headers_forwarded;

        if !scope.is_response_body_accessible() {
            debug!(tx_id = %scope.id(), "Skipping response body inspection, body access is off");
            self.cursor.advance(Phase::ResponseBodyEvaluated);
            return evaluate_response_body(scope, committed, &self.metrics);
        }

        let unseen = self.response_body.unseen(data);
        if !unseen.is_empty() {
            match scope.write_response_body(unseen) {
                Ok(None) => self.response_body.mark(data.len()),
                Ok(Some(it)) => {
                    log_interruption(scope, &it, "response_body_write");
                    let rejection =
                        Rejection::new(STATUS_BAD_REQUEST, "ResponseBody is over limit");
                    return Err(rejection.with_payload(&it).into());
                }
                Err(e) => {
                    self.metrics.record_engine_error();
                    warn!(tx_id = %scope.id(), error = %e, "Failed to write response body");
                    self.response_body.drained();
                    return Ok(FilterStatus::Continue);
                }
            }
        }

        if end_stream {
            self.cursor.advance(Phase::ResponseBodyEvaluated);
            return evaluate_response_body(scope, committed, &self.metrics);
        }

        Ok(FilterStatus::StopAndBuffer)
    }

    /// Teardown finalizer: detection-only response body pass if it never ran,
    /// then logging and close. Runs at most once.
    fn finish(&mut self, reason: DestroyReason) {
        let Some(mut scope) = self.scope.take() else {
            return;
        };

        if self.cursor.advance(Phase::ResponseBodyEvaluated) {
            debug!(
                tx_id = %scope.id(),
                "Running response body phase at teardown, triggered actions are not enforced"
            );
            if let Err(e) = scope.process_response_body() {
                self.metrics.record_engine_error();
                info!(
                    tx_id = %scope.id(),
                    error = %e,
                    "Response body evaluation at teardown failed"
                );
            }
        }

        scope.process_logging();
        let tx_id = scope.id().to_string();
        let rule_set = scope.rule_set().to_string();
        scope.close();
        self.cursor.advance(Phase::Closed);
        self.metrics.record_close();

        info!(
            tx_id = %tx_id,
            rule_set = %rule_set,
            reason = %reason,
            interrupted = self.reply.is_interrupted(),
            "Finished"
        );
    }
}

impl<C: FilterCallbacks> Drop for WafFilter<C> {
    fn drop(&mut self) {
        self.finish(DestroyReason::Terminate);
    }
}

fn log_interruption(scope: &TransactionScope, it: &Interruption, phase: &'static str) {
    info!(
        tx_id = %scope.id(),
        rule_set = %scope.rule_set(),
        phase,
        rule_id = it.rule_id,
        engine_status = it.status,
        "Transaction interrupted"
    );
}

fn evaluate_request_body(
    scope: &mut TransactionScope,
    policy: BodyErrorPolicy,
    metrics: &FilterMetrics,
) -> Result<FilterStatus, Rejection> {
    match scope.process_request_body() {
        Ok(None) => Ok(FilterStatus::Continue),
        Ok(Some(it)) => {
            log_interruption(scope, &it, "request_body");
            let rejection = Rejection::new(STATUS_FORBIDDEN, "Reject because of bad request body");
            Err(rejection.with_payload(&it))
        }
        Err(e) => {
            metrics.record_engine_error();
            warn!(tx_id = %scope.id(), error = %e, ?policy, "Failed to process request body");
            match policy {
                BodyErrorPolicy::FailOpen => Ok(FilterStatus::Continue),
                BodyErrorPolicy::Reject => Err(Rejection::new(
                    STATUS_BAD_REQUEST,
                    "Failed to process request body",
                )),
            }
        }
    }
}

fn evaluate_response_body(
    scope: &mut TransactionScope,
    headers_forwarded: bool,
    metrics: &FilterMetrics,
) -> Result<FilterStatus, Disruption> {
    match scope.process_response_body() {
        Ok(None) => Ok(FilterStatus::Continue),
        Ok(Some(it)) => {
            log_interruption(scope, &it, "response_body");
            if headers_forwarded {
                Err(Disruption::SuppressBody)
            } else {
                let rejection =
                    Rejection::new(STATUS_FORBIDDEN, "Reject because of bad response body");
                Err(rejection.with_payload(&it).into())
            }
        }
        Err(e) => {
            metrics.record_engine_error();
            warn!(tx_id = %scope.id(), error = %e, "Failed to process response body");
            Ok(FilterStatus::Continue)
        }
    }
}
