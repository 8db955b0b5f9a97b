use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::directives::DirectiveSet;

use super::interruption::Interruption;
use super::matched::MatchedRule;

/// Errors raised by a rule engine.
///
/// During traffic these are engine faults, not verdicts: the filter logs
/// them and lets the stream continue.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to read directives file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directive parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("phase {0} already evaluated")]
    PhaseRepeated(&'static str),

    #[error("transaction is closed")]
    Closed,

    #[error("engine fault: {0}")]
    Internal(String),
}

/// Receives rule matches as the engine raises them.
pub trait MatchSink: Send + Sync {
    fn on_match(&self, matched: &MatchedRule);
}

/// A compiled rule set capable of opening transactions.
///
/// Instances are immutable once compiled and shared by every stream
/// routed to them.
pub trait RuleEngine: Send + Sync + Debug {
    /// Name of the directive set this engine was compiled from.
    fn name(&self) -> &str;

    /// Open a new transaction bound to this engine.
    fn new_transaction(&self) -> Box<dyn Transaction>;
}

/// Per-stream engine state carried across all phases of one exchange.
///
/// Phase methods must be called in order and at most once each; the
/// filter's phase cursor guarantees this.
pub trait Transaction: Send {
    /// Unique transaction identifier.
    fn id(&self) -> &str;

    /// True when the engine is switched off for this transaction.
    fn is_rule_engine_off(&self) -> bool;

    /// True when request body bytes should be written for inspection.
    fn is_request_body_accessible(&self) -> bool;

    /// True when response body bytes should be written for inspection.
    fn is_response_body_accessible(&self) -> bool;

    fn set_server_name(&mut self, server_name: &str);

    fn process_connection(
        &mut self,
        client_ip: &str,
        client_port: u16,
        server_ip: &str,
        server_port: u16,
    );

    fn process_uri(&mut self, uri: &str, method: &str, protocol: &str);

    fn add_request_header(&mut self, key: &str, value: &str);

    /// Evaluate the request headers phase.
    fn process_request_headers(&mut self) -> Option<Interruption>;

    /// Buffer request body bytes. An interruption here means a size limit was hit.
    fn write_request_body(&mut self, data: &[u8]) -> Result<Option<Interruption>, EngineError>;

    /// Evaluate the request body phase.
    fn process_request_body(&mut self) -> Result<Option<Interruption>, EngineError>;

    fn add_response_header(&mut self, key: &str, value: &str);

    /// Evaluate the response headers phase.
    fn process_response_headers(&mut self, status: u16, protocol: &str) -> Option<Interruption>;

    /// Buffer response body bytes. An interruption here means a size limit was hit.
    fn write_response_body(&mut self, data: &[u8]) -> Result<Option<Interruption>, EngineError>;

    /// Evaluate the response body phase.
    fn process_response_body(&mut self) -> Result<Option<Interruption>, EngineError>;

    /// Evaluate logging-phase rules. Never interrupts.
    fn process_logging(&mut self);

    /// Release engine resources.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// Compiles a directive set into a rule engine instance.
pub trait EngineCompiler: Send + Sync {
    fn compile(
        &self,
        name: &str,
        directives: &DirectiveSet,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Arc<dyn RuleEngine>, EngineError>;
}
