//! Scriptable engine double that records every call made on its transactions.

use parking_lot::Mutex;
use std::sync::Arc;

use super::interruption::Interruption;
use super::traits::{EngineError, RuleEngine, Transaction};

/// Outcome a scripted call produces.
#[derive(Debug, Clone, Default)]
pub enum Step {
    #[default]
    Allow,
    Block(Interruption),
    Fail,
}

impl Step {
    fn verdict(&self) -> Result<Option<Interruption>, EngineError> {
        match self {
            Step::Allow => Ok(None),
            Step::Block(it) => Ok(Some(it.clone())),
            Step::Fail => Err(EngineError::Internal("scripted failure".to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Script {
    pub engine_off: bool,
    pub request_body_access: bool,
    pub response_body_access: bool,
    pub request_headers: Step,
    pub request_body_write: Step,
    pub request_body: Step,
    pub response_headers: Step,
    pub response_body_write: Step,
    pub response_body: Step,
}

impl Default for Script {
    fn default() -> Self {
        Script {
            engine_off: false,
            request_body_access: true,
            response_body_access: true,
            request_headers: Step::Allow,
            request_body_write: Step::Allow,
            request_body: Step::Allow,
            response_headers: Step::Allow,
            response_body_write: Step::Allow,
            response_body: Step::Allow,
        }
    }
}

/// Calls observed across all transactions of one engine.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
    request_body: Mutex<Vec<u8>>,
    response_body: Mutex<Vec<u8>>,
}

impl CallLog {
    fn push(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls named `name`, with or without a `:detail` suffix.
    pub fn count(&self, name: &str) -> usize {
        let prefix = format!("{}:", name);
        self.calls
            .lock()
            .iter()
            .filter(|c| c.as_str() == name || c.starts_with(&prefix))
            .count()
    }

    pub fn request_body(&self) -> Vec<u8> {
        self.request_body.lock().clone()
    }

    pub fn response_body(&self) -> Vec<u8> {
        self.response_body.lock().clone()
    }

    /// Position of the first call named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        let prefix = format!("{}:", name);
        self.calls
            .lock()
            .iter()
            .position(|c| c.as_str() == name || c.starts_with(&prefix))
    }
}

#[derive(Debug)]
pub struct RecordingEngine {
    name: String,
    script: Script,
    log: Arc<CallLog>,
}

impl RecordingEngine {
    pub fn new(name: &str) -> Self {
        Self::with_script(name, Script::default())
    }

    pub fn with_script(name: &str, script: Script) -> Self {
        RecordingEngine {
            name: name.to_string(),
            script,
            log: Arc::new(CallLog::default()),
        }
    }

    pub fn log(&self) -> Arc<CallLog> {
        self.log.clone()
    }
}

impl RuleEngine for RecordingEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_transaction(&self) -> Box<dyn Transaction> {
        self.log.push("open");
        Box::new(RecordingTransaction {
            id: format!("{}-tx", self.name),
            script: self.script.clone(),
            log: self.log.clone(),
        })
    }
}

struct RecordingTransaction {
    id: String,
    script: Script,
    log: Arc<CallLog>,
}

impl Transaction for RecordingTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_rule_engine_off(&self) -> bool {
        self.script.engine_off
    }

    fn is_request_body_accessible(&self) -> bool {
        self.script.request_body_access
    }

    fn is_response_body_accessible(&self) -> bool {
        self.script.response_body_access
    }

    fn set_server_name(&mut self, server_name: &str) {
        self.log.push(format!("set_server_name:{}", server_name));
    }

    fn process_connection(
        &mut self,
        client_ip: &str,
        client_port: u16,
        server_ip: &str,
        server_port: u16,
    ) {
        self.log.push(format!(
            "process_connection:{}:{}->{}:{}",
            client_ip, client_port, server_ip, server_port
        ));
    }

    fn process_uri(&mut self, uri: &str, method: &str, protocol: &str) {
        self.log.push(format!("process_uri:{} {} {}", method, uri, protocol));
    }

    fn add_request_header(&mut self, key: &str, value: &str) {
        self.log.push(format!("add_request_header:{}={}", key, value));
    }

    fn process_request_headers(&mut self) -> Option<Interruption> {
        self.log.push("process_request_headers");
        self.script.request_headers.verdict().ok().flatten()
    }

    fn write_request_body(&mut self, data: &[u8]) -> Result<Option<Interruption>, EngineError> {
        self.log.push(format!("write_request_body:{}", data.len()));
        self.log.request_body.lock().extend_from_slice(data);
        self.script.request_body_write.verdict()
    }

    fn process_request_body(&mut self) -> Result<Option<Interruption>, EngineError> {
        self.log.push("process_request_body");
        self.script.request_body.verdict()
    }

    fn add_response_header(&mut self, key: &str, value: &str) {
        self.log.push(format!("add_response_header:{}={}", key, value));
    }

    fn process_response_headers(&mut self, status: u16, protocol: &str) -> Option<Interruption> {
        self.log.push(format!("process_response_headers:{} {}", status, protocol));
        self.script.response_headers.verdict().ok().flatten()
    }

    fn write_response_body(&mut self, data: &[u8]) -> Result<Option<Interruption>, EngineError> {
        self.log.push(format!("write_response_body:{}", data.len()));
        self.log.response_body.lock().extend_from_slice(data);
        self.script.response_body_write.verdict()
    }

    fn process_response_body(&mut self) -> Result<Option<Interruption>, EngineError> {
        self.log.push("process_response_body");
        self.script.response_body.verdict()
    }

    fn process_logging(&mut self) {
        self.log.push("process_logging");
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.log.push("close");
        Ok(())
    }
}
