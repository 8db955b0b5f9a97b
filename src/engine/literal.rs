//! Literal-match rule engine.
//!
//! A deliberately small engine: rules match a case-insensitive substring
//! against one target of the exchange. It exists so the filter can run and
//! be tested without an external engine; production rule languages plug in
//! through [`EngineCompiler`].
//!
//! ```text
//! engine on|off|detection_only
//! request_body_access on|off
//! response_body_access on|off
//! request_body_limit 13107200
//! response_body_limit 524288
//! rule id=1001 phase=request_headers target=header:user-agent contains="sqlmap" severity=critical msg="scanner"
//! ```

use std::fmt;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::directives::DirectiveSet;

use super::interruption::Interruption;
use super::matched::{MatchedRule, Severity};
use super::traits::{EngineCompiler, EngineError, MatchSink, RuleEngine, Transaction};

pub const DEFAULT_REQUEST_BODY_LIMIT: usize = 13_107_200;
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 524_288;

/// Longest matched value copied into a match record.
const MAX_MATCH_DATA: usize = 128;

/// Engine operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    On,
    Off,
    DetectionOnly,
}

/// Phase a rule is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RulePhase {
    RequestHeaders = 0,
    RequestBody = 1,
    ResponseHeaders = 2,
    ResponseBody = 3,
    Logging = 4,
}

impl RulePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RulePhase::RequestHeaders => "request_headers",
            RulePhase::RequestBody => "request_body",
            RulePhase::ResponseHeaders => "response_headers",
            RulePhase::ResponseBody => "response_body",
            RulePhase::Logging => "logging",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "request_headers" => Some(RulePhase::RequestHeaders),
            "request_body" => Some(RulePhase::RequestBody),
            "response_headers" => Some(RulePhase::ResponseHeaders),
            "response_body" => Some(RulePhase::ResponseBody),
            "logging" => Some(RulePhase::Logging),
            _ => None,
        }
    }

    fn is_request_side(&self) -> bool {
        matches!(self, RulePhase::RequestHeaders | RulePhase::RequestBody)
    }
}

/// What part of the exchange a rule inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Uri,
    Method,
    Protocol,
    ServerName,
    /// A single header, by lowercase name
    Header(String),
    /// Every header rendered as `name: value`
    Headers,
    Body,
    Status,
}

impl Target {
    fn parse(s: &str) -> Option<Self> {
        if let Some(name) = s.strip_prefix("header:") {
            if name.is_empty() {
                return None;
            }
            return Some(Target::Header(name.to_lowercase()));
        }
        match s {
            "uri" => Some(Target::Uri),
            "method" => Some(Target::Method),
            "protocol" => Some(Target::Protocol),
            "server_name" => Some(Target::ServerName),
            "headers" => Some(Target::Headers),
            "body" => Some(Target::Body),
            "status" => Some(Target::Status),
            _ => None,
        }
    }
}

/// A compiled literal rule.
#[derive(Debug, Clone)]
pub struct LiteralRule {
    pub id: u32,
    pub phase: RulePhase,
    pub target: Target,
    /// Lowercased needle
    pub needle: String,
    pub severity: Severity,
    pub status: u16,
    pub message: String,
    pub deny: bool,
    /// Body of the local reply sent when this rule blocks
    pub reply: Option<String>,
}

/// Engine-wide settings collected from directives.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub mode: EngineMode,
    pub request_body_access: bool,
    pub response_body_access: bool,
    pub request_body_limit: usize,
    pub response_body_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            mode: EngineMode::On,
            request_body_access: true,
            response_body_access: true,
            request_body_limit: DEFAULT_REQUEST_BODY_LIMIT,
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
        }
    }
}

struct CompiledRules {
    settings: EngineSettings,
    rules: Vec<LiteralRule>,
    sink: Arc<dyn MatchSink>,
}

/// Rule engine instance compiled from literal directives.
pub struct LiteralEngine {
    name: String,
    compiled: Arc<CompiledRules>,
}

impl LiteralEngine {
    /// Parse one or more directive sources into an engine.
    pub fn parse<'a>(
        name: impl Into<String>,
        sources: impl IntoIterator<Item = &'a str>,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Self, EngineError> {
        let mut settings = EngineSettings::default();
        let mut rules = Vec::new();

        for source in sources {
            parse_source(source, &mut settings, &mut rules)?;
        }

        Ok(LiteralEngine {
            name: name.into(),
            compiled: Arc::new(CompiledRules {
                settings,
                rules,
                sink,
            }),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.compiled.settings
    }

    pub fn rules(&self) -> &[LiteralRule] {
        &self.compiled.rules
    }
}

impl fmt::Debug for LiteralEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiteralEngine")
            .field("name", &self.name)
            .field("settings", &self.compiled.settings)
            .field("rules", &self.compiled.rules.len())
            .finish()
    }
}

impl RuleEngine for LiteralEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_transaction(&self) -> Box<dyn Transaction> {
        Box::new(LiteralTransaction::new(self.compiled.clone()))
    }
}

/// Compiler for the literal engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralCompiler;

impl EngineCompiler for LiteralCompiler {
    fn compile(
        &self,
        name: &str,
        directives: &DirectiveSet,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Arc<dyn RuleEngine>, EngineError> {
        let mut sources = vec![directives.simple_directives.join("\n")];

        for path in &directives.directives_files {
            let content = std::fs::read_to_string(path).map_err(|source| EngineError::File {
                path: path.clone(),
                source,
            })?;
            sources.push(content);
        }

        let engine = LiteralEngine::parse(name, sources.iter().map(String::as_str), sink)?;
        Ok(Arc::new(engine))
    }
}

fn parse_source(
    source: &str,
    settings: &mut EngineSettings,
    rules: &mut Vec<LiteralRule>,
) -> Result<(), EngineError> {
    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let err = |message: String| EngineError::Parse {
            line: line_no,
            message,
        };

        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((k, r)) => (k, r.trim()),
            None => (line, ""),
        };

        match keyword {
            "engine" => {
                settings.mode = match rest {
                    "on" => EngineMode::On,
                    "off" => EngineMode::Off,
                    "detection_only" => EngineMode::DetectionOnly,
                    other => return Err(err(format!("unknown engine mode '{}'", other))),
                };
            }
            "request_body_access" => {
                settings.request_body_access = parse_switch(rest).map_err(err)?
            }
            "response_body_access" => {
                settings.response_body_access = parse_switch(rest).map_err(err)?
            }
            "request_body_limit" => {
                settings.request_body_limit = rest
                    .parse()
                    .map_err(|_| err(format!("invalid byte limit '{}'", rest)))?;
            }
            "response_body_limit" => {
                settings.response_body_limit = rest
                    .parse()
                    .map_err(|_| err(format!("invalid byte limit '{}'", rest)))?;
            }
            "rule" => {
                let rule = parse_rule(rest).map_err(err)?;
                if rules.iter().any(|r| r.id == rule.id) {
                    return Err(err(format!("duplicate rule id {}", rule.id)));
                }
                rules.push(rule);
            }
            other => return Err(err(format!("unknown directive '{}'", other))),
        }
    }

    Ok(())
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected on|off, got '{}'", other)),
    }
}

fn parse_rule(args: &str) -> Result<LiteralRule, String> {
    let mut id = None;
    let mut phase = None;
    let mut target = None;
    let mut needle = None;
    let mut severity = Severity::default();
    let mut status = 403;
    let mut message = String::new();
    let mut deny = true;
    let mut reply = None;

    for (key, value) in tokenize(args)? {
        match key.as_str() {
            "id" => {
                let parsed: u32 = value
                    .parse()
                    .map_err(|_| format!("invalid rule id '{}'", value))?;
                if parsed == 0 {
                    return Err("rule id 0 is reserved".to_string());
                }
                id = Some(parsed);
            }
            "phase" => {
                phase = Some(
                    RulePhase::from_str(&value)
                        .ok_or_else(|| format!("unknown phase '{}'", value))?,
                );
            }
            "target" => {
                target = Some(
                    Target::parse(&value).ok_or_else(|| format!("unknown target '{}'", value))?,
                );
            }
            "contains" => {
                if value.is_empty() {
                    return Err("contains must not be empty".to_string());
                }
                needle = Some(value.to_lowercase());
            }
            "severity" => {
                severity = Severity::from_str(&value)
                    .ok_or_else(|| format!("unknown severity '{}'", value))?;
            }
            "status" => {
                status = value
                    .parse()
                    .ok()
                    .filter(|s| (100..600).contains(s))
                    .ok_or_else(|| format!("invalid status '{}'", value))?;
            }
            "msg" => message = value,
            "reply" => reply = Some(value),
            "action" => {
                deny = match value.as_str() {
                    "deny" => true,
                    "pass" => false,
                    other => return Err(format!("unknown action '{}'", other)),
                };
            }
            other => return Err(format!("unknown rule argument '{}'", other)),
        }
    }

    Ok(LiteralRule {
        id: id.ok_or("rule is missing id")?,
        phase: phase.ok_or("rule is missing phase")?,
        target: target.ok_or("rule is missing target")?,
        needle: needle.ok_or("rule is missing contains")?,
        severity,
        status,
        message,
        deny,
        reply,
    })
}

/// Split `key=value key="quoted value"` arguments.
fn tokenize(args: &str) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::new();
    let mut chars = args.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(format!("expected '=' after '{}'", key));
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => break,
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(format!("unterminated quote in '{}'", key));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        out.push((key, value));
    }

    Ok(out)
}

#[derive(Debug, Default)]
struct Connection {
    client_ip: String,
    client_port: u16,
    server_ip: String,
    server_port: u16,
}

/// Transaction for the literal engine.
pub struct LiteralTransaction {
    id: String,
    compiled: Arc<CompiledRules>,
    server_name: String,
    connection: Option<Connection>,
    uri: String,
    method: String,
    protocol: String,
    request_headers: Vec<(String, String)>,
    request_body: Vec<u8>,
    response_status: u16,
    response_headers: Vec<(String, String)>,
    response_body: Vec<u8>,
    evaluated: [bool; 5],
    interruption: Option<Interruption>,
    closed: bool,
}

impl LiteralTransaction {
    fn new(compiled: Arc<CompiledRules>) -> Self {
        LiteralTransaction {
            id: Uuid::new_v4().to_string(),
            compiled,
            server_name: String::new(),
            connection: None,
            uri: String::new(),
            method: String::new(),
            protocol: String::new(),
            request_headers: Vec::new(),
            request_body: Vec::new(),
            response_status: 0,
            response_headers: Vec::new(),
            response_body: Vec::new(),
            evaluated: [false; 5],
            interruption: None,
            closed: false,
        }
    }

    fn mode(&self) -> EngineMode {
        self.compiled.settings.mode
    }

    fn evaluate(&mut self, phase: RulePhase) -> Result<Option<Interruption>, EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        let slot = phase as usize;
        if self.evaluated[slot] {
            return Err(EngineError::PhaseRepeated(phase.as_str()));
        }
        self.evaluated[slot] = true;

        // Logging rules run regardless of mode or interruption.
        if phase != RulePhase::Logging {
            if self.mode() == EngineMode::Off {
                return Ok(None);
            }
            if self.interruption.is_some() {
                return Ok(self.interruption.clone());
            }
        }

        let compiled = self.compiled.clone();
        for rule in compiled.rules.iter().filter(|r| r.phase == phase) {
            let Some(data) = self.match_target(rule, phase) else {
                continue;
            };

            let disruptive =
                rule.deny && self.mode() == EngineMode::On && phase != RulePhase::Logging;
            compiled.sink.on_match(&MatchedRule {
                tx_id: self.id.clone(),
                rule_id: rule.id,
                severity: rule.severity,
                phase: phase.as_str().to_string(),
                message: rule.message.clone(),
                data,
                disruptive,
            });

            if disruptive {
                let mut interruption = Interruption::rule(rule.id, rule.status);
                if let Some(reply) = &rule.reply {
                    interruption = interruption.with_payload(reply.as_str());
                }
                self.interruption = Some(interruption.clone());
                return Ok(Some(interruption));
            }
        }

        Ok(None)
    }

    fn match_target(&self, rule: &LiteralRule, phase: RulePhase) -> Option<String> {
        let hit = |value: &str| value.to_lowercase().contains(&rule.needle);
        let request_side = phase.is_request_side();
        let logging = phase == RulePhase::Logging;

        let mut headers: Vec<&(String, String)> = Vec::new();
        if request_side || logging {
            headers.extend(self.request_headers.iter());
        }
        if !request_side || logging {
            headers.extend(self.response_headers.iter());
        }

        let found = match &rule.target {
            Target::Uri => Some(self.uri.clone()).filter(|v| hit(v.as_str())),
            Target::Method => Some(self.method.clone()).filter(|v| hit(v.as_str())),
            Target::Protocol => Some(self.protocol.clone()).filter(|v| hit(v.as_str())),
            Target::ServerName => Some(self.server_name.clone()).filter(|v| hit(v.as_str())),
            Target::Status => Some(self.response_status.to_string()).filter(|v| hit(v.as_str())),
            Target::Header(name) => headers
                .iter()
                .filter(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
                .find(|v| hit(v.as_str())),
            Target::Headers => headers
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .find(|v| hit(v.as_str())),
            Target::Body => {
                let mut bodies: Vec<&[u8]> = Vec::new();
                if request_side || logging {
                    bodies.push(&self.request_body);
                }
                if !request_side || logging {
                    bodies.push(&self.response_body);
                }
                bodies
                    .into_iter()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .find(|v| hit(v.as_str()))
            }
        };

        found.map(|mut v| {
            if v.len() > MAX_MATCH_DATA {
                let mut cut = MAX_MATCH_DATA;
                while !v.is_char_boundary(cut) {
                    cut -= 1;
                }
                v.truncate(cut);
            }
            v
        })
    }

    fn write_body(
        &mut self,
        request: bool,
        data: &[u8],
    ) -> Result<Option<Interruption>, EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        let mode = self.mode();
        let settings = &self.compiled.settings;
        let (buffer, limit) = if request {
            (&mut self.request_body, settings.request_body_limit)
        } else {
            (&mut self.response_body, settings.response_body_limit)
        };

        if mode == EngineMode::Off {
            return Ok(None);
        }

        let room = limit.saturating_sub(buffer.len());
        if data.len() <= room {
            buffer.extend_from_slice(data);
            return Ok(None);
        }

        buffer.extend_from_slice(&data[..room]);
        if mode == EngineMode::On {
            Ok(Some(Interruption::body_limit()))
        } else {
            Ok(None)
        }
    }

    fn header_phase(&mut self, phase: RulePhase) -> Option<Interruption> {
        match self.evaluate(phase) {
            Ok(interruption) => interruption,
            Err(e) => {
                warn!(
                    tx_id = %self.id,
                    phase = phase.as_str(),
                    error = %e,
                    "Header phase evaluation failed"
                );
                None
            }
        }
    }
}

impl Transaction for LiteralTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_rule_engine_off(&self) -> bool {
        self.mode() == EngineMode::Off
    }

    fn is_request_body_accessible(&self) -> bool {
        self.compiled.settings.request_body_access
    }

    fn is_response_body_accessible(&self) -> bool {
        self.compiled.settings.response_body_access
    }

    fn set_server_name(&mut self, server_name: &str) {
        self.server_name = server_name.to_string();
    }

    fn process_connection(
        &mut self,
        client_ip: &str,
        client_port: u16,
        server_ip: &str,
        server_port: u16,
    ) {
        self.connection = Some(Connection {
            client_ip: client_ip.to_string(),
            client_port,
            server_ip: server_ip.to_string(),
            server_port,
        });
    }

    fn process_uri(&mut self, uri: &str, method: &str, protocol: &str) {
        self.uri = uri.to_string();
        self.method = method.to_string();
        self.protocol = protocol.to_string();
    }

    fn add_request_header(&mut self, key: &str, value: &str) {
        self.request_headers.push((key.to_string(), value.to_string()));
    }

    fn process_request_headers(&mut self) -> Option<Interruption> {
        self.header_phase(RulePhase::RequestHeaders)
    }

    fn write_request_body(&mut self, data: &[u8]) -> Result<Option<Interruption>, EngineError> {
        self.write_body(true, data)
    }

    fn process_request_body(&mut self) -> Result<Option<Interruption>, EngineError> {
        self.evaluate(RulePhase::RequestBody)
    }

    fn add_response_header(&mut self, key: &str, value: &str) {
        self.response_headers.push((key.to_string(), value.to_string()));
    }

    fn process_response_headers(&mut self, status: u16, protocol: &str) -> Option<Interruption> {
        self.response_status = status;
        if self.protocol.is_empty() {
            self.protocol = protocol.to_string();
        }
        self.header_phase(RulePhase::ResponseHeaders)
    }

    fn write_response_body(&mut self, data: &[u8]) -> Result<Option<Interruption>, EngineError> {
        self.write_body(false, data)
    }

    fn process_response_body(&mut self) -> Result<Option<Interruption>, EngineError> {
        self.evaluate(RulePhase::ResponseBody)
    }

    fn process_logging(&mut self) {
        if let Err(e) = self.evaluate(RulePhase::Logging) {
            warn!(tx_id = %self.id, error = %e, "Logging phase evaluation failed");
        }
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.closed = true;
        self.request_body = Vec::new();
        self.response_body = Vec::new();
        if let Some(conn) = self.connection.take() {
            tracing::trace!(
                tx_id = %self.id,
                client = %format!("{}:{}", conn.client_ip, conn.client_port),
                server = %format!("{}:{}", conn.server_ip, conn.server_port),
                "Transaction closed"
            );
        }
        Ok(())
    }
}
