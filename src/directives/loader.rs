use ahash::AHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::audit::{AuditError, AuditSink};
use crate::engine::{EngineCompiler, EngineError, MatchSink};

use super::registry::DirectiveRegistry;
use super::schema::{BodyErrorPolicy, FilterSettings};

/// Errors that reject a configuration before it serves traffic.
#[derive(Error, Debug)]
pub enum DirectiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parsing error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("directives is empty")]
    EmptyDirectives,

    #[error("directive set '{0}' has no directives")]
    EmptyDirectiveSet(String),

    #[error("default_directive '{0}' does not exist")]
    UnknownDefault(String),

    #[error("the rule set '{name}' mapped for host '{host}' does not exist")]
    UnknownHostTarget { host: String, name: String },

    #[error("directive set '{name}' failed to compile: {source}")]
    Compile {
        name: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to open audit log {path}: {source}")]
    Audit {
        path: PathBuf,
        #[source]
        source: AuditError,
    },
}

/// Parse settings text. JSON is accepted as well since it is valid YAML.
pub fn parse_settings(text: &str) -> Result<FilterSettings, DirectiveError> {
    let settings: FilterSettings = serde_yaml::from_str(text)?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Load and validate settings from a file.
pub fn load_settings(path: impl AsRef<Path>) -> Result<FilterSettings, DirectiveError> {
    let content = fs::read_to_string(path)?;
    parse_settings(&content)
}

/// Check settings for emptiness and referential integrity.
pub fn validate_settings(settings: &FilterSettings) -> Result<(), DirectiveError> {
    if settings.directives.is_empty() {
        return Err(DirectiveError::EmptyDirectives);
    }

    for (name, set) in &settings.directives {
        if set.is_empty() {
            return Err(DirectiveError::EmptyDirectiveSet(name.clone()));
        }
    }

    if !settings.directives.contains_key(&settings.default_directive) {
        return Err(DirectiveError::UnknownDefault(settings.default_directive.clone()));
    }

    for (host, name) in &settings.host_directive_map {
        if !settings.directives.contains_key(name) {
            return Err(DirectiveError::UnknownHostTarget {
                host: host.clone(),
                name: name.clone(),
            });
        }
    }

    Ok(())
}

/// Validated, compiled filter configuration.
///
/// Shared read-only by every stream created while it is current.
#[derive(Debug)]
pub struct FilterConfig {
    registry: DirectiveRegistry,
    audit: Arc<AuditSink>,
    body_error_policy: BodyErrorPolicy,
}

impl FilterConfig {
    /// Validate and compile settings into a servable configuration.
    pub fn build(
        settings: &FilterSettings,
        compiler: &dyn EngineCompiler,
    ) -> Result<Self, DirectiveError> {
        validate_settings(settings)?;

        let audit = match &settings.audit_log_path {
            Some(path) => AuditSink::with_file(path).map_err(|source| DirectiveError::Audit {
                path: path.clone(),
                source,
            })?,
            None => AuditSink::log_only(),
        };
        let audit = Arc::new(audit);
        let sink: Arc<dyn MatchSink> = audit.clone();

        let mut engines = AHashMap::with_capacity(settings.directives.len());
        for (name, set) in &settings.directives {
            let engine = compiler
                .compile(name, set, sink.clone())
                .map_err(|source| DirectiveError::Compile {
                    name: name.clone(),
                    source,
                })?;
            debug!(rule_set = %name, files = set.directives_files.len(), "Compiled directive set");
            engines.insert(name.clone(), engine);
        }

        let registry = DirectiveRegistry::new(
            engines,
            &settings.default_directive,
            &settings.host_directive_map,
        )?;

        info!(
            rule_sets = registry.len(),
            default = %registry.default_name(),
            routes = settings.host_directive_map.len(),
            "Filter configuration compiled"
        );

        Ok(FilterConfig::new(registry, audit).with_body_error_policy(settings.body_error_policy))
    }

    /// Assemble a config from an already built registry.
    pub fn new(registry: DirectiveRegistry, audit: Arc<AuditSink>) -> Self {
        FilterConfig {
            registry,
            audit,
            body_error_policy: BodyErrorPolicy::default(),
        }
    }

    pub fn with_body_error_policy(mut self, policy: BodyErrorPolicy) -> Self {
        self.body_error_policy = policy;
        self
    }

    pub fn body_error_policy(&self) -> BodyErrorPolicy {
        self.body_error_policy
    }

    pub fn registry(&self) -> &DirectiveRegistry {
        &self.registry
    }

    pub fn audit(&self) -> &Arc<AuditSink> {
        &self.audit
    }
}

/// Loads settings from disk and compiles them.
pub struct SettingsLoader {
    path: PathBuf,
    compiler: Arc<dyn EngineCompiler>,
}

impl SettingsLoader {
    pub fn new(path: impl Into<PathBuf>, compiler: Arc<dyn EngineCompiler>) -> Self {
        SettingsLoader {
            path: path.into(),
            compiler,
        }
    }

    /// Read the raw settings text.
    pub fn read(&self) -> Result<String, DirectiveError> {
        Ok(fs::read_to_string(&self.path)?)
    }

    /// Parse settings text and compile it.
    pub fn compile(&self, text: &str) -> Result<(FilterSettings, FilterConfig), DirectiveError> {
        let settings = parse_settings(text)?;
        let config = FilterConfig::build(&settings, self.compiler.as_ref())?;
        Ok((settings, config))
    }

    /// Load, validate and compile the settings file.
    pub fn load(&self) -> Result<(FilterSettings, FilterConfig), DirectiveError> {
        let text = self.read()?;
        self.compile(&text)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
