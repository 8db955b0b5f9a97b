//! Registration of the filter with a host's extension registry.
//!
//! Registration is explicit: the host calls [`register`] once at startup
//! and gets back a parser and a factory function under [`FILTER_NAME`].
//! All per-stream state lives in [`WafFilter`](crate::filter::WafFilter).

use ahash::AHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::directives::{parse_settings, DirectiveError, FilterConfig, FilterSettings};
use crate::engine::EngineCompiler;
use crate::filter::FilterFactory;
use crate::observability::FilterMetrics;

/// Name the filter registers under.
pub const FILTER_NAME: &str = "wafgate";

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("an extension named '{0}' is already registered")]
    Duplicate(&'static str),
}

/// Settings plus the config compiled from them.
#[derive(Debug, Clone)]
pub struct ParsedConfig {
    pub settings: FilterSettings,
    pub config: Arc<FilterConfig>,
}

/// Turns settings text into a servable config, and merges scoped configs.
#[derive(Clone)]
pub struct ConfigParser {
    compiler: Arc<dyn EngineCompiler>,
}

impl ConfigParser {
    pub fn new(compiler: Arc<dyn EngineCompiler>) -> Self {
        ConfigParser { compiler }
    }

    /// Parse, validate and compile settings text (YAML or JSON).
    pub fn parse(&self, text: &str) -> Result<ParsedConfig, DirectiveError> {
        let settings = parse_settings(text)?;
        self.compile(settings)
    }

    /// Combine a parent config with a more specific child one.
    ///
    /// Child entries win on conflict; parent rule sets and routes the child
    /// does not mention are kept. The result is validated and compiled anew.
    pub fn merge(
        &self,
        parent: &ParsedConfig,
        child: &ParsedConfig,
    ) -> Result<ParsedConfig, DirectiveError> {
        let mut merged = parent.settings.clone();
        let child = &child.settings;

        merged
            .directives
            .extend(child.directives.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .host_directive_map
            .extend(child.host_directive_map.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.default_directive = child.default_directive.clone();
        if child.audit_log_path.is_some() {
            merged.audit_log_path = child.audit_log_path.clone();
        }
        merged.body_error_policy = child.body_error_policy;

        self.compile(merged)
    }

    fn compile(&self, settings: FilterSettings) -> Result<ParsedConfig, DirectiveError> {
        let config = FilterConfig::build(&settings, self.compiler.as_ref())?;
        Ok(ParsedConfig {
            settings,
            config: Arc::new(config),
        })
    }
}

/// Builds the stream factory for a parsed config.
pub type FactoryFn = fn(&ParsedConfig, Arc<FilterMetrics>) -> FilterFactory;

fn config_factory(parsed: &ParsedConfig, metrics: Arc<FilterMetrics>) -> FilterFactory {
    FilterFactory::fixed(parsed.config.clone(), metrics)
}

/// Everything the host needs to instantiate the filter.
#[derive(Clone)]
pub struct FilterExtension {
    pub parser: ConfigParser,
    pub factory: FactoryFn,
}

/// Host-side table of named HTTP filter extensions.
pub trait ExtensionRegistry {
    fn register_http_filter(
        &mut self,
        name: &'static str,
        extension: FilterExtension,
    ) -> Result<(), PluginError>;
}

/// Install the filter under [`FILTER_NAME`].
pub fn register<R: ExtensionRegistry + ?Sized>(
    registry: &mut R,
    compiler: Arc<dyn EngineCompiler>,
) -> Result<(), PluginError> {
    registry.register_http_filter(
        FILTER_NAME,
        FilterExtension {
            parser: ConfigParser::new(compiler),
            factory: config_factory,
        },
    )?;
    info!(name = FILTER_NAME, "Registered HTTP filter");
    Ok(())
}

/// Registry for hosts that resolve extensions in-process.
#[derive(Default)]
pub struct StaticRegistry {
    filters: AHashMap<&'static str, FilterExtension>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        StaticRegistry::default()
    }

    pub fn get(&self, name: &str) -> Option<&FilterExtension> {
        self.filters.get(name)
    }
}

impl ExtensionRegistry for StaticRegistry {
    fn register_http_filter(
        &mut self,
        name: &'static str,
        extension: FilterExtension,
    ) -> Result<(), PluginError> {
        if self.filters.contains_key(name) {
            return Err(PluginError::Duplicate(name));
        }
        self.filters.insert(name, extension);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::BodyErrorPolicy;
    use crate::engine::LiteralCompiler;

    const PARENT: &str = r#"
directives:
  base: { simple_directives: ["engine on"] }
  api: { simple_directives: ["engine detection_only"] }
default_directive: base
host_directive_map:
  api.example.com: api
  old.example.com: base
"#;

    const CHILD: &str = r#"
directives:
  strict: { simple_directives: ["engine on", "rule id=1 phase=request_headers target=uri contains=admin"] }
default_directive: strict
host_directive_map:
  old.example.com: strict
body_error_policy: reject
"#;

    fn parser() -> ConfigParser {
        ConfigParser::new(Arc::new(LiteralCompiler))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = StaticRegistry::new();
        register(&mut registry, Arc::new(LiteralCompiler)).unwrap();

        let extension = registry.get(FILTER_NAME).unwrap();
        let parsed = extension.parser.parse(PARENT).unwrap();
        let factory = (extension.factory)(&parsed, Arc::new(FilterMetrics::new()));

        assert_eq!(factory.config().registry().default_name(), "base");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = StaticRegistry::new();
        register(&mut registry, Arc::new(LiteralCompiler)).unwrap();

        let err = register(&mut registry, Arc::new(LiteralCompiler)).unwrap_err();
        assert!(matches!(err, PluginError::Duplicate(FILTER_NAME)));
    }

    #[test]
    fn test_parse_rejects_invalid_settings() {
        let text = "directives:\n  a: { simple_directives: [\"engine on\"] }\ndefault_directive: b\n";
        let err = parser().parse(text).unwrap_err();
        assert!(matches!(err, DirectiveError::UnknownDefault(_)));
    }

    #[test]
    fn test_merge_child_wins() {
        let parser = parser();
        let parent = parser.parse(PARENT).unwrap();
        let child = parser.parse(CHILD).unwrap();

        let merged = parser.merge(&parent, &child).unwrap();
        let registry = merged.config.registry();

        assert_eq!(registry.default_name(), "strict");
        assert_eq!(registry.names(), vec!["api", "base", "strict"]);
        assert_eq!(registry.resolve("old.example.com").name(), "strict");
        assert_eq!(registry.resolve("api.example.com").name(), "api");
        assert_eq!(registry.resolve("other.example.com").name(), "strict");
        assert_eq!(merged.config.body_error_policy(), BodyErrorPolicy::Reject);
    }
}
