use ahash::AHashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::RuleEngine;

use super::loader::DirectiveError;

/// Compiled rule sets plus the Host routing table.
///
/// Built once per configuration load and never mutated. Construction
/// checks every reference, so resolving a host can never fail.
pub struct DirectiveRegistry {
    engines: AHashMap<String, Arc<dyn RuleEngine>>,
    default_name: String,
    default_engine: Arc<dyn RuleEngine>,
    host_routing: AHashMap<String, Arc<dyn RuleEngine>>,
}

impl DirectiveRegistry {
    /// Build a registry from compiled engines.
    pub fn new(
        engines: AHashMap<String, Arc<dyn RuleEngine>>,
        default_name: &str,
        host_map: &BTreeMap<String, String>,
    ) -> Result<Self, DirectiveError> {
        let default_engine = engines
            .get(default_name)
            .cloned()
            .ok_or_else(|| DirectiveError::UnknownDefault(default_name.to_string()))?;

        let mut host_routing = AHashMap::with_capacity(host_map.len());
        for (host, name) in host_map {
            let engine = engines.get(name).ok_or_else(|| DirectiveError::UnknownHostTarget {
                host: host.clone(),
                name: name.clone(),
            })?;
            host_routing.insert(host.clone(), engine.clone());
        }

        Ok(DirectiveRegistry {
            engines,
            default_name: default_name.to_string(),
            default_engine,
            host_routing,
        })
    }

    /// Select the engine for a Host value: exact match, else the default.
    #[inline]
    pub fn resolve(&self, host: &str) -> &Arc<dyn RuleEngine> {
        self.host_routing.get(host).unwrap_or(&self.default_engine)
    }

    /// Like [`resolve`](Self::resolve), but an empty Host bypasses inspection.
    #[inline]
    pub fn select(&self, host: &str) -> Option<&Arc<dyn RuleEngine>> {
        if host.is_empty() {
            None
        } else {
            Some(self.resolve(host))
        }
    }

    /// Look up an engine by rule set name.
    pub fn engine(&self, name: &str) -> Option<&Arc<dyn RuleEngine>> {
        self.engines.get(name)
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Rule set names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.engines.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Host routes as `(host, rule set)`, sorted by host.
    pub fn routes(&self) -> Vec<(&str, &str)> {
        let mut routes: Vec<(&str, &str)> = self
            .host_routing
            .iter()
            .map(|(host, engine)| (host.as_str(), engine.name()))
            .collect();
        routes.sort_unstable();
        routes
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl fmt::Debug for DirectiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectiveRegistry")
            .field("names", &self.names())
            .field("default", &self.default_name)
            .field("routes", &self.routes())
            .finish()
    }
}
