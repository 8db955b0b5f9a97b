use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Rule source for one named rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveSet {
    /// Inline directive text, joined with newlines before compilation
    #[serde(default)]
    pub simple_directives: Vec<String>,

    /// Files whose contents are appended after the inline directives
    #[serde(default)]
    pub directives_files: Vec<PathBuf>,
}

impl DirectiveSet {
    /// Create a set from inline directives only.
    pub fn inline<I, S>(directives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DirectiveSet {
            simple_directives: directives.into_iter().map(Into::into).collect(),
            directives_files: Vec::new(),
        }
    }

    /// True when the set carries no rule source at all.
    pub fn is_empty(&self) -> bool {
        self.simple_directives.iter().all(|d| d.trim().is_empty())
            && self.directives_files.is_empty()
    }
}

/// What the filter does when the engine faults while evaluating a request body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyErrorPolicy {
    /// Log the fault and let the request through
    #[default]
    FailOpen,
    /// Reply 400 and stop the request
    Reject,
}

/// Filter settings as handed over by the host's configuration transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    /// Rule set name to rule source
    pub directives: BTreeMap<String, DirectiveSet>,

    /// Rule set used when the Host has no explicit mapping
    pub default_directive: String,

    /// Literal Host value to rule set name
    #[serde(default)]
    pub host_directive_map: BTreeMap<String, String>,

    /// Optional audit file for rule matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log_path: Option<PathBuf>,

    /// Handling of engine faults during request body evaluation
    #[serde(default)]
    pub body_error_policy: BodyErrorPolicy,
}
