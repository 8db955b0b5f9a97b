//! Directive sets, their load-time validation and compilation, and the
//! Host routing table built from them.
//!
//! ```text
//! settings file (YAML/JSON)
//!     → loader.rs (parse, validate, compile every set)
//!     → registry.rs (immutable name → engine map + host routing)
//!     → FilterConfig shared via Arc by every stream factory
//!
//! On change:
//!     hot_reload.rs polls the file
//!     → loader.rs builds a new FilterConfig
//!     → published on a watch channel; new streams pick it up
//! ```

pub mod hot_reload;
pub mod loader;
pub mod registry;
pub mod schema;

pub use hot_reload::SettingsWatcher;
pub use loader::{
    load_settings, parse_settings, validate_settings, DirectiveError, FilterConfig, SettingsLoader,
};
pub use registry::DirectiveRegistry;
pub use schema::{BodyErrorPolicy, DirectiveSet, FilterSettings};
