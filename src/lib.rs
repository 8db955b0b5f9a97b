pub mod audit;
pub mod config;
pub mod directives;
pub mod engine;
pub mod filter;
pub mod observability;
pub mod plugin;

pub use config::Config;
pub use directives::{DirectiveRegistry, FilterConfig, FilterSettings};
pub use engine::{Interruption, RuleEngine, Transaction};
pub use filter::{FilterFactory, WafFilter};
