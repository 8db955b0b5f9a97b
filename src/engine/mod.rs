pub mod interruption;
pub mod literal;
pub mod matched;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use interruption::Interruption;
pub use literal::LiteralCompiler;
pub use matched::{MatchedRule, Severity};
pub use traits::{EngineCompiler, EngineError, MatchSink, RuleEngine, Transaction};
