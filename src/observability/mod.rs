pub mod metrics;
pub mod tracing;

pub use metrics::FilterMetrics;
pub use tracing::init_tracing;
