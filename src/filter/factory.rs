use std::sync::Arc;
use tokio::sync::watch;

use crate::directives::FilterConfig;
use crate::observability::FilterMetrics;

use super::host::FilterCallbacks;
use super::session::WafFilter;

/// Creates one [`WafFilter`] per stream from the current configuration.
///
/// Each stream snapshots the config at creation, so a reload never changes
/// the rule set of a stream already in flight.
#[derive(Clone)]
pub struct FilterFactory {
    config: watch::Receiver<Arc<FilterConfig>>,
    metrics: Arc<FilterMetrics>,
}

impl FilterFactory {
    /// Follow a config published by the settings watcher.
    pub fn new(config: watch::Receiver<Arc<FilterConfig>>, metrics: Arc<FilterMetrics>) -> Self {
        FilterFactory { config, metrics }
    }

    /// Serve a single config that never changes.
    pub fn fixed(config: Arc<FilterConfig>, metrics: Arc<FilterMetrics>) -> Self {
        let (_tx, rx) = watch::channel(config);
        FilterFactory::new(rx, metrics)
    }

    pub fn create<C: FilterCallbacks>(&self, callbacks: C) -> WafFilter<C> {
        WafFilter::new(callbacks, self.config(), self.metrics.clone())
    }

    /// Config new streams are created with.
    pub fn config(&self) -> Arc<FilterConfig> {
        self.config.borrow().clone()
    }

    pub fn metrics(&self) -> &Arc<FilterMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::FilterSettings;
    use crate::engine::LiteralCompiler;
    use crate::filter::memory::{MemoryCallbacks, RequestHead};

    fn build(yaml: &str) -> Arc<FilterConfig> {
        let settings: FilterSettings = serde_yaml::from_str(yaml).unwrap();
        Arc::new(FilterConfig::build(&settings, &LiteralCompiler).unwrap())
    }

    #[test]
    fn test_streams_snapshot_config_at_creation() {
        let v1 = build(
            "directives: {one: {simple_directives: [\"engine on\"]}}\ndefault_directive: one\n",
        );
        let v2 = build(
            "directives: {two: {simple_directives: [\"engine on\"]}}\ndefault_directive: two\n",
        );
        let (tx, rx) = watch::channel(v1);
        let factory = FilterFactory::new(rx, Arc::new(FilterMetrics::new()));
        let head = RequestHead::new("GET", "example.com", "/");

        let mut before = factory.create(MemoryCallbacks::new("10.0.0.1:1", "10.0.0.2:2"));
        tx.send(v2).unwrap();
        let mut after = factory.create(MemoryCallbacks::new("10.0.0.1:1", "10.0.0.2:2"));

        before.decode_headers(&head, true);
        after.decode_headers(&head, true);

        assert_eq!(before.rule_set(), Some("one"));
        assert_eq!(after.rule_set(), Some("two"));
    }

    #[test]
    fn test_fixed_config_outlives_sender() {
        let factory = FilterFactory::fixed(
            build(concat!(
                "directives: {main: {simple_directives: [\"engine on\"]}}\n",
                "default_directive: main\n",
            )),
            Arc::new(FilterMetrics::new()),
        );

        assert_eq!(factory.config().registry().default_name(), "main");
    }
}
