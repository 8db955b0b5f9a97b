use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every stream the filter handles.
#[derive(Debug, Default)]
pub struct FilterMetrics {
    /// Streams that opened a transaction
    pub streams_inspected: AtomicU64,

    /// Streams that skipped inspection (no Host)
    pub streams_bypassed: AtomicU64,

    /// Local replies by status
    pub blocked_400: AtomicU64,
    pub blocked_403: AtomicU64,

    /// Response bodies overwritten after headers were forwarded
    pub bodies_suppressed: AtomicU64,

    /// Engine faults swallowed under fail-open
    pub engine_errors: AtomicU64,

    /// Transactions released at teardown
    pub transactions_closed: AtomicU64,

    /// Settings reloads
    pub config_reloads_total: AtomicU64,
    pub config_reload_errors: AtomicU64,
}

impl FilterMetrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        FilterMetrics::default()
    }

    pub fn record_stream(&self, inspected: bool) {
        if inspected {
            self.streams_inspected.fetch_add(1, Ordering::Relaxed);
        } else {
            self.streams_bypassed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a synthesized local reply.
    pub fn record_block(&self, status: u16) {
        match status {
            400 => self.blocked_400.fetch_add(1, Ordering::Relaxed),
            _ => self.blocked_403.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_suppression(&self) {
        self.bodies_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_engine_error(&self) {
        self.engine_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.transactions_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a settings reload.
    pub fn record_reload(&self, success: bool) {
        self.config_reloads_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.config_reload_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        format!(
            r#"# HELP wafgate_streams_total Streams seen by the filter
# TYPE wafgate_streams_total counter
wafgate_streams_total{{outcome="inspected"}} {}
wafgate_streams_total{{outcome="bypassed"}} {}

# HELP wafgate_blocked_total Local replies synthesized by status
# TYPE wafgate_blocked_total counter
wafgate_blocked_total{{status="400"}} {}
wafgate_blocked_total{{status="403"}} {}

# HELP wafgate_bodies_suppressed_total Response bodies overwritten after headers were sent
# TYPE wafgate_bodies_suppressed_total counter
wafgate_bodies_suppressed_total {}

# HELP wafgate_engine_errors_total Engine faults handled fail-open
# TYPE wafgate_engine_errors_total counter
wafgate_engine_errors_total {}

# HELP wafgate_transactions_closed_total Transactions released at stream teardown
# TYPE wafgate_transactions_closed_total counter
wafgate_transactions_closed_total {}

# HELP wafgate_config_reloads_total Settings reload attempts
# TYPE wafgate_config_reloads_total counter
wafgate_config_reloads_total {}

# HELP wafgate_config_reload_errors_total Rejected settings reloads
# TYPE wafgate_config_reload_errors_total counter
wafgate_config_reload_errors_total {}
"#,
            self.streams_inspected.load(Ordering::Relaxed),
            self.streams_bypassed.load(Ordering::Relaxed),
            self.blocked_400.load(Ordering::Relaxed),
            self.blocked_403.load(Ordering::Relaxed),
            self.bodies_suppressed.load(Ordering::Relaxed),
            self.engine_errors.load(Ordering::Relaxed),
            self.transactions_closed.load(Ordering::Relaxed),
            self.config_reloads_total.load(Ordering::Relaxed),
            self.config_reload_errors.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_blocks() {
        let metrics = FilterMetrics::new();

        metrics.record_block(400);
        metrics.record_block(403);
        metrics.record_block(403);

        assert_eq!(metrics.blocked_400.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.blocked_403.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_record_reload() {
        let metrics = FilterMetrics::new();

        metrics.record_reload(true);
        metrics.record_reload(false);

        assert_eq!(metrics.config_reloads_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.config_reload_errors.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = FilterMetrics::new();
        metrics.record_stream(true);
        metrics.record_stream(false);
        metrics.record_suppression();

        let output = metrics.to_prometheus();

        assert!(output.contains("wafgate_streams_total{outcome=\"inspected\"} 1"));
        assert!(output.contains("wafgate_streams_total{outcome=\"bypassed\"} 1"));
        assert!(output.contains("wafgate_bodies_suppressed_total 1"));
    }
}
