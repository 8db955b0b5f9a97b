use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

use crate::observability::FilterMetrics;

use super::loader::{DirectiveError, FilterConfig, SettingsLoader};

/// Watch the settings file and publish a freshly compiled config on change.
///
/// A config that fails validation or compilation is never published; the
/// previous one keeps serving.
pub struct SettingsWatcher {
    loader: SettingsLoader,
    check_interval: Duration,
    last_hash: Option<u64>,
    metrics: Option<Arc<FilterMetrics>>,
}

impl SettingsWatcher {
    /// Create a new settings watcher.
    pub fn new(loader: SettingsLoader, check_interval: Duration) -> Self {
        SettingsWatcher {
            loader,
            check_interval,
            last_hash: None,
            metrics: None,
        }
    }

    /// Count reloads in the given registry.
    pub fn with_metrics(mut self, metrics: Arc<FilterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Load the initial config and start polling.
    ///
    /// Fails if the initial settings cannot be loaded.
    pub fn start(
        mut self,
    ) -> Result<(watch::Receiver<Arc<FilterConfig>>, tokio::task::JoinHandle<()>), DirectiveError> {
        let text = self.loader.read()?;
        let (_, config) = self.loader.compile(&text)?;
        self.last_hash = Some(content_hash(&text));
        info!(path = %self.loader.path().display(), "Loaded initial filter settings");

        let (tx, rx) = watch::channel(Arc::new(config));

        let handle = tokio::spawn(async move {
            let mut interval = interval(self.check_interval);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;

                match self.check_for_updates(&tx) {
                    Ok(true) => info!("Filter settings reloaded successfully"),
                    Ok(false) => {}
                    Err(e) => {
                        warn!(error = %e, "Rejected filter settings update, keeping current config")
                    }
                }
            }
        });

        Ok((rx, handle))
    }

    /// Reload if the settings text changed since it was last read.
    ///
    /// A rejected revision is remembered too, so it is reported once.
    fn check_for_updates(
        &mut self,
        tx: &watch::Sender<Arc<FilterConfig>>,
    ) -> Result<bool, DirectiveError> {
        let text = self.loader.read()?;
        let hash = content_hash(&text);

        if self.last_hash == Some(hash) {
            return Ok(false);
        }

        self.last_hash = Some(hash);
        let result = self.loader.compile(&text);
        if let Some(metrics) = &self.metrics {
            metrics.record_reload(result.is_ok());
        }
        let (_, config) = result?;

        let _ = tx.send(Arc::new(config));

        Ok(true)
    }
}

fn content_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LiteralCompiler;
    use std::io::Write;
    use std::sync::atomic::Ordering;
    use tempfile::NamedTempFile;

    const V1: &str = r#"
directives:
  main: { simple_directives: ["engine on"] }
default_directive: main
"#;

    const V2: &str = r#"
directives:
  main: { simple_directives: ["engine on"] }
  api: { simple_directives: ["engine detection_only"] }
default_directive: main
host_directive_map:
  api.example.com: api
"#;

    fn settings_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[tokio::test]
    async fn test_watcher_initial_load() {
        let file = settings_file(V1);
        let loader = SettingsLoader::new(file.path(), Arc::new(LiteralCompiler));

        let (rx, handle) = SettingsWatcher::new(loader, Duration::from_secs(60)).start().unwrap();

        assert_eq!(rx.borrow().registry().names(), vec!["main"]);

        handle.abort();
    }

    #[tokio::test]
    async fn test_watcher_initial_failure_is_fatal() {
        let file = settings_file("directives: {}\ndefault_directive: x\n");
        let loader = SettingsLoader::new(file.path(), Arc::new(LiteralCompiler));

        let result = SettingsWatcher::new(loader, Duration::from_secs(60)).start();
        assert!(matches!(result, Err(DirectiveError::EmptyDirectives)));
    }

    #[tokio::test]
    async fn test_watcher_detects_changes() {
        let file = settings_file(V1);
        let path = file.path().to_path_buf();
        let metrics = Arc::new(FilterMetrics::new());
        let loader = SettingsLoader::new(&path, Arc::new(LiteralCompiler));

        let (mut rx, handle) = SettingsWatcher::new(loader, Duration::from_millis(50))
            .with_metrics(metrics.clone())
            .start()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        std::fs::write(&path, V2).unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("Timeout waiting for settings change")
            .unwrap();

        assert_eq!(rx.borrow().registry().resolve("api.example.com").name(), "api");
        assert_eq!(metrics.config_reloads_total.load(Ordering::Relaxed), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_watcher_keeps_config_on_invalid_update() {
        let file = settings_file(V1);
        let path = file.path().to_path_buf();
        let metrics = Arc::new(FilterMetrics::new());
        let loader = SettingsLoader::new(&path, Arc::new(LiteralCompiler));

        let (rx, handle) = SettingsWatcher::new(loader, Duration::from_millis(20))
            .with_metrics(metrics.clone())
            .start()
            .unwrap();

        std::fs::write(
            &path,
            concat!(
                "directives:\n  main: { simple_directives: [\"engine on\"] }\n",
                "default_directive: main\n",
                "host_directive_map:\n  a.test: nope\n",
            ),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!rx.has_changed().unwrap());
        assert_eq!(rx.borrow().registry().names(), vec!["main"]);
        assert!(metrics.config_reload_errors.load(Ordering::Relaxed) >= 1);

        handle.abort();
    }

    #[test]
    fn test_rejected_revision_reported_once() {
        let file = settings_file(V1);
        let path = file.path().to_path_buf();
        let metrics = Arc::new(FilterMetrics::new());
        let loader = SettingsLoader::new(&path, Arc::new(LiteralCompiler));
        let (_, initial) = loader.compile(V1).unwrap();
        let (tx, rx) = watch::channel(Arc::new(initial));
        let mut watcher =
            SettingsWatcher::new(loader, Duration::from_secs(60)).with_metrics(metrics.clone());
        watcher.last_hash = Some(content_hash(V1));

        std::fs::write(&path, "directives: {}\ndefault_directive: main\n").unwrap();

        assert!(watcher.check_for_updates(&tx).is_err());
        assert!(matches!(watcher.check_for_updates(&tx), Ok(false)));
        assert!(matches!(watcher.check_for_updates(&tx), Ok(false)));
        assert_eq!(metrics.config_reload_errors.load(Ordering::Relaxed), 1);

        std::fs::write(&path, V2).unwrap();
        assert!(matches!(watcher.check_for_updates(&tx), Ok(true)));
        assert_eq!(rx.borrow().registry().names().len(), 2);
        assert_eq!(metrics.config_reloads_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.config_reload_errors.load(Ordering::Relaxed), 1);
    }
}
