use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::info;

use wafgate::config::{Command, Config, InspectArgs};
use wafgate::directives::{SettingsLoader, SettingsWatcher};
use wafgate::engine::{EngineCompiler, LiteralCompiler};
use wafgate::filter::memory::{HttpRequest, HttpResponse, MemoryStream, RequestHead};
use wafgate::filter::FilterFactory;
use wafgate::observability::{init_tracing, FilterMetrics};
use wafgate::plugin::{self, ParsedConfig, StaticRegistry, FILTER_NAME};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse();

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting wafgate");

    let compiler: Arc<dyn EngineCompiler> = Arc::new(LiteralCompiler);
    let mut registry = StaticRegistry::new();
    plugin::register(&mut registry, compiler.clone())?;
    let extension = registry
        .get(FILTER_NAME)
        .context("filter extension missing after registration")?;

    match &config.command {
        Command::Check => {
            let parsed = parse(&config, &extension.parser)?;
            let directives = parsed.config.registry();
            println!("settings: {}", config.settings.display());
            println!("rule sets: {}", directives.names().join(", "));
            println!("default: {}", directives.default_name());
            for (host, name) in directives.routes() {
                println!("route: {} -> {}", host, name);
            }
            println!("body_error_policy: {:?}", parsed.config.body_error_policy());
        }
        Command::Resolve { host } => {
            let parsed = parse(&config, &extension.parser)?;
            match parsed.config.registry().select(host) {
                Some(engine) => println!("{}", engine.name()),
                None => println!("bypass (empty Host)"),
            }
        }
        Command::Inspect(args) => {
            let parsed = parse(&config, &extension.parser)?;
            let metrics = Arc::new(FilterMetrics::new());
            let factory = (extension.factory)(&parsed, metrics.clone());
            inspect(&factory, args)?;
            info!(metrics = %metrics.to_prometheus(), "Stream metrics");
        }
        Command::Watch => watch(&config, compiler).await?,
    }

    Ok(())
}

fn parse(config: &Config, parser: &plugin::ConfigParser) -> anyhow::Result<ParsedConfig> {
    let text = std::fs::read_to_string(&config.settings)
        .with_context(|| format!("failed to read settings {}", config.settings.display()))?;
    let parsed = parser
        .parse(&text)
        .with_context(|| format!("invalid settings {}", config.settings.display()))?;
    Ok(parsed)
}

fn inspect(factory: &FilterFactory, args: &InspectArgs) -> anyhow::Result<()> {
    let mut head = RequestHead::new(&args.method, &args.host, &args.path);
    if let Some(protocol) = &args.protocol {
        head = head.with_protocol(protocol);
    }
    for (name, value) in &args.headers {
        head = head.with_header(name, value);
    }
    let request = args
        .body
        .iter()
        .fold(HttpRequest::new(head), |req, chunk| req.with_chunk(chunk.as_bytes()));

    let response = args
        .response_headers
        .iter()
        .fold(HttpResponse::new(args.status), |resp, (k, v)| resp.with_header(k, v));
    let response = args
        .response_body
        .iter()
        .fold(response, |resp, chunk| resp.with_chunk(chunk.as_bytes()));

    let outcome =
        MemoryStream::new(&args.remote_addr, &args.local_addr).run(factory, &request, &response);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn watch(config: &Config, compiler: Arc<dyn EngineCompiler>) -> anyhow::Result<()> {
    let metrics = Arc::new(FilterMetrics::new());
    let loader = SettingsLoader::new(&config.settings, compiler);

    // Start settings watcher
    let (config_rx, handle) = SettingsWatcher::new(loader, config.reload_interval())
        .with_metrics(metrics.clone())
        .start()
        .context("failed to load initial settings")?;
    let factory = FilterFactory::new(config_rx.clone(), metrics.clone());

    info!(
        rule_sets = factory.config().registry().len(),
        interval_secs = config.reload_interval().as_secs(),
        "Watching filter settings"
    );

    let mut changes = config_rx;
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = factory.config();
                info!(
                    rule_sets = current.registry().len(),
                    default = %current.registry().default_name(),
                    "Serving new filter configuration"
                );
            }
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    // Cleanup
    handle.abort();
    info!(metrics = %metrics.to_prometheus(), "Shutdown complete");
    Ok(())
}
