use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Command-line configuration for the `wafgate` tool.
#[derive(Debug, Clone, Parser)]
#[command(name = "wafgate")]
#[command(about = "Streaming WAF inspection filter for reverse proxies")]
pub struct Config {
    /// Path to filter settings (YAML or JSON)
    #[arg(long, default_value = "wafgate.yaml", env = "WAFGATE_SETTINGS")]
    pub settings: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false", env = "WAFGATE_LOG_JSON")]
    pub log_json: bool,

    /// Settings reload check interval in seconds
    #[arg(long, default_value = "30", env = "WAFGATE_RELOAD_SECS")]
    pub reload_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Load, validate and compile the settings, then print a summary
    Check,

    /// Show which rule set a Host value is inspected with
    Resolve {
        /// Host header value (empty means inspection is bypassed)
        #[arg(long, default_value = "")]
        host: String,
    },

    /// Drive one request/response through the filter and print the outcome
    Inspect(InspectArgs),

    /// Watch the settings file and log reloads until interrupted
    Watch,
}

#[derive(Debug, Clone, clap::Args)]
pub struct InspectArgs {
    #[arg(long, default_value = "localhost")]
    pub host: String,

    #[arg(long, default_value = "GET")]
    pub method: String,

    #[arg(long, default_value = "/")]
    pub path: String,

    /// Negotiated protocol; omit to exercise the fallback
    #[arg(long)]
    pub protocol: Option<String>,

    /// Request header as `name: value` (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body chunk (repeatable)
    #[arg(long = "body")]
    pub body: Vec<String>,

    /// Upstream response status
    #[arg(long, default_value = "200")]
    pub status: u16,

    /// Upstream response header as `name: value` (repeatable)
    #[arg(long = "response-header", value_parser = parse_header)]
    pub response_headers: Vec<(String, String)>,

    /// Upstream response body chunk (repeatable)
    #[arg(long = "response-body")]
    pub response_body: Vec<String>,

    #[arg(long, default_value = "127.0.0.1:40000")]
    pub remote_addr: String,

    #[arg(long, default_value = "127.0.0.1:8080")]
    pub local_addr: String,
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected 'name: value', got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in '{}'", s));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl Config {
    /// Get settings reload interval as Duration.
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check() {
        let args = ["wafgate", "--settings", "/etc/wafgate.yaml", "check"];
        let config = Config::try_parse_from(args).unwrap();

        assert_eq!(config.settings, PathBuf::from("/etc/wafgate.yaml"));
        assert_eq!(config.reload_interval(), Duration::from_secs(30));
        assert!(matches!(config.command, Command::Check));
    }

    #[test]
    fn test_parse_inspect() {
        let config = Config::try_parse_from([
            "wafgate",
            "inspect",
            "--host",
            "api.example.com",
            "--header",
            "User-Agent: curl/8",
            "--body",
            "a=1",
            "--body",
            "&b=2",
            "--status",
            "404",
        ])
        .unwrap();

        let Command::Inspect(args) = config.command else {
            panic!("expected inspect");
        };
        assert_eq!(args.host, "api.example.com");
        assert_eq!(args.headers, vec![("User-Agent".to_string(), "curl/8".to_string())]);
        assert_eq!(args.body, vec!["a=1", "&b=2"]);
        assert_eq!(args.status, 404);
        assert!(args.protocol.is_none());
    }

    #[test]
    fn test_reload_interval_floor() {
        let config = Config::try_parse_from(["wafgate", "--reload-secs", "0", "watch"]).unwrap();
        assert_eq!(config.reload_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_header_rejects_garbage() {
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
        assert_eq!(parse_header("a:b").unwrap(), ("a".to_string(), "b".to_string()));
    }
}
