use std::{net::SocketAddr, time::Duration};

use anyhow::{ensure, Result};
use clap::Parser;

use crate::dispatcher::DEFAULT_QUEUE_CAPACITY;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address the HTTP server binds to. Use port 0 for an ephemeral port.
    #[arg(long, env = "KVS_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Path prefix every route is mounted under.
    #[arg(long, env = "KVS_BASE_PATH", default_value = "/kvs")]
    pub base_path: String,

    /// Seconds a single request may take before it is answered with 408.
    #[arg(long, env = "KVS_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Seconds in-flight requests get to finish after a shutdown signal.
    #[arg(long, env = "KVS_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// Requests that may wait for the store dispatcher before callers block.
    #[arg(long, env = "KVS_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Number of demo key/value pairs inserted once the server is up.
    #[arg(long, env = "KVS_SEED", default_value_t = 0)]
    pub seed: usize,
}

/// Validated runtime settings for [`Server`](crate::server::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub base_path: String,
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
    pub queue_capacity: usize,
    pub seed: usize,
}

impl ServerConfig {
    /// Settings for a loopback server on an ephemeral port.
    pub fn local() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            base_path: "/kvs".to_string(),
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            seed: 0,
        }
    }
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        ensure!(cli.queue_capacity > 0, "queue capacity must be at least 1");
        ensure!(
            cli.request_timeout_secs > 0,
            "request timeout must be at least one second"
        );
        Ok(Self {
            listen: cli.listen,
            base_path: normalize_base_path(&cli.base_path)?,
            request_timeout: Duration::from_secs(cli.request_timeout_secs),
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
            queue_capacity: cli.queue_capacity,
            seed: cli.seed,
        })
    }
}

/// Ensures a leading slash and strips trailing ones. An empty prefix or a
/// lone `/` means routes live at the root.
fn normalize_base_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    ensure!(
        !trimmed.contains(char::is_whitespace),
        "base path must not contain whitespace: {raw:?}"
    );
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{trimmed}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("channel-kv-store").chain(args.iter().copied()))
            .expect("valid args")
    }

    #[test]
    fn defaults_match_server_config_defaults() {
        let config = ServerConfig::try_from(parse(&[])).expect("config");
        let defaults = ServerConfig::default();
        assert_eq!(config.listen, defaults.listen);
        assert_eq!(config.base_path, "/kvs");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.seed, 0);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = parse(&[
            "--listen",
            "127.0.0.1:9000",
            "--base-path",
            "store/",
            "--queue-capacity",
            "8",
            "--seed",
            "100",
        ]);
        let config = ServerConfig::try_from(cli).expect("config");
        assert_eq!(config.listen, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.base_path, "/store");
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.seed, 100);
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let cli = parse(&["--queue-capacity", "0"]);
        assert!(ServerConfig::try_from(cli).is_err());
    }

    #[test]
    fn root_base_path_is_empty() {
        assert_eq!(normalize_base_path("/").unwrap(), "");
        assert_eq!(normalize_base_path("").unwrap(), "");
        assert!(normalize_base_path("/a b").is_err());
    }
}
