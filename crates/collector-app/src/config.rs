use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use poller_actor::PollerConfig;
use udp_transport::TransportConfig;

const DEFAULT_HTTP_LISTEN: &str = "0.0.0.0:2112";

#[derive(Clone, Debug)]
pub struct CollectorConfig {
    pub wallbox: TransportConfig,
    pub poller: PollerConfig,
    pub http_listen: String,
}

impl CollectorConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.wallbox.host.trim().is_empty() {
            anyhow::bail!("wallbox.host is required (config, KEBA_HOST or positional argument)");
        }
        if self.wallbox.port == 0 {
            anyhow::bail!("wallbox.port must be between 1 and 65535");
        }
        if self.wallbox.bind_port == Some(0) {
            anyhow::bail!("wallbox.bind_port must be between 1 and 65535 when set");
        }
        if self.wallbox.timeout_ms == 0 {
            anyhow::bail!("wallbox.timeout_ms must be >= 1");
        }
        if self.poller.poll_interval.as_millis() == 0 {
            anyhow::bail!("poller.poll_interval_ms must be >= 1");
        }
        if self.poller.history_interval.as_millis() == 0 {
            anyhow::bail!("poller.history_interval_ms must be >= 1");
        }
        self.http_listen.parse::<SocketAddr>().with_context(|| {
            format!("http.listen {:?} is not a socket address", self.http_listen)
        })?;

        Ok(())
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            wallbox: TransportConfig {
                host: String::new(),
                ..TransportConfig::default()
            },
            poller: PollerConfig::default(),
            http_listen: DEFAULT_HTTP_LISTEN.to_string(),
        }
    }
}

/// Command line: `collector-app [--config PATH] [--http ADDR] [HOST]`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<String>,
    pub http: Option<String>,
    pub host: Option<String>,
}

impl CliArgs {
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if arg == "--config" {
                parsed.config = Some(args.next().context("--config requires a path")?);
            } else if let Some(path) = arg.strip_prefix("--config=") {
                parsed.config = Some(path.to_string());
            } else if arg == "--http" {
                parsed.http = Some(args.next().context("--http requires an address")?);
            } else if let Some(addr) = arg.strip_prefix("--http=") {
                parsed.http = Some(addr.to_string());
            } else if arg.starts_with("--") {
                anyhow::bail!("unknown flag {arg}");
            } else if parsed.host.replace(arg).is_some() {
                anyhow::bail!("exactly one wallbox host may be given");
            }
        }
        Ok(parsed)
    }

    /// Command line values win over file and environment.
    pub fn apply(&self, config: &mut CollectorConfig) {
        if let Some(host) = &self.host {
            config.wallbox.host = host.clone();
        }
        if let Some(http) = &self.http {
            config.http_listen = http.clone();
        }
    }
}

fn apply_env_overrides(config: &mut CollectorConfig) {
    if let Ok(value) = env::var("KEBA_HOST") {
        config.wallbox.host = value;
    }

    if let Some(port) = parse_env_u16("KEBA_PORT") {
        config.wallbox.port = port;
    }

    if let Some(port) = parse_env_u16("KEBA_BIND_PORT") {
        config.wallbox.bind_port = Some(port);
    }

    if let Some(timeout_ms) = parse_env_u64("KEBA_TIMEOUT_MS") {
        config.wallbox.timeout_ms = timeout_ms;
    }

    if let Some(interval_ms) = parse_env_u64("KEBA_POLL_INTERVAL_MS") {
        config.poller.poll_interval = Duration::from_millis(interval_ms);
    }

    if let Some(interval_ms) = parse_env_u64("KEBA_HISTORY_INTERVAL_MS") {
        config.poller.history_interval = Duration::from_millis(interval_ms);
    }

    config.http_listen = env::var("KEBA_HTTP_LISTEN").unwrap_or(config.http_listen.clone());
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    wallbox: Option<FileWallboxConfig>,
    poller: Option<FilePollerConfig>,
    http: Option<FileHttpConfig>,
}

#[derive(Debug, Deserialize)]
struct FileWallboxConfig {
    host: Option<String>,
    port: Option<u16>,
    bind_port: Option<u16>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FilePollerConfig {
    poll_interval_ms: Option<u64>,
    history_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileHttpConfig {
    listen: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("KEBA_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut CollectorConfig, file: FileConfig) {
    if let Some(wallbox) = file.wallbox {
        if let Some(host) = wallbox.host {
            config.wallbox.host = host;
        }
        if let Some(port) = wallbox.port {
            config.wallbox.port = port;
        }
        if let Some(bind_port) = wallbox.bind_port {
            config.wallbox.bind_port = Some(bind_port);
        }
        if let Some(timeout_ms) = wallbox.timeout_ms {
            config.wallbox.timeout_ms = timeout_ms;
        }
    }

    if let Some(poller) = file.poller {
        if let Some(interval_ms) = poller.poll_interval_ms {
            config.poller.poll_interval = Duration::from_millis(interval_ms);
        }
        if let Some(interval_ms) = poller.history_interval_ms {
            config.poller.history_interval = Duration::from_millis(interval_ms);
        }
    }

    if let Some(listen) = file.http.and_then(|http| http.listen) {
        config.http_listen = listen;
    }
}

fn parse_env_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}
