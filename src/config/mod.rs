//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::DEFAULT_SUPPRESSION_WINDOW_SECS;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "fleetcache";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;
const DEFAULT_STARTUP_DELAY_SECS: u64 = 10;
const DEFAULT_PEER_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_API_URL: &str = "https://kubernetes.default.svc";
const DEFAULT_LABEL_SELECTOR: &str = "app=fleetcache";
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8080/";
const DEFAULT_MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;
const POD_IP_ENV: &str = "POD_IP";

/// Command-line arguments for the fleetcache binary.
#[derive(Debug, Parser)]
#[command(name = "fleetcache", version, about = "Fleet-coherent page cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FLEETCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve cached pages in front of the renderer.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle page caching. Purges are answered either way.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override how long an edited path stays uncacheable.
    #[arg(long = "cache-suppression-window-seconds", value_name = "SECONDS")]
    pub cache_suppression_window_seconds: Option<u64>,

    /// Override the peer directory refresh interval.
    #[arg(long = "peers-refresh-interval-seconds", value_name = "SECONDS")]
    pub peers_refresh_interval_seconds: Option<u64>,

    /// Override the port peers are contacted on.
    #[arg(long = "peers-port", value_name = "PORT")]
    pub peers_port: Option<u16>,

    /// Override the pod label selector used for discovery.
    #[arg(long = "peers-label-selector", value_name = "SELECTOR")]
    pub peers_label_selector: Option<String>,

    /// Override the renderer base URL.
    #[arg(long = "render-upstream-url", value_name = "URL")]
    pub render_upstream_url: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub peers: PeerSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub suppression_window: Duration,
}

#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub refresh_interval: Duration,
    pub startup_delay: Duration,
    /// Port peers listen on; defaults to this instance's own listener port.
    pub port: u16,
    pub api_url: Url,
    /// Explicit namespace. When unset, read from `namespace_path`.
    pub namespace: Option<String>,
    pub label_selector: String,
    pub token_path: PathBuf,
    pub ca_path: PathBuf,
    pub namespace_path: PathBuf,
    /// Timeout for the orchestration API call. Peer purges have none.
    pub request_timeout: Duration,
    /// This instance's own address, excluded from the peer set.
    pub self_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub upstream_url: Url,
    pub max_body_bytes: usize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("FLEETCACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    if raw.peers.self_address.is_none() {
        raw.peers.self_address = std::env::var(POD_IP_ENV).ok();
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    peers: RawPeerSettings,
    render: RawRenderSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.cache_suppression_window_seconds {
            self.cache.suppression_window_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.peers_refresh_interval_seconds {
            self.peers.refresh_interval_seconds = Some(seconds);
        }
        if let Some(port) = overrides.peers_port {
            self.peers.port = Some(port);
        }
        if let Some(selector) = overrides.peers_label_selector.as_ref() {
            self.peers.label_selector = Some(selector.clone());
        }
        if let Some(url) = overrides.render_upstream_url.as_ref() {
            self.render.upstream_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            peers,
            render,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let peers = build_peer_settings(peers, server.addr.port())?;
        let render = build_render_settings(render)?;

        Ok(Self {
            server,
            logging,
            cache,
            peers,
            render,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let suppression_window = non_zero_secs(
        cache
            .suppression_window_seconds
            .unwrap_or(DEFAULT_SUPPRESSION_WINDOW_SECS),
        "cache.suppression_window_seconds",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        suppression_window,
    })
}

fn build_peer_settings(
    peers: RawPeerSettings,
    server_port: u16,
) -> Result<PeerSettings, LoadError> {
    let refresh_interval = non_zero_secs(
        peers
            .refresh_interval_seconds
            .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS),
        "peers.refresh_interval_seconds",
    )?;
    let startup_delay = Duration::from_secs(
        peers
            .startup_delay_seconds
            .unwrap_or(DEFAULT_STARTUP_DELAY_SECS),
    );
    let request_timeout = non_zero_secs(
        peers
            .request_timeout_seconds
            .unwrap_or(DEFAULT_PEER_REQUEST_TIMEOUT_SECS),
        "peers.request_timeout_seconds",
    )?;

    let port = peers.port.unwrap_or(server_port);
    if port == 0 {
        return Err(LoadError::invalid(
            "peers.port",
            "port must be greater than zero",
        ));
    }

    let api_url = parse_url(
        peers.api_url.as_deref().unwrap_or(DEFAULT_API_URL),
        "peers.api_url",
    )?;

    let label_selector = peers
        .label_selector
        .unwrap_or_else(|| DEFAULT_LABEL_SELECTOR.to_string());
    if label_selector.trim().is_empty() {
        return Err(LoadError::invalid(
            "peers.label_selector",
            "selector must not be empty",
        ));
    }

    let namespace = non_blank(peers.namespace);
    let self_address = non_blank(peers.self_address);
    let service_account = PathBuf::from(SERVICE_ACCOUNT_DIR);

    Ok(PeerSettings {
        refresh_interval,
        startup_delay,
        port,
        api_url,
        namespace,
        label_selector,
        token_path: peers
            .token_path
            .unwrap_or_else(|| service_account.join("token")),
        ca_path: peers
            .ca_path
            .unwrap_or_else(|| service_account.join("ca.crt")),
        namespace_path: peers
            .namespace_path
            .unwrap_or_else(|| service_account.join("namespace")),
        request_timeout,
        self_address,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let upstream_url = parse_url(
        render.upstream_url.as_deref().unwrap_or(DEFAULT_UPSTREAM_URL),
        "render.upstream_url",
    )?;

    let max_body_bytes_value = render.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if max_body_bytes_value == 0 {
        return Err(LoadError::invalid(
            "render.max_body_bytes",
            "must be greater than zero",
        ));
    }
    let max_body_bytes = usize::try_from(max_body_bytes_value).map_err(|_| {
        LoadError::invalid(
            "render.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(RenderSettings {
        upstream_url,
        max_body_bytes,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    suppression_window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPeerSettings {
    refresh_interval_seconds: Option<u64>,
    startup_delay_seconds: Option<u64>,
    port: Option<u16>,
    api_url: Option<String>,
    namespace: Option<String>,
    label_selector: Option<String>,
    token_path: Option<PathBuf>,
    ca_path: Option<PathBuf>,
    namespace_path: Option<PathBuf>,
    request_timeout_seconds: Option<u64>,
    self_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    upstream_url: Option<String>,
    max_body_bytes: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{value}`: {err}")))?;
    if url.cannot_be_a_base() {
        return Err(LoadError::invalid(key, format!("`{value}` is not a base URL")));
    }
    Ok(url)
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
        assert!(settings.cache.enabled);
        assert_eq!(
            settings.cache.suppression_window,
            Duration::from_secs(DEFAULT_SUPPRESSION_WINDOW_SECS)
        );
        assert_eq!(settings.peers.refresh_interval, Duration::from_secs(300));
        assert_eq!(settings.peers.startup_delay, Duration::from_secs(10));
        assert_eq!(settings.peers.label_selector, DEFAULT_LABEL_SELECTOR);
        assert_eq!(
            settings.peers.token_path,
            PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token")
        );
        assert_eq!(settings.peers.namespace, None);
        assert_eq!(settings.render.max_body_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());
        raw.cache.enabled = Some(true);

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            cache_enabled: Some(false),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert!(!settings.cache.enabled);
    }

    #[test]
    fn peer_port_follows_server_port() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(8081);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.peers.port, 8081);

        let mut raw = RawSettings::default();
        raw.server.port = Some(8081);
        raw.peers.port = Some(9000);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.peers.port, 9000);
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.suppression_window_seconds = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero window rejected");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.suppression_window_seconds",
                ..
            }
        ));

        let mut raw = RawSettings::default();
        raw.peers.refresh_interval_seconds = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero interval rejected");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "peers.refresh_interval_seconds",
                ..
            }
        ));
    }

    #[test]
    fn zero_startup_delay_is_allowed() {
        let mut raw = RawSettings::default();
        raw.peers.startup_delay_seconds = Some(0);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.peers.startup_delay, Duration::ZERO);
    }

    #[test]
    fn malformed_urls_are_rejected() {
        let mut raw = RawSettings::default();
        raw.render.upstream_url = Some("not a url".to_string());
        let err = Settings::from_raw(raw).expect_err("bad url rejected");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "render.upstream_url",
                ..
            }
        ));

        let mut raw = RawSettings::default();
        raw.peers.api_url = Some("mailto:ops@example.com".to_string());
        let err = Settings::from_raw(raw).expect_err("non-base url rejected");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "peers.api_url",
                ..
            }
        ));
    }

    #[test]
    fn empty_label_selector_is_rejected() {
        let mut raw = RawSettings::default();
        raw.peers.label_selector = Some("  ".to_string());
        let err = Settings::from_raw(raw).expect_err("empty selector rejected");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "peers.label_selector",
                ..
            }
        ));
    }

    #[test]
    fn blank_namespace_and_self_address_are_unset() {
        let mut raw = RawSettings::default();
        raw.peers.namespace = Some(" ".to_string());
        raw.peers.self_address = Some(String::new());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.peers.namespace, None);
        assert_eq!(settings.peers.self_address, None);
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["fleetcache"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_serve_arguments() {
        let args = CliArgs::parse_from([
            "fleetcache",
            "serve",
            "--server-port",
            "8080",
            "--peers-label-selector",
            "app=www",
            "--cache-enabled",
            "false",
        ]);

        let Some(Command::Serve(serve)) = args.command else {
            panic!("expected serve command");
        };
        assert_eq!(serve.overrides.server_port, Some(8080));
        assert_eq!(
            serve.overrides.peers_label_selector.as_deref(),
            Some("app=www")
        );
        assert_eq!(serve.overrides.cache_enabled, Some(false));
    }
}
