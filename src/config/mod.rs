//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{
    BackendKindArg, BackendOverride, CliArgs, Command, ServeArgs, ServeOverrides, UrlArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "strata";
const ENV_PREFIX: &str = "STRATA";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";
const DEFAULT_DIGEST_PREFIX: &str = "hrd";
const DEFAULT_METADATA_PREFIX: &str = "hrm";
const DEFAULT_LOCK_NAMESPACE: &str = "hrl";
const DEFAULT_UPSTREAM: &str = "http://127.0.0.1:3000/";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOCK_WAIT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_LOCK_POLL_INTERVAL_MS: u64 = 50;
const DEFAULT_MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;
const DEFAULT_RETRY_AFTER_SECS: u64 = 10;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub backend: BackendSettings,
    pub store: StoreSettings,
    pub proxy: ProxySettings,
    pub purge: PurgeSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: SocketAddr,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Redis,
    Memory,
}

impl From<BackendKindArg> for BackendKind {
    fn from(arg: BackendKindArg) -> Self {
        match arg {
            BackendKindArg::Redis => Self::Redis,
            BackendKindArg::Memory => Self::Memory,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub redis_url: String,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub digest_prefix: String,
    pub metadata_prefix: String,
    pub lock_namespace: String,
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub upstream: Url,
    pub upstream_timeout: Duration,
    pub lock_wait_timeout: Duration,
    pub lock_poll_interval: Duration,
    pub max_body_bytes: usize,
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone)]
pub struct PurgeSettings {
    pub allowed_ips: Vec<IpAddr>,
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

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("purge.allowed_ips")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Purge(args) | Command::Unlock(args) | Command::Inspect(args)) => {
            raw.apply_backend_override(&args.backend)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    backend: RawBackendSettings,
    store: RawStoreSettings,
    proxy: RawProxySettings,
    purge: RawPurgeSettings,
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
        if let Some(upstream) = overrides.upstream.as_ref() {
            self.proxy.upstream = Some(upstream.clone());
        }
        if let Some(timeout) = overrides.lock_wait_timeout_ms {
            self.proxy.lock_wait_timeout_ms = Some(timeout);
        }
        if let Some(limit) = overrides.max_body_bytes {
            self.proxy.max_body_bytes = Some(limit);
        }

        self.apply_backend_override(&overrides.backend);
    }

    fn apply_backend_override(&mut self, overrides: &BackendOverride) {
        if let Some(kind) = overrides.backend_kind {
            self.backend.kind = Some(kind.into());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.backend.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            backend,
            store,
            proxy,
            purge,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            backend: build_backend_settings(backend)?,
            store: build_store_settings(store)?,
            proxy: build_proxy_settings(proxy)?,
            purge: build_purge_settings(purge)?,
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

    let listen_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.listen_addr", reason))?;

    Ok(ServerSettings { listen_addr })
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

fn build_backend_settings(backend: RawBackendSettings) -> Result<BackendSettings, LoadError> {
    let kind = backend.kind.unwrap_or(BackendKind::Redis);
    let redis_url = backend
        .redis_url
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
    if kind == BackendKind::Redis && redis_url.is_empty() {
        return Err(LoadError::invalid(
            "backend.redis_url",
            "must not be empty when backend.kind = \"redis\"",
        ));
    }

    Ok(BackendSettings { kind, redis_url })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let digest_prefix = namespace(
        store.digest_prefix,
        DEFAULT_DIGEST_PREFIX,
        "store.digest_prefix",
    )?;
    let metadata_prefix = namespace(
        store.metadata_prefix,
        DEFAULT_METADATA_PREFIX,
        "store.metadata_prefix",
    )?;
    let lock_namespace = namespace(
        store.lock_namespace,
        DEFAULT_LOCK_NAMESPACE,
        "store.lock_namespace",
    )?;

    if digest_prefix == metadata_prefix {
        return Err(LoadError::invalid(
            "store.metadata_prefix",
            "must differ from store.digest_prefix",
        ));
    }

    Ok(StoreSettings {
        digest_prefix,
        metadata_prefix,
        lock_namespace,
    })
}

fn build_proxy_settings(proxy: RawProxySettings) -> Result<ProxySettings, LoadError> {
    let upstream_raw = proxy
        .upstream
        .unwrap_or_else(|| DEFAULT_UPSTREAM.to_string());
    let upstream = Url::parse(upstream_raw.trim())
        .map_err(|err| LoadError::invalid("proxy.upstream", format!("invalid URL: {err}")))?;
    if !matches!(upstream.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "proxy.upstream",
            "scheme must be http or https",
        ));
    }

    let upstream_timeout_secs = proxy
        .upstream_timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if upstream_timeout_secs == 0 {
        return Err(LoadError::invalid(
            "proxy.upstream_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let wait_ms = proxy
        .lock_wait_timeout_ms
        .unwrap_or(DEFAULT_LOCK_WAIT_TIMEOUT_MS);
    let poll_ms = proxy
        .lock_poll_interval_ms
        .unwrap_or(DEFAULT_LOCK_POLL_INTERVAL_MS);
    if poll_ms == 0 {
        return Err(LoadError::invalid(
            "proxy.lock_poll_interval_ms",
            "must be greater than zero",
        ));
    }
    if poll_ms > wait_ms {
        return Err(LoadError::invalid(
            "proxy.lock_poll_interval_ms",
            "must not exceed proxy.lock_wait_timeout_ms",
        ));
    }

    let max_body_value = proxy.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if max_body_value == 0 {
        return Err(LoadError::invalid(
            "proxy.max_body_bytes",
            "must be greater than zero",
        ));
    }
    let max_body_bytes = usize::try_from(max_body_value).map_err(|_| {
        LoadError::invalid(
            "proxy.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(ProxySettings {
        upstream,
        upstream_timeout: Duration::from_secs(upstream_timeout_secs),
        lock_wait_timeout: Duration::from_millis(wait_ms),
        lock_poll_interval: Duration::from_millis(poll_ms),
        max_body_bytes,
        retry_after_secs: proxy.retry_after_seconds.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
    })
}

fn build_purge_settings(purge: RawPurgeSettings) -> Result<PurgeSettings, LoadError> {
    let allowed_ips = match purge.allowed_ips {
        Some(values) => values
            .iter()
            .map(|value| {
                value.trim().parse::<IpAddr>().map_err(|err| {
                    LoadError::invalid("purge.allowed_ips", format!("`{value}`: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => vec![
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        ],
    };

    Ok(PurgeSettings { allowed_ips })
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
struct RawBackendSettings {
    kind: Option<BackendKind>,
    redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    digest_prefix: Option<String>,
    metadata_prefix: Option<String>,
    lock_namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProxySettings {
    upstream: Option<String>,
    upstream_timeout_seconds: Option<u64>,
    lock_wait_timeout_ms: Option<u64>,
    lock_poll_interval_ms: Option<u64>,
    max_body_bytes: Option<u64>,
    retry_after_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPurgeSettings {
    allowed_ips: Option<Vec<String>>,
}

/// Namespaces end up in backend keys and in a response header, so they are
/// restricted to visible ASCII without whitespace.
fn namespace(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    let value = value.unwrap_or_else(|| default.to_string());
    if value.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    if !value.bytes().all(|byte| byte.is_ascii_graphic()) {
        return Err(LoadError::invalid(
            key,
            "must contain only visible ASCII characters",
        ));
    }
    Ok(value)
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
