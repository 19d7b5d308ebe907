use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};

/// Command-line arguments for the Strata binary.
#[derive(Debug, Parser)]
#[command(name = "strata", version, about = "Distributed HTTP response cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STRATA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching reverse proxy in front of the configured upstream.
    Serve(Box<ServeArgs>),
    /// Delete every stored variant of a URL.
    Purge(UrlArgs),
    /// Force-release the regeneration lock of a URL.
    Unlock(UrlArgs),
    /// Print the stored variants of a URL as JSON.
    Inspect(UrlArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKindArg {
    Redis,
    Memory,
}

#[derive(Debug, Args, Default, Clone)]
pub struct BackendOverride {
    /// Override the backend kind.
    #[arg(long = "backend-kind", value_name = "KIND", value_enum)]
    pub backend_kind: Option<BackendKindArg>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub backend: BackendOverride,

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

    /// Override the upstream origin URL.
    #[arg(long = "upstream", value_name = "URL")]
    pub upstream: Option<String>,

    /// Override how long a request waits for a concurrent regeneration.
    #[arg(long = "lock-wait-timeout-ms", value_name = "MILLIS")]
    pub lock_wait_timeout_ms: Option<u64>,

    /// Override the largest body that will be stored.
    #[arg(long = "max-body-bytes", value_name = "BYTES")]
    pub max_body_bytes: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct UrlArgs {
    #[command(flatten)]
    pub backend: BackendOverride,

    /// Absolute URL or path (paths resolve against http://localhost).
    #[arg(value_name = "URL")]
    pub url: String,
}
