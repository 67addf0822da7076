//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::render::DEFAULT_CONVERSION_TIMEOUT;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "html-pdf-export";
const ENV_PREFIX: &str = "HTML_PDF_EXPORT";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_RENDERER_BINARY: &str = "wkhtmltopdf";
const TMPDIR_ENV: &str = "HTML_PDF_EXPORT_TMPDIR";

/// Command-line arguments for the html-pdf-export binary.
#[derive(Debug, Parser)]
#[command(
    name = "html-pdf-export",
    version,
    about = "Render posted HTML documents to PDF"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "HTML_PDF_EXPORT_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the conversion HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the renderer executable (name on PATH or explicit path).
    #[arg(long = "renderer-binary", value_name = "PATH")]
    pub binary: Option<PathBuf>,

    /// Override the per-conversion deadline in milliseconds.
    #[arg(long = "renderer-timeout-ms", value_name = "MILLISECONDS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub render: RenderOverrides,

    /// Override the listener host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Override the listener port.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "graceful-shutdown-seconds", value_name = "SECONDS")]
    pub graceful_shutdown_seconds: Option<u64>,

    /// Override the directory holding per-request html/pdf artifacts.
    #[arg(long = "tmpdir", env = TMPDIR_ENV, value_name = "PATH")]
    pub tmpdir: Option<PathBuf>,

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
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub artifacts: ArtifactSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
pub struct RenderSettings {
    pub binary: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub directory: PathBuf,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides {
            tmpdir: std::env::var_os(TMPDIR_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
            ..ServeOverrides::default()
        }),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    artifacts: RawArtifactSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(directory) = overrides.tmpdir.as_ref() {
            self.artifacts.directory = Some(directory.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }

        self.apply_render_overrides(&overrides.render);
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(binary) = overrides.binary.as_ref() {
            self.render.binary = Some(binary.clone());
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.render.timeout_ms = Some(timeout_ms);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
            artifacts,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let render = build_render_settings(render)?;
        let artifacts = build_artifact_settings(artifacts)?;

        Ok(Self {
            server,
            logging,
            render,
            artifacts,
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

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
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

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let binary = render
        .binary
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RENDERER_BINARY));
    if binary.as_os_str().is_empty() {
        return Err(LoadError::invalid("render.binary", "path must not be empty"));
    }

    let timeout_ms = render
        .timeout_ms
        .unwrap_or(DEFAULT_CONVERSION_TIMEOUT.as_millis() as u64);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "render.timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(RenderSettings {
        binary,
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn build_artifact_settings(artifacts: RawArtifactSettings) -> Result<ArtifactSettings, LoadError> {
    let directory = artifacts.directory.unwrap_or_else(std::env::temp_dir);
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "artifacts.directory",
            "path must not be empty",
        ));
    }

    Ok(ArtifactSettings { directory })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    binary: Option<PathBuf>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawArtifactSettings {
    directory: Option<PathBuf>,
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
