//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::purge::DriverKind;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "scopa";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_ARCHIVE_DEPTH: u32 = 3;
const DEFAULT_QUEUE_NAME: &str = "purge";
const DEFAULT_BATCH_LIMIT: u32 = 100;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_RESERVE_LEASE_SECS: u64 = 120;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Command-line arguments for the Scopa binary.
#[derive(Debug, Parser)]
#[command(name = "scopa", version, about = "Scopa edge cache purge dispatcher")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SCOPA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the queue drain worker.
    Serve(Box<ServeArgs>),
    /// Dispatch a purge from the command line.
    Purge(PurgeArgs),
    /// Inspect the purge queue.
    Queue(QueueArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the active purge driver (cloudflare|edge_cdn).
    #[arg(long = "purge-driver", value_name = "DRIVER")]
    pub purge_driver: Option<String>,

    /// Toggle queue-and-drain purging.
    #[arg(
        long = "purge-queued",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub purge_queued: Option<bool>,

    /// Override the per-tick queue batch limit.
    #[arg(long = "purge-batch-limit", value_name = "COUNT")]
    pub purge_batch_limit: Option<u32>,

    /// Override the attempt ceiling before an item is dead.
    #[arg(long = "purge-max-attempts", value_name = "COUNT")]
    pub purge_max_attempts: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(subcommand)]
    pub command: PurgeCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum PurgeCommand {
    /// Purge a single URL.
    Url {
        #[arg(value_name = "URL")]
        url: String,
    },
    /// Purge a batch of URLs.
    Urls {
        #[arg(value_name = "URL", num_args = 1..)]
        urls: Vec<String>,
    },
    /// Purge everything under the configured zone or environment.
    All,
    /// Resolve a post into its URL set and purge that.
    Post {
        #[arg(value_name = "ID")]
        id: uuid::Uuid,
    },
    /// Resolve a taxonomy term into its URL set and purge that.
    Term {
        #[arg(value_name = "ID")]
        id: uuid::Uuid,
    },
}

#[derive(Debug, Args, Clone)]
pub struct QueueArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(subcommand)]
    pub command: QueueCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum QueueCommand {
    /// Show queue counters.
    Status,
    /// List items that exhausted their attempts.
    Dead {
        /// Maximum number of items to list.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub site: SiteSettings,
    pub purge: PurgeSettings,
    pub http: HttpSettings,
    pub cloudflare: CloudflareSettings,
    pub edge: EdgeSettings,
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
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// Base URL of the site whose cache this instance purges.
    pub base_url: Option<Url>,
    /// How many paginated index pages to expand per archive.
    pub archive_depth: u32,
}

#[derive(Debug, Clone)]
pub struct PurgeSettings {
    pub driver: Option<DriverKind>,
    /// Queue purges and drain them on the cron tick instead of dispatching
    /// inline.
    pub queued: bool,
    pub queue_name: String,
    pub batch_limit: NonZeroU32,
    pub max_attempts: NonZeroU32,
    pub reserve_lease: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CloudflareSettings {
    pub api_token: Option<String>,
    pub zone_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EdgeSettings {
    pub base_url: Option<Url>,
    pub api_key: Option<String>,
    pub environment_id: Option<String>,
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

    builder = builder.add_source(Environment::with_prefix("SCOPA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Purge(args)) => raw.apply_database_override(&args.database),
        Some(Command::Queue(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    site: RawSiteSettings,
    purge: RawPurgeSettings,
    http: RawHttpSettings,
    cloudflare: RawCloudflareSettings,
    edge: RawEdgeSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(driver) = overrides.purge_driver.as_ref() {
            self.purge.driver = Some(driver.clone());
        }
        if let Some(queued) = overrides.purge_queued {
            self.purge.queued = Some(queued);
        }
        if let Some(limit) = overrides.purge_batch_limit {
            self.purge.batch_limit = Some(limit);
        }
        if let Some(max) = overrides.purge_max_attempts {
            self.purge.max_attempts = Some(max);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            site,
            purge,
            http,
            cloudflare,
            edge,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let site = build_site_settings(site)?;
        let purge = build_purge_settings(purge)?;
        let http = build_http_settings(http)?;
        let cloudflare = build_cloudflare_settings(cloudflare);
        let edge = build_edge_settings(edge)?;

        Ok(Self {
            logging,
            database,
            site,
            purge,
            http,
            cloudflare,
            edge,
        })
    }
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_value.into(), "database.max_connections")?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let base_url = site
        .base_url
        .map(|value| {
            Url::parse(value.trim()).map_err(|err| {
                LoadError::invalid("site.base_url", format!("failed to parse: {err}"))
            })
        })
        .transpose()?;

    let archive_depth = site.archive_depth.unwrap_or(DEFAULT_ARCHIVE_DEPTH);

    Ok(SiteSettings {
        base_url,
        archive_depth,
    })
}

fn build_purge_settings(purge: RawPurgeSettings) -> Result<PurgeSettings, LoadError> {
    let driver = purge
        .driver
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            DriverKind::try_from(value).map_err(|_| {
                LoadError::invalid(
                    "purge.driver",
                    format!("unknown driver `{value}`, expected cloudflare or edge_cdn"),
                )
            })
        })
        .transpose()?;

    let queue_name = purge
        .queue_name
        .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());
    if queue_name.trim().is_empty() {
        return Err(LoadError::invalid(
            "purge.queue_name",
            "queue name must not be empty",
        ));
    }

    let batch_limit = non_zero_u32(
        purge.batch_limit.unwrap_or(DEFAULT_BATCH_LIMIT).into(),
        "purge.batch_limit",
    )?;
    let max_attempts = non_zero_u32(
        purge.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).into(),
        "purge.max_attempts",
    )?;

    let lease_seconds = purge
        .reserve_lease_seconds
        .unwrap_or(DEFAULT_RESERVE_LEASE_SECS);
    if lease_seconds == 0 {
        return Err(LoadError::invalid(
            "purge.reserve_lease_seconds",
            "must be greater than zero",
        ));
    }

    Ok(PurgeSettings {
        driver,
        queued: purge.queued.unwrap_or(false),
        queue_name,
        batch_limit,
        max_attempts,
        reserve_lease: Duration::from_secs(lease_seconds),
    })
}

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let timeout_seconds = http.timeout_seconds.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "http.timeout_seconds",
            "must be greater than zero",
        ));
    }
    Ok(HttpSettings { timeout_seconds })
}

fn build_cloudflare_settings(cloudflare: RawCloudflareSettings) -> CloudflareSettings {
    CloudflareSettings {
        api_token: non_empty(cloudflare.api_token),
        zone_id: non_empty(cloudflare.zone_id),
    }
}

fn build_edge_settings(edge: RawEdgeSettings) -> Result<EdgeSettings, LoadError> {
    let base_url = non_empty(edge.base_url)
        .map(|value| {
            Url::parse(&value).map_err(|err| {
                LoadError::invalid("edge.base_url", format!("failed to parse: {err}"))
            })
        })
        .transpose()?;

    Ok(EdgeSettings {
        base_url,
        api_key: non_empty(edge.api_key),
        environment_id: non_empty(edge.environment_id),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    base_url: Option<String>,
    archive_depth: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPurgeSettings {
    driver: Option<String>,
    queued: Option<bool>,
    queue_name: Option<String>,
    batch_limit: Option<u32>,
    max_attempts: Option<u32>,
    reserve_lease_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCloudflareSettings {
    api_token: Option<String>,
    zone_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEdgeSettings {
    base_url: Option<String>,
    api_key: Option<String>,
    environment_id: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
