//! Command line and configuration file handling.
//!
//! Every setting can come from the command line or from a TOML file given
//! with `--config`. Command line values win.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use dropship_common::BatchMode;
use dropship_transport::{Credentials, TransportKind};
use dropship_watcher::WatchConfig;
use serde::Deserialize;
use url::Url;

const DEFAULT_QUEUE_CAPACITY: usize = 1000;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Ship settled files from a watched directory to a remote destination.
#[derive(Debug, Default, Parser)]
#[command(name = "dropship", version, about)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub settings: RawConfig,
}

/// Settings as given, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, clap::Args)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    /// Directory to watch
    #[arg(long, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Settle duration in milliseconds
    #[arg(long, value_name = "MS", conflicts_with = "settle_secs")]
    pub settle_ms: Option<u64>,

    /// Settle duration in seconds
    #[arg(long, value_name = "SECS")]
    pub settle_secs: Option<u64>,

    /// plain, top-level-group, flat-archive, zip-per-unit or tar-per-unit
    #[arg(long, value_name = "MODE")]
    pub batch_mode: Option<String>,

    /// Regex whose capture groups name flat-archive groups
    #[arg(long, value_name = "REGEX")]
    pub naming_pattern: Option<String>,

    /// webdav or sftp
    #[arg(long, value_name = "KIND")]
    pub transport: Option<String>,

    /// Working directory for staging areas
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Directory of pre-send hook executables
    #[arg(long, value_name = "DIR")]
    pub hooks_dir: Option<PathBuf>,

    /// Capacity of the ready-unit queue
    #[arg(long, value_name = "N")]
    pub queue_capacity: Option<usize>,

    /// Primary destination URL
    #[arg(long)]
    pub url: Option<String>,

    /// Primary destination user
    #[arg(long)]
    pub user: Option<String>,

    /// Primary destination password
    #[arg(long, env = "DROPSHIP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Converted destination URL
    #[arg(long)]
    pub converted_url: Option<String>,

    /// Converted destination user
    #[arg(long)]
    pub converted_user: Option<String>,

    /// Converted destination password
    #[arg(long, env = "DROPSHIP_CONVERTED_PASSWORD", hide_env_values = true)]
    pub converted_password: Option<String>,

    /// Log filter, e.g. `info` or `dropship_delivery=debug`
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Also write logs to daily files in this directory
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

impl RawConfig {
    /// Read a TOML configuration file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Combine command line values with a config file, or use them alone.
    pub fn load(cli: Cli) -> anyhow::Result<Self> {
        match &cli.config {
            Some(path) => Ok(cli.settings.or(Self::from_file(path)?)),
            None => Ok(cli.settings),
        }
    }

    /// Fill every unset field from `fallback`.
    pub fn or(self, fallback: Self) -> Self {
        Self {
            source: self.source.or(fallback.source),
            settle_ms: self.settle_ms.or(fallback.settle_ms),
            settle_secs: self.settle_secs.or(fallback.settle_secs),
            batch_mode: self.batch_mode.or(fallback.batch_mode),
            naming_pattern: self.naming_pattern.or(fallback.naming_pattern),
            transport: self.transport.or(fallback.transport),
            work_dir: self.work_dir.or(fallback.work_dir),
            hooks_dir: self.hooks_dir.or(fallback.hooks_dir),
            queue_capacity: self.queue_capacity.or(fallback.queue_capacity),
            url: self.url.or(fallback.url),
            user: self.user.or(fallback.user),
            password: self.password.or(fallback.password),
            converted_url: self.converted_url.or(fallback.converted_url),
            converted_user: self.converted_user.or(fallback.converted_user),
            converted_password: self.converted_password.or(fallback.converted_password),
            log_level: self.log_level.or(fallback.log_level),
            log_dir: self.log_dir.or(fallback.log_dir),
        }
    }

    /// Log filter to install.
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }
}

/// A destination endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: Url,
    pub credentials: Credentials,
}

/// Validated settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub watch: WatchConfig,
    pub transport: TransportKind,
    pub work_dir: PathBuf,
    pub hooks_dir: Option<PathBuf>,
    pub queue_capacity: usize,
    pub primary: Endpoint,
    pub converted: Option<Endpoint>,
}

impl Settings {
    /// Validate raw settings.
    pub fn resolve(raw: RawConfig) -> anyhow::Result<Self> {
        let source = raw.source.context("`source` is required")?;

        let settle = match (raw.settle_ms, raw.settle_secs) {
            (Some(_), Some(_)) => bail!("set only one of `settle_ms` and `settle_secs`"),
            (Some(ms), None) => Duration::from_millis(ms),
            (None, Some(secs)) => Duration::from_secs(secs),
            (None, None) => bail!("`settle_ms` or `settle_secs` is required"),
        };

        let batch_mode = match raw.batch_mode.as_deref() {
            Some(mode) => mode.parse::<BatchMode>()?,
            None => BatchMode::default(),
        };

        let mut watch = WatchConfig::new(source, settle).with_mode(batch_mode);
        if let Some(pattern) = raw.naming_pattern.as_deref() {
            watch = watch
                .with_naming_pattern(pattern)
                .with_context(|| format!("invalid naming pattern `{pattern}`"))?;
        }
        watch.validate()?;

        let transport = raw
            .transport
            .as_deref()
            .context("`transport` is required")?
            .parse::<TransportKind>()?;

        let queue_capacity = raw.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            bail!("queue capacity must be greater than zero");
        }

        let primary = Endpoint {
            url: parse_url(raw.url.as_deref().context("`url` is required")?)?,
            credentials: Credentials::new(
                raw.user.unwrap_or_default(),
                raw.password.unwrap_or_default(),
            ),
        };

        let converted = match raw.converted_url.as_deref() {
            Some(url) => Some(Endpoint {
                url: parse_url(url)?,
                credentials: Credentials::new(
                    raw.converted_user.unwrap_or_default(),
                    raw.converted_password.unwrap_or_default(),
                ),
            }),
            None if raw.converted_user.is_some() || raw.converted_password.is_some() => {
                bail!("converted credentials given without `converted_url`")
            }
            None => None,
        };

        Ok(Self {
            watch,
            transport,
            work_dir: raw
                .work_dir
                .unwrap_or_else(|| std::env::temp_dir().join("dropship")),
            hooks_dir: raw.hooks_dir,
            queue_capacity,
            primary,
            converted,
        })
    }
}

fn parse_url(raw: &str) -> anyhow::Result<Url> {
    Url::parse(raw).with_context(|| format!("invalid url `{raw}`"))
}
