use config::{Config, ConfigError, Environment, File};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Sentinel for `general.remote_storage` that disables every remote operation.
pub const REMOTE_STORAGE_NONE: &str = "none";

const CONFIG_PATHS: [&str; 3] = [
    "/etc/chbackup/config.toml",
    "~/.config/chbackup/config.toml",
    "config.toml",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupConfig {
    pub general: GeneralConfig,
    pub clickhouse: ClickHouseConfig,
    pub s3: S3Config,
    pub fs: FsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// "none", "s3" or "fs"
    pub remote_storage: String,
    /// Upper bound on concurrently running metadata fetches and disk transfers
    pub download_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClickHouseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub secure: bool,
    pub timeout_secs: u64,
    /// Used when the server does not report a `default` disk
    pub data_path: String,
    /// Extra or overriding disk name → local path entries
    #[serde(default)]
    pub disk_mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Key prefix under which backups are stored
    pub path: String,
    pub force_path_style: bool,
    pub compression_format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FsConfig {
    pub path: String,
    pub compression_format: String,
}

impl BackupConfig {
    pub fn remote_storage_enabled(&self) -> bool {
        self.general.remote_storage != REMOTE_STORAGE_NONE
    }
}

/// Loads the configuration.
///
/// Sources, later ones winning:
/// 1. built-in defaults
/// 2. /etc/chbackup/config.toml, ~/.config/chbackup/config.toml, ./config.toml
/// 3. `explicit`, which must exist when given
/// 4. `CHBACKUP_<SECTION>__<KEY>` environment variables
pub fn load_config(explicit: Option<&Path>) -> Result<BackupConfig, ConfigError> {
    let config_builder = Config::builder()
        .set_default("general.remote_storage", REMOTE_STORAGE_NONE)?
        .set_default("general.download_concurrency", 4)?
        .set_default("clickhouse.host", "localhost")?
        .set_default("clickhouse.port", 8123)?
        .set_default("clickhouse.username", "default")?
        .set_default("clickhouse.password", "")?
        .set_default("clickhouse.secure", false)?
        .set_default("clickhouse.timeout_secs", 300)?
        .set_default("clickhouse.data_path", "/var/lib/clickhouse")?
        .set_default("s3.bucket", "")?
        .set_default("s3.region", None::<String>)?
        .set_default("s3.endpoint", None::<String>)?
        .set_default("s3.access_key", None::<String>)?
        .set_default("s3.secret_key", None::<String>)?
        .set_default("s3.path", "")?
        .set_default("s3.force_path_style", false)?
        .set_default("s3.compression_format", "gzip")?
        .set_default("fs.path", "")?
        .set_default("fs.compression_format", "gzip")?;

    let config_builder = CONFIG_PATHS.iter().fold(config_builder, |builder, path| {
        let path = shellexpand::full(path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| path.to_string());
        if Path::new(&path).exists() {
            debug!("Reading configuration from {path}");
            builder.add_source(File::with_name(&path))
        } else {
            builder
        }
    });

    let config_builder = match explicit {
        Some(path) => config_builder.add_source(File::from(path).required(true)),
        None => config_builder,
    };

    config_builder
        .add_source(
            Environment::with_prefix("CHBACKUP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?
        .try_deserialize()
}

/// Renders the effective configuration as TOML.
pub fn render_config(config: &BackupConfig) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(config)
}
