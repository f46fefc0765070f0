mod file;

pub use ::config::ConfigError;

pub use file::{
    load_config, render_config, BackupConfig, ClickHouseConfig, FsConfig, GeneralConfig,
    S3Config, REMOTE_STORAGE_NONE,
};
