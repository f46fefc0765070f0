pub mod client;
pub mod encode;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClickHouseError {
    #[error("can't connect to clickhouse: {0}")]
    ConnectionError(String),

    #[error("clickhouse returned {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("unexpected clickhouse response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ClickHouseError>;

/// A storage disk as configured on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub path: String,
}

/// Operations the backup tooling needs from a running server.
#[async_trait]
pub trait DatabaseControl: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn close(&self);

    /// Data root of the `default` disk.
    async fn default_path(&self) -> Result<PathBuf>;

    async fn disks(&self) -> Result<Vec<Disk>>;
}

pub use client::ClickHouse;
pub use encode::table_path_encode;
