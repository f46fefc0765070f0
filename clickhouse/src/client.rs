use async_trait::async_trait;
use common::config::ClickHouseConfig;
use log::{debug, info};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;

use crate::{ClickHouseError, DatabaseControl, Disk, Result};

/// Client for the ClickHouse HTTP interface
pub struct ClickHouse {
    http: reqwest::Client,
    url: String,
    username: String,
    password: String,
    data_path: String,
}

impl ClickHouse {
    pub fn new(config: &ClickHouseConfig) -> Result<Self> {
        let scheme = if config.secure { "https" } else { "http" };
        let url = format!("{scheme}://{}:{}/", config.host, config.port);
        Self::with_url(
            url,
            &config.username,
            &config.password,
            &config.data_path,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn with_url(
        url: String,
        username: &str,
        password: &str,
        data_path: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url,
            username: username.to_string(),
            password: password.to_string(),
            data_path: data_path.to_string(),
        })
    }

    async fn execute(&self, query: &str) -> Result<String> {
        debug!("clickhouse query: {query}");
        let response = self
            .http
            .post(&self.url)
            .header("X-ClickHouse-User", &self.username)
            .header("X-ClickHouse-Key", &self.password)
            .body(query.to_string())
            .send()
            .await
            .map_err(|e| ClickHouseError::ConnectionError(e.to_string()))?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClickHouseError::ServerError {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(body)
    }

    /// Runs `query` and decodes every `JSONEachRow` line into `T`.
    async fn select<T: DeserializeOwned>(&self, query: &str) -> Result<Vec<T>> {
        let body = self
            .execute(&format!("{query} FORMAT JSONEachRow"))
            .await?;
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(ClickHouseError::from))
            .collect()
    }
}

#[async_trait]
impl DatabaseControl for ClickHouse {
    async fn connect(&self) -> Result<()> {
        let body = self.execute("SELECT 1").await?;
        if body.trim() != "1" {
            return Err(ClickHouseError::ConnectionError(format!(
                "unexpected ping response '{}'",
                body.trim()
            )));
        }
        info!("Connected to clickhouse at {}", self.url);
        Ok(())
    }

    async fn close(&self) {
        debug!("Closing clickhouse session at {}", self.url);
    }

    async fn default_path(&self) -> Result<PathBuf> {
        let disks = self.disks().await?;
        let path = disks
            .into_iter()
            .find(|d| d.name == "default")
            .map(|d| d.path)
            .unwrap_or_else(|| self.data_path.clone());
        Ok(PathBuf::from(path.trim_end_matches('/')))
    }

    async fn disks(&self) -> Result<Vec<Disk>> {
        let mut disks: Vec<Disk> = self
            .select("SELECT name, path FROM system.disks ORDER BY name")
            .await?;
        for disk in &mut disks {
            let trimmed = disk.path.trim_end_matches('/');
            if !trimmed.is_empty() {
                disk.path = trimmed.to_string();
            }
        }
        Ok(disks)
    }
}
