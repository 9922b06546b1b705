//! API Client
//!
//! HTTP client for querying a running coordinator.

use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;

use crate::error::{CliError, CliResult};

/// Coordinator API client
pub struct MigratorClient {
    client: Client,
    base_url: String,
}

impl MigratorClient {
    pub fn new(base_url: impl Into<String>) -> CliResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CliError::config(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Migration record snapshot of a mint
    pub async fn token(&self, mint: &str) -> CliResult<Value> {
        let url = format!("{}/api/v1/tokens/{}", self.base_url, mint);
        let response = self.client.get(&url).send().await?;
        json_or_error(response).await
    }

    pub async fn health(&self) -> CliResult<Value> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        json_or_error(response).await
    }
}

async fn json_or_error(response: Response) -> CliResult<Value> {
    if response.status().is_success() {
        Ok(response.json().await?)
    } else {
        Err(CliError::api(
            response.status().as_u16(),
            response.text().await.unwrap_or_default(),
        ))
    }
}
