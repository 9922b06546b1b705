//! HTTP step executor
//!
//! Delegates steps to an external workflow service:
//!
//! - `GET  {base}/steps/{step}/{idempotency_key}`: 200 with a receipt when the
//!   step already took effect, 404 when it did not
//! - `POST {base}/steps/{step}`: run the step, 200/201 with a receipt
//!
//! 5xx, 408, 429 and transport errors are retryable; any other status is fatal.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{StepContext, StepError, StepExecutor, StepResult};
use crate::error::{MigratorError, MigratorResult};
use crate::types::{MigrationStep, StepReceipt};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    mint: &'a str,
    step: MigrationStep,
    idempotency_key: &'a str,
    attempt: u32,
    completed: &'a BTreeMap<MigrationStep, StepReceipt>,
}

/// Step executor calling an external workflow service over HTTP
#[derive(Debug, Clone)]
pub struct RemoteStepExecutor {
    client: Client,
    base_url: String,
}

impl RemoteStepExecutor {
    /// `timeout` bounds a single HTTP request
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> MigratorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MigratorError::Configuration(format!("step executor client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

async fn failure(response: Response) -> StepError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let reason = format!("HTTP {} - {}", status, body);
    if is_retryable_status(status) {
        StepError::Retryable(reason)
    } else {
        StepError::Fatal(reason)
    }
}

#[async_trait]
impl StepExecutor for RemoteStepExecutor {
    async fn check(&self, ctx: &StepContext) -> StepResult<Option<StepReceipt>> {
        let url = format!(
            "{}/steps/{}/{}",
            self.base_url, ctx.step, ctx.idempotency_key
        );
        debug!(mint = %ctx.mint, step = %ctx.step, "checking step completion");

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(failure(response).await),
        }
    }

    async fn execute(&self, ctx: &StepContext) -> StepResult<StepReceipt> {
        let url = format!("{}/steps/{}", self.base_url, ctx.step);
        let request = ExecuteRequest {
            mint: ctx.mint.as_str(),
            step: ctx.step,
            idempotency_key: &ctx.idempotency_key,
            attempt: ctx.attempt,
            completed: &ctx.completed,
        };
        debug!(mint = %ctx.mint, step = %ctx.step, attempt = ctx.attempt, "executing step");

        let response = self.client.post(&url).json(&request).send().await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(failure(response).await)
        }
    }
}
