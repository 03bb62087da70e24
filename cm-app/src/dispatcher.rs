//! Downstream fan-out: every dispatched action lands in the SQLite clip
//! store and, when configured, is appended to the external report endpoint.
//! The core sees one verdict per dispatch; the first failing sink decides it.

use crate::storage::ClipStore;
use anyhow::Result;
use async_trait::async_trait;
use cm_core::{ActionDispatcher, ClipAction, DispatchError};
use std::time::Duration;

pub struct FanoutDispatcher {
    store: ClipStore,
    report: Option<ReportClient>,
}

impl FanoutDispatcher {
    pub fn new(store: ClipStore, report: Option<ReportClient>) -> Self {
        Self { store, report }
    }
}

#[async_trait]
impl ActionDispatcher for FanoutDispatcher {
    async fn dispatch(&self, action: &ClipAction) -> Result<(), DispatchError> {
        let inserted = self
            .store
            .insert_clip(action)
            .await
            .map_err(|e| DispatchError::Transient(format!("clip store write failed: {e:#}")))?;
        if !inserted {
            // A retried cycle re-dispatching the same command; the row is
            // already there.
            tracing::debug!(
                message_id = %action.message_id,
                "clip row already stored; skipping duplicate insert"
            );
        }

        if let Some(report) = &self.report {
            report.append(action).await?;
        }
        Ok(())
    }
}

/// Posts one row per clip to the configured report-append endpoint.
pub struct ReportClient {
    http: reqwest::Client,
    append_url: String,
    auth_token: Option<String>,
}

impl ReportClient {
    pub fn new(append_url: &str, auth_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            append_url: append_url.to_string(),
            auth_token: auth_token.filter(|token| !token.trim().is_empty()),
        })
    }

    async fn append(&self, action: &ClipAction) -> Result<(), DispatchError> {
        let body = serde_json::json!({
            "timestamp": action.event_time,
            "target_time": action.target_time,
            "video_id": action.stream_id,
            "moderator": action.moderator,
            "command": action.command,
            "channel_name": action.routing.channel_name,
            "short_name": action.routing.short_name,
            "sheet_id": action.routing.sheet_id,
        });

        let mut request = self.http.post(&self.append_url).json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Transient(format!("report append failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(DispatchError::Permanent(format!(
                "report endpoint rejected append: status={status} body={body}"
            )))
        } else {
            Err(DispatchError::Transient(format!(
                "report endpoint unavailable: status={status}"
            )))
        }
    }
}
