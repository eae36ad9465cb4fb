//! Client for the hosted relational store's REST interface.
//!
//! The store keeps one row per project: the latest `ProjectState` JSON blob plus
//! an update timestamp. Reads treat a missing row as a normal not-yet-created
//! condition, never an error; that path is exercised on every first message of a
//! new project.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use studioflow_proto::ProjectState;

pub const DEFAULT_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

const PROJECT_STATE_TABLE: &str = "project_states";

#[derive(Debug, Clone)]
pub struct StateStoreConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub request_attempts: usize,
}

impl StateStoreConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state_store_base_url_missing")]
    BaseUrlMissing,
    #[error("state_store_api_key_missing")]
    ApiKeyMissing,
    #[error("state_store_request_failed:{message}")]
    Request { message: String },
    #[error("state_store_read_failed:{message}")]
    Read { message: String },
    #[error("state_store_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("state_store_json_decode_failed:{message}")]
    Decode { message: String },
}

/// One persisted row: the latest snapshot for a project.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedProjectState {
    pub project_id: String,
    pub state: ProjectState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StateStoreClient {
    base_url: String,
    api_key: String,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

impl StateStoreClient {
    pub fn new(config: StateStoreConfig) -> Result<Self, StateStoreError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let api_key = config.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(StateStoreError::ApiKeyMissing);
        }
        Ok(Self {
            base_url,
            api_key,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn project_state_path(project_id: &str) -> String {
        format!(
            "/rest/v1/{PROJECT_STATE_TABLE}?project_id=eq.{}&select=project_id,state,updated_at",
            project_id.trim()
        )
    }

    #[must_use]
    pub fn project_state_upsert_path() -> String {
        format!("/rest/v1/{PROJECT_STATE_TABLE}?on_conflict=project_id")
    }

    /// Latest snapshot for a project, or `None` when the row has not been
    /// created yet.
    pub async fn fetch_project_state(
        &self,
        project_id: &str,
    ) -> Result<Option<PersistedProjectState>, StateStoreError> {
        let url = format!("{}{}", self.base_url, Self::project_state_path(project_id));
        let response = self.send_with_retries(|| self.http.get(url.as_str())).await?;
        let rows: Vec<PersistedProjectState> = decode_json_response(response).await?;
        Ok(rows.into_iter().next())
    }

    /// Replaces (or creates) the snapshot row for a project.
    pub async fn upsert_project_state(
        &self,
        project_id: &str,
        state: &ProjectState,
    ) -> Result<(), StateStoreError> {
        let url = format!("{}{}", self.base_url, Self::project_state_upsert_path());
        let row = PersistedProjectState {
            project_id: project_id.trim().to_string(),
            state: state.clone(),
            updated_at: Utc::now(),
        };
        let response = self
            .send_with_retries(|| {
                self.http
                    .post(url.as_str())
                    .header("prefer", "resolution=merge-duplicates")
                    .json(&row)
            })
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(format_http_error(status, &body));
        }
        Ok(())
    }

    async fn send_with_retries(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, StateStoreError> {
        let mut last_error: Option<String> = None;
        for attempt in 0..self.request_attempts {
            let request = build()
                .header("apikey", self.api_key.as_str())
                .header("authorization", format!("Bearer {}", self.api_key))
                .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
                .timeout(self.timeout);
            match request.send().await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }
        Err(StateStoreError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> StateStoreError {
    let body = String::from_utf8_lossy(body).trim().to_string();
    let body = if body.is_empty() {
        "<empty>".to_string()
    } else {
        body
    };
    StateStoreError::Http { status, body }
}

fn normalize_base_url(base_url: &str) -> Result<String, StateStoreError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(StateStoreError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, StateStoreError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| StateStoreError::Read {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| StateStoreError::Decode {
        message: error.to_string(),
    })
}
