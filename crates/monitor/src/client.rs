use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use studioflow_proto::OperationStatusResponse;

use crate::{
    machine::{PollObservation, StatusSnapshot},
    monitor::StatusSource,
};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum StatusClientError {
    #[error("status_base_url_missing")]
    BaseUrlMissing,
    #[error("status_client_build_failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// HTTP client for the gateway's status endpoint.
///
/// Never returns an error from a poll; every failure mode is classified into a
/// [`PollObservation`] so the state machine decides what it means.
pub struct StatusClient {
    base_url: String,
    http: reqwest::Client,
}

impl StatusClient {
    pub fn new(base_url: &str) -> Result<Self, StatusClientError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT_MS)
    }

    pub fn with_timeout(base_url: &str, timeout_ms: u64) -> Result<Self, StatusClientError> {
        let trimmed = base_url.trim();
        if trimmed.is_empty() {
            return Err(StatusClientError::BaseUrlMissing);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            base_url: normalize_base_url(trimmed),
            http,
        })
    }

    #[must_use]
    pub fn status_path(operation_id: &str) -> String {
        format!("/api/chat/status/{operation_id}")
    }

    pub async fn poll_status(&self, operation_id: &str) -> PollObservation {
        let url = format!("{}{}", self.base_url, Self::status_path(operation_id));
        let request_id = format!("req_{}", Uuid::new_v4().simple());
        let response = self
            .http
            .get(url)
            .header("x-request-id", request_id)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(error) if error.is_timeout() => {
                return PollObservation::GatewayUnavailable;
            }
            Err(error) => {
                tracing::debug!(operation_id = %operation_id, %error, "status poll transport error");
                return PollObservation::NetworkFailure;
            }
        };
        let status = response.status();
        if status.is_success() {
            return match response.json::<OperationStatusResponse>().await {
                Ok(body) => PollObservation::Status(StatusSnapshot {
                    status: body.status,
                    result: body.result,
                    error: body.error,
                }),
                Err(error) => {
                    tracing::debug!(operation_id = %operation_id, %error, "status body did not decode");
                    PollObservation::DecodeFailure
                }
            };
        }
        classify_error_status(status.as_u16())
    }
}

/// Maps a non-success HTTP status onto the machine's input language. Gateway
/// timeouts and upstream unavailability are transient; they must never read as
/// job failure.
#[must_use]
pub fn classify_error_status(code: u16) -> PollObservation {
    match code {
        404 | 410 => PollObservation::NotFound,
        408 | 502 | 503 | 504 | 524 => PollObservation::GatewayUnavailable,
        _ => PollObservation::NetworkFailure,
    }
}

fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

#[async_trait]
impl StatusSource for StatusClient {
    async fn poll(&self, operation_id: &str) -> PollObservation {
        self.poll_status(operation_id).await
    }
}
