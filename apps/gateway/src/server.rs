use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;

use studioflow_proto::{
    looks_like_operation_id, new_operation_id, CallbackAck, CompletionCallbackRequest,
    DurationBreakdown, OperationStatusResponse, SubmitAcceptedResponse, SubmitChatRequest,
};
use studioflow_state_store::StateStoreClient;

use crate::{
    config::Config,
    registry::{OperationRecord, OperationRegistry, RegistryError},
    workflow::{normalize_workflow_reply, WorkflowClient},
};


const SYNC_GRACE_POLL_MS: u64 = 100;
const ESTIMATED_TIME: &str = "typically 1-5 minutes";

#[derive(Clone)]
pub struct AppState {
    config: Config,
    registry: Arc<OperationRegistry>,
    workflow: Option<Arc<WorkflowClient>>,
    state_store: Option<Arc<StateStoreClient>>,
    started_at: chrono::DateTime<Utc>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Config,
        registry: Arc<OperationRegistry>,
        workflow: Option<Arc<WorkflowClient>>,
        state_store: Option<Arc<StateStoreClient>>,
    ) -> Self {
        Self {
            config,
            registry,
            workflow,
            state_store,
            started_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> Arc<OperationRegistry> {
        self.registry.clone()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: String,
    build_sha: String,
    uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    workflow_configured: bool,
    state_store_configured: bool,
}

#[derive(Debug, Serialize)]
struct OperationsListResponse {
    operations: Vec<String>,
    count: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(readiness))
        .route("/api/chat", post(submit_chat))
        .route("/api/chat/status/:operation_id", get(get_operation_status))
        .route("/api/chat/callback", post(completion_callback))
        .route("/api/chat/operations", get(list_operations))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds();
    Json(HealthResponse {
        status: "ok",
        service: state.config.service_name,
        build_sha: state.config.build_sha,
        uptime_seconds,
    })
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let workflow_configured = state.workflow.is_some();
    let status = if workflow_configured {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            status: if workflow_configured { "ready" } else { "not_ready" },
            workflow_configured,
            state_store_configured: state.state_store.is_some(),
        }),
    )
}

/// Accepts a chat message and forwards it to the workflow.
///
/// The workflow call runs detached; the handler waits only a short sync-grace
/// window so trivially fast jobs answer with the final result directly, and
/// everything slower gets a 202 with the operation id to poll.
async fn submit_chat(
    State(state): State<AppState>,
    Json(body): Json<SubmitChatRequest>,
) -> Result<axum::response::Response, ApiError> {
    if body.project_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("projectId is required".to_string()));
    }
    let workflow = state
        .workflow
        .clone()
        .ok_or_else(|| ApiError::Config("workflow webhook URL is not configured".to_string()))?;

    let operation_id = new_operation_id();
    state
        .registry
        .insert_pending(&operation_id, body.project_id.trim())
        .await
        .map_err(ApiError::from_registry)?;

    tracing::info!(
        operation_id = %operation_id,
        project_id = %body.project_id,
        "chat submission accepted, dispatching to workflow"
    );

    tokio::spawn(run_workflow_operation(
        state.registry.clone(),
        workflow,
        state.state_store.clone(),
        operation_id.clone(),
        body,
    ));

    // Trivially fast jobs resolve inside the grace window and answer
    // synchronously with the final status shape.
    let grace = Duration::from_millis(state.config.sync_response_grace_ms);
    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if let Some(record) = state.registry.get(&operation_id).await {
            if record.is_terminal() {
                tracing::info!(operation_id = %operation_id, "operation resolved within sync grace");
                return Ok((StatusCode::OK, Json(status_response(&record))).into_response());
            }
        }
        tokio::time::sleep(Duration::from_millis(SYNC_GRACE_POLL_MS)).await;
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitAcceptedResponse {
            operation_id,
            status: "accepted".to_string(),
            message: "Your request is being processed.".to_string(),
            estimated_time: ESTIMATED_TIME.to_string(),
        }),
    )
        .into_response())
}

/// Detached continuation of a submission: calls the workflow, normalizes the
/// reply, and writes the terminal status. Gateway-level failures leave the
/// record pending because the job may still be progressing upstream.
async fn run_workflow_operation(
    registry: Arc<OperationRegistry>,
    workflow: Arc<WorkflowClient>,
    state_store: Option<Arc<StateStoreClient>>,
    operation_id: String,
    request: SubmitChatRequest,
) {
    let project_id = request.project_id.trim().to_string();
    match workflow.send_chat(&operation_id, &request).await {
        Ok(raw) => {
            let result = normalize_workflow_reply(raw, &project_id);
            match registry.complete(&operation_id, result.clone()).await {
                Ok((_, true)) => {
                    tracing::info!(operation_id = %operation_id, "operation completed via gateway continuation");
                    backup_project_state(state_store, &project_id, &result.updated_state).await;
                }
                Ok((record, false)) => {
                    tracing::info!(
                        operation_id = %operation_id,
                        status = record.status.as_str(),
                        "operation already terminal, gateway continuation is a no-op"
                    );
                }
                Err(error) => {
                    tracing::warn!(operation_id = %operation_id, %error, "operation vanished before completion write");
                }
            }
        }
        Err(error) if error.is_gateway_level() => {
            tracing::warn!(
                operation_id = %operation_id,
                %error,
                "gateway-level workflow failure, leaving operation pending"
            );
        }
        Err(error) => {
            tracing::warn!(operation_id = %operation_id, %error, "workflow call failed");
            if let Err(write_error) = registry.fail(&operation_id, error.to_string()).await {
                tracing::warn!(operation_id = %operation_id, %write_error, "failure write did not apply");
            }
        }
    }
}

async fn backup_project_state(
    state_store: Option<Arc<StateStoreClient>>,
    project_id: &str,
    state: &studioflow_proto::ProjectState,
) {
    let Some(client) = state_store else {
        return;
    };
    if let Err(error) = client.upsert_project_state(project_id, state).await {
        // Best effort: the registry already carries the result, and the client
        // monitor can still resolve through status polling.
        tracing::warn!(project_id = %project_id, %error, "project-state backup write failed");
    }
}

async fn get_operation_status(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Json<OperationStatusResponse>, ApiError> {
    if !looks_like_operation_id(&operation_id) {
        return Err(ApiError::InvalidRequest(
            "operationId must be an op_-prefixed token".to_string(),
        ));
    }
    let operation_id = operation_id.trim();

    let retention = chrono::Duration::seconds(state.config.registry_retention_seconds);
    if let Some(expired) = state.registry.take_if_expired(operation_id, retention).await {
        tracing::info!(operation_id = %expired.operation_id, "expired operation record evicted on read");
        return Err(ApiError::Expired);
    }

    let record = state
        .registry
        .get(operation_id)
        .await
        .ok_or(ApiError::NotFound)?;
    Ok(Json(status_response(&record)))
}

/// Alternate write path into the registry, invoked directly by the workflow
/// when it finishes. Duplicate callbacks for a terminal record are no-ops.
async fn completion_callback(
    State(state): State<AppState>,
    Json(body): Json<CompletionCallbackRequest>,
) -> Result<Json<CallbackAck>, ApiError> {
    let operation_id = body.operation_id.trim().to_string();
    let project_id = body.project_id.trim().to_string();
    if operation_id.is_empty() || project_id.is_empty() {
        return Err(ApiError::InvalidRequest(
            "operationId and projectId are required".to_string(),
        ));
    }
    if body.result.is_none() && body.error.is_none() {
        return Err(ApiError::InvalidRequest(
            "callback must carry either result or error".to_string(),
        ));
    }

    let (record, updated) = if let Some(raw_result) = body.result {
        let result = normalize_workflow_reply(raw_result, &project_id);
        let outcome = state
            .registry
            .complete(&operation_id, result.clone())
            .await
            .map_err(ApiError::from_registry)?;
        if outcome.1 {
            backup_project_state(state.state_store.clone(), &project_id, &result.updated_state)
                .await;
        }
        outcome
    } else {
        let error = body.error.unwrap_or_default();
        state
            .registry
            .fail(&operation_id, error)
            .await
            .map_err(ApiError::from_registry)?
    };

    tracing::info!(
        operation_id = %operation_id,
        status = record.status.as_str(),
        updated,
        "completion callback processed"
    );
    Ok(Json(CallbackAck {
        success: true,
        operation_id,
        message: if updated {
            "operation resolved".to_string()
        } else {
            "operation already resolved".to_string()
        },
        updated,
    }))
}

async fn list_operations(State(state): State<AppState>) -> Json<OperationsListResponse> {
    let operations = state.registry.list_ids().await;
    let count = operations.len();
    Json(OperationsListResponse { operations, count })
}

fn status_response(record: &OperationRecord) -> OperationStatusResponse {
    let now = Utc::now();
    let end = record.resolved_at.unwrap_or(now);
    let duration = DurationBreakdown::from_millis((end - record.start_time).num_milliseconds());
    OperationStatusResponse {
        operation_id: record.operation_id.clone(),
        status: record.status,
        start_time: record.start_time,
        duration,
        result: record.result.clone(),
        error: record.error.clone(),
        timestamp: now,
    }
}

#[derive(Debug)]
enum ApiError {
    NotFound,
    Expired,
    InvalidRequest(String),
    Config(String),
    Internal(String),
}

impl ApiError {
    fn from_registry(error: RegistryError) -> Self {
        match error {
            RegistryError::NotFound => Self::NotFound,
            RegistryError::DuplicateId => Self::Internal(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "error": "not_found",
                })),
            )
                .into_response(),
            Self::Expired => (
                StatusCode::GONE,
                Json(serde_json::json!({
                    "error": "expired",
                    "message": "operation record passed its retention window and was evicted",
                })),
            )
                .into_response(),
            Self::InvalidRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "invalid_request",
                    "message": message,
                })),
            )
                .into_response(),
            Self::Config(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "configuration",
                    "message": message,
                })),
            )
                .into_response(),
            Self::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "internal",
                    "message": message,
                })),
            )
                .into_response(),
        }
    }
}
