use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use studioflow_proto::{ChatMessage, OperationResult, ProjectState, SubmitChatRequest};

/// Client for the external automation workflow's chat webhook.
///
/// The call ceiling is long by design: jobs routinely run for minutes and the
/// webhook holds the connection open until the workflow finishes or an
/// intermediary gives up first.
#[derive(Debug, Clone)]
pub struct WorkflowClient {
    webhook_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow_webhook_url_missing")]
    WebhookUrlMissing,
    #[error("workflow_request_timed_out")]
    Timeout,
    #[error("workflow_http_{status}:{body}")]
    UpstreamStatus { status: StatusCode, body: String },
    #[error("workflow_request_failed:{message}")]
    Transport { message: String },
    #[error("workflow_json_decode_failed:{message}")]
    Decode { message: String },
}

impl WorkflowError {
    /// Gateway-level failures are not proof of job failure: the workflow may
    /// still be running behind the intermediary that gave up. These leave the
    /// operation pending instead of failing it.
    #[must_use]
    pub fn is_gateway_level(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::UpstreamStatus { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || status.as_u16() == 524
            }
            _ => false,
        }
    }
}

/// Payload forwarded to the workflow. Carries the operation id so the workflow
/// can hit the completion callback directly.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowDispatch<'a> {
    operation_id: &'a str,
    project_id: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_id: Option<&'a str>,
    previous_messages: &'a [ChatMessage],
}

impl WorkflowClient {
    pub fn new(webhook_url: &str, timeout_ms: u64) -> Result<Self, WorkflowError> {
        let webhook_url = webhook_url.trim().trim_end_matches('/').to_string();
        if webhook_url.is_empty() {
            return Err(WorkflowError::WebhookUrlMissing);
        }
        Ok(Self {
            webhook_url,
            timeout: Duration::from_millis(timeout_ms.max(1_000)),
            http: reqwest::Client::new(),
        })
    }

    /// Forwards one chat message and waits for the workflow's raw reply.
    pub async fn send_chat(
        &self,
        operation_id: &str,
        request: &SubmitChatRequest,
    ) -> Result<serde_json::Value, WorkflowError> {
        let dispatch = WorkflowDispatch {
            operation_id,
            project_id: &request.project_id,
            message: &request.message,
            chat_id: request.chat_id.as_deref(),
            previous_messages: &request.previous_messages,
        };
        let response = self
            .http
            .post(self.webhook_url.as_str())
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout)
            .json(&dispatch)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    WorkflowError::Timeout
                } else {
                    WorkflowError::Transport {
                        message: error.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|error| WorkflowError::Transport {
            message: error.to_string(),
        })?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).trim().to_string();
            return Err(WorkflowError::UpstreamStatus { status, body });
        }

        // Plain-text replies are legal; fold them into a JSON string so the
        // decoder ladder sees one input type.
        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(value) => Ok(value),
            Err(_) => {
                let text = String::from_utf8_lossy(&bytes).to_string();
                if text.trim().is_empty() {
                    Err(WorkflowError::Decode {
                        message: "empty response body".to_string(),
                    })
                } else {
                    Ok(serde_json::Value::String(text))
                }
            }
        }
    }
}

/// Normalizes any observed workflow reply shape into the canonical result.
///
/// Ordered decoders: canonical object, structured array with nested state,
/// plain text, then a fallback that preserves the raw payload instead of
/// discarding it.
#[must_use]
pub fn normalize_workflow_reply(raw: serde_json::Value, project_id: &str) -> OperationResult {
    if let Some(result) = decode_canonical(&raw, project_id) {
        return result;
    }
    if let Some(result) = decode_structured_array(&raw, project_id) {
        return result;
    }
    if let Some(result) = decode_plain_text(&raw, project_id) {
        return result;
    }
    fallback_result(raw, project_id)
}

/// Already-normalized object: `{responseToUser, updatedState}`.
fn decode_canonical(raw: &serde_json::Value, project_id: &str) -> Option<OperationResult> {
    let object = raw.as_object()?;
    let response_to_user = object.get("responseToUser")?.as_str()?.trim();
    if response_to_user.is_empty() {
        return None;
    }
    let updated_state = match object.get("updatedState") {
        Some(state_value) => decode_project_state(state_value, project_id)?,
        None => ProjectState::new(project_id),
    };
    Some(OperationResult {
        response_to_user: response_to_user.to_string(),
        updated_state,
    })
}

/// Structured array reply: `[{output|response|message, state|updatedState}]`.
fn decode_structured_array(raw: &serde_json::Value, project_id: &str) -> Option<OperationResult> {
    let first = raw.as_array()?.first()?.as_object()?;
    let response_to_user = ["output", "response", "responseToUser", "message"]
        .iter()
        .find_map(|key| first.get(*key).and_then(|value| value.as_str()))
        .map(str::trim)
        .filter(|text| !text.is_empty())?;
    let updated_state = ["updatedState", "state", "projectState"]
        .iter()
        .find_map(|key| first.get(*key))
        .and_then(|value| decode_project_state(value, project_id))
        .unwrap_or_else(|| ProjectState::new(project_id));
    Some(OperationResult {
        response_to_user: response_to_user.to_string(),
        updated_state,
    })
}

fn decode_plain_text(raw: &serde_json::Value, project_id: &str) -> Option<OperationResult> {
    let text = raw.as_str()?.trim();
    if text.is_empty() {
        return None;
    }
    Some(OperationResult {
        response_to_user: text.to_string(),
        updated_state: ProjectState::new(project_id),
    })
}

/// Unknown shapes never lose data: the raw payload rides along under
/// `assets.rawResponse`.
fn fallback_result(raw: serde_json::Value, project_id: &str) -> OperationResult {
    let mut updated_state = ProjectState::new(project_id);
    updated_state
        .assets
        .insert("rawResponse".to_string(), raw);
    OperationResult {
        response_to_user:
            "The workflow finished, but its response came back in an unexpected format."
                .to_string(),
        updated_state,
    }
}

fn decode_project_state(value: &serde_json::Value, project_id: &str) -> Option<ProjectState> {
    let mut state: ProjectState = serde_json::from_value(value.clone()).ok()?;
    if state.project_id.trim().is_empty() {
        state.project_id = project_id.to_string();
    }
    Some(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_object_decodes_verbatim() {
        let raw = json!({
            "responseToUser": "Script draft is ready.",
            "updatedState": {
                "projectId": "p1",
                "phase": "scripting",
                "history": [],
                "assets": {"script": "INT. DAY"},
                "checklist": {"script_done": true},
                "budget": {"spent": 2.0, "total": 50.0}
            }
        });
        let result = normalize_workflow_reply(raw, "p1");
        assert_eq!(result.response_to_user, "Script draft is ready.");
        assert_eq!(result.updated_state.phase, "scripting");
        assert_eq!(result.updated_state.checklist.get("script_done"), Some(&true));
    }

    #[test]
    fn structured_array_with_nested_state_decodes() {
        let raw = json!([{
            "output": "Here is your storyboard.",
            "state": {"projectId": "", "phase": "storyboard"}
        }]);
        let result = normalize_workflow_reply(raw, "p1");
        assert_eq!(result.response_to_user, "Here is your storyboard.");
        assert_eq!(result.updated_state.phase, "storyboard");
        // A blank nested project id inherits the submitting project.
        assert_eq!(result.updated_state.project_id, "p1");
    }

    #[test]
    fn plain_text_reply_becomes_the_user_message() {
        let result = normalize_workflow_reply(json!("All done!"), "p1");
        assert_eq!(result.response_to_user, "All done!");
        assert_eq!(result.updated_state.project_id, "p1");
        assert!(result.updated_state.history.is_empty());
    }

    #[test]
    fn unknown_shape_preserves_raw_payload() {
        let raw = json!({"unexpected": {"deeply": ["nested", 42]}});
        let result = normalize_workflow_reply(raw.clone(), "p1");
        assert_eq!(result.updated_state.assets.get("rawResponse"), Some(&raw));
        assert!(!result.response_to_user.is_empty());
    }

    #[test]
    fn canonical_with_undecodable_state_falls_through_to_preservation() {
        // updatedState of the wrong JSON type cannot satisfy the canonical
        // decoder; the payload must still survive in the fallback.
        let raw = json!({"responseToUser": "hi", "updatedState": [1, 2, 3]});
        let result = normalize_workflow_reply(raw.clone(), "p1");
        assert_eq!(result.updated_state.assets.get("rawResponse"), Some(&raw));
    }

    #[test]
    fn gateway_level_errors_are_classified() {
        assert!(WorkflowError::Timeout.is_gateway_level());
        assert!(WorkflowError::UpstreamStatus {
            status: StatusCode::BAD_GATEWAY,
            body: String::new()
        }
        .is_gateway_level());
        assert!(WorkflowError::UpstreamStatus {
            status: StatusCode::from_u16(524).expect("valid status"),
            body: String::new()
        }
        .is_gateway_level());
        // A request timeout means the job may still be running upstream; it
        // must leave the operation pending so a later callback can land.
        assert!(WorkflowError::UpstreamStatus {
            status: StatusCode::REQUEST_TIMEOUT,
            body: String::new()
        }
        .is_gateway_level());
        assert!(!WorkflowError::UpstreamStatus {
            status: StatusCode::BAD_REQUEST,
            body: String::new()
        }
        .is_gateway_level());
        assert!(!WorkflowError::Decode {
            message: String::new()
        }
        .is_gateway_level());
    }

    #[test]
    fn blank_webhook_url_is_rejected() {
        assert!(matches!(
            WorkflowClient::new("   ", 900_000),
            Err(WorkflowError::WebhookUrlMissing)
        ));
    }
}
