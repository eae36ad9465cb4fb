use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::project::{ChatMessage, ProjectState};

/// Lifecycle of one asynchronous workflow job.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Completed,
    Error,
}

impl OperationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Canonical result of a completed operation: a user-facing reply plus the full
/// project-state snapshot the workflow produced.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub response_to_user: String,
    pub updated_state: ProjectState,
}

/// Inbound chat submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitChatRequest {
    pub project_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub previous_messages: Vec<ChatMessage>,
}

/// 202 body for an accepted-async submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAcceptedResponse {
    pub operation_id: String,
    pub status: String,
    pub message: String,
    pub estimated_time: String,
}

/// Elapsed-time breakdown reported by the status endpoint.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DurationBreakdown {
    pub milliseconds: i64,
    pub seconds: i64,
    pub minutes: i64,
}

impl DurationBreakdown {
    #[must_use]
    pub fn from_millis(milliseconds: i64) -> Self {
        let milliseconds = milliseconds.max(0);
        Self {
            milliseconds,
            seconds: milliseconds / 1_000,
            minutes: milliseconds / 60_000,
        }
    }
}

/// 200 body for a status query.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatusResponse {
    pub operation_id: String,
    pub status: OperationStatus,
    pub start_time: DateTime<Utc>,
    pub duration: DurationBreakdown,
    pub result: Option<OperationResult>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Inbound completion callback from the workflow engine.
///
/// `result` is kept loose here: the workflow replies in several shapes and the
/// gateway runs the same decoder ladder over callbacks as over direct replies.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionCallbackRequest {
    #[serde(default)]
    pub operation_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 200 body for an acknowledged callback.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAck {
    pub success: bool,
    pub operation_id: String,
    pub message: String,
    pub updated: bool,
}

/// Mints a fresh operation id. Ids are opaque tokens with a stable `op_` prefix.
#[must_use]
pub fn new_operation_id() -> String {
    format!("op_{}", Uuid::new_v4().simple())
}

/// Cheap well-formedness check used before registry lookups.
#[must_use]
pub fn looks_like_operation_id(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.len() > 3 && trimmed.starts_with("op_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_ids_carry_the_op_prefix() {
        let id = new_operation_id();
        assert!(id.starts_with("op_"));
        assert!(looks_like_operation_id(&id));
    }

    #[test]
    fn malformed_operation_ids_are_rejected() {
        assert!(!looks_like_operation_id(""));
        assert!(!looks_like_operation_id("op_"));
        assert!(!looks_like_operation_id("run_abc"));
        assert!(looks_like_operation_id("  op_abc  "));
    }

    #[test]
    fn duration_breakdown_floors_units() {
        let duration = DurationBreakdown::from_millis(125_500);
        assert_eq!(duration.milliseconds, 125_500);
        assert_eq!(duration.seconds, 125);
        assert_eq!(duration.minutes, 2);

        let clamped = DurationBreakdown::from_millis(-10);
        assert_eq!(clamped.milliseconds, 0);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(OperationStatus::Pending).expect("encode"),
            serde_json::json!("pending")
        );
        assert_eq!(OperationStatus::Completed.as_str(), "completed");
        assert!(OperationStatus::Error.is_terminal());
        assert!(!OperationStatus::Pending.is_terminal());
    }
}
