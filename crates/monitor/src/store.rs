use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use studioflow_proto::{ChatMessage, OperationResult, ProjectState};

use crate::reconcile::merge_project_state;

/// Session-local holder of the current project snapshot.
///
/// Owned by a single UI session; remote snapshots only enter through the merge
/// policy so a just-sent user message is never lost to a stale fetch.
pub struct ProjectStore {
    inner: Mutex<ProjectState>,
}

impl ProjectStore {
    #[must_use]
    pub fn new(initial: ProjectState) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    pub async fn snapshot(&self) -> ProjectState {
        self.inner.lock().await.clone()
    }

    /// Appends a locally-authored user message and returns it.
    pub async fn append_user_message(&self, content: impl Into<String>) -> ChatMessage {
        let message = ChatMessage::user(
            format!("msg_{}", Uuid::new_v4().simple()),
            content,
            Utc::now(),
        );
        let mut inner = self.inner.lock().await;
        inner.history.push(message.clone());
        message
    }

    /// Merges a remote snapshot through the reconciliation policy and returns
    /// the new local state.
    pub async fn apply_remote(&self, remote: &ProjectState) -> ProjectState {
        let mut inner = self.inner.lock().await;
        let merged = merge_project_state(&inner, remote, Utc::now());
        *inner = merged.clone();
        merged
    }

    /// Applies a resolved operation: the assistant's reply lands in history and
    /// the carried state merges in.
    pub async fn apply_result(&self, result: &OperationResult) -> ProjectState {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut merged = merge_project_state(&inner, &result.updated_state, now);
        let reply = result.response_to_user.trim();
        let already_present = merged
            .history
            .last()
            .is_some_and(|message| message.content == reply);
        if !reply.is_empty() && !already_present {
            merged.history.push(ChatMessage::assistant(
                format!("msg_{}", Uuid::new_v4().simple()),
                reply,
                now,
            ));
        }
        *inner = merged.clone();
        merged
    }
}
