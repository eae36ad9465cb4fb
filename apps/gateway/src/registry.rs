use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use studioflow_proto::{OperationResult, OperationStatus};

/// In-process registry of asynchronous workflow operations.
///
/// One shared instance per process, held in `AppState` and passed by handle to
/// every endpoint handler. Records are created pending, transition exactly once
/// to a terminal status, and are evicted by the retention sweep once terminal.
/// Two writers (the gateway's background continuation and the completion
/// callback) can race on the terminal write; the first one wins and the second
/// is reported as a no-op.
#[derive(Default)]
pub struct OperationRegistry {
    inner: Mutex<HashMap<String, OperationRecord>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: String,
    pub project_id: String,
    pub status: OperationStatus,
    pub start_time: DateTime<Utc>,
    pub result: Option<OperationResult>,
    pub error: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl OperationRecord {
    fn pending(operation_id: &str, project_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            project_id: project_id.to_string(),
            status: OperationStatus::Pending,
            start_time: now,
            result: None,
            error: None,
            resolved_at: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Exactly one of result/error is set, matching status.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.status {
            OperationStatus::Pending => self.result.is_none() && self.error.is_none(),
            OperationStatus::Completed => self.result.is_some() && self.error.is_none(),
            OperationStatus::Error => self.result.is_none() && self.error.is_some(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("operation not found")]
    NotFound,
    #[error("operation id already registered")]
    DuplicateId,
}

impl OperationRegistry {
    pub async fn insert_pending(
        &self,
        operation_id: &str,
        project_id: &str,
    ) -> Result<OperationRecord, RegistryError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        if inner.contains_key(operation_id) {
            return Err(RegistryError::DuplicateId);
        }
        let record = OperationRecord::pending(operation_id, project_id, now);
        inner.insert(operation_id.to_string(), record.clone());
        Ok(record)
    }

    pub async fn get(&self, operation_id: &str) -> Option<OperationRecord> {
        let inner = self.inner.lock().await;
        inner.get(operation_id).cloned()
    }

    /// Terminal write: pending -> completed. Returns `(record, false)` without
    /// modifying anything when the record is already terminal.
    pub async fn complete(
        &self,
        operation_id: &str,
        result: OperationResult,
    ) -> Result<(OperationRecord, bool), RegistryError> {
        self.resolve(operation_id, Some(result), None).await
    }

    /// Terminal write: pending -> error. Same idempotence contract as
    /// [`complete`](Self::complete).
    pub async fn fail(
        &self,
        operation_id: &str,
        error: String,
    ) -> Result<(OperationRecord, bool), RegistryError> {
        self.resolve(operation_id, None, Some(error)).await
    }

    async fn resolve(
        &self,
        operation_id: &str,
        result: Option<OperationResult>,
        error: Option<String>,
    ) -> Result<(OperationRecord, bool), RegistryError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let record = inner.get_mut(operation_id).ok_or(RegistryError::NotFound)?;
        if record.is_terminal() {
            return Ok((record.clone(), false));
        }
        match (result, error) {
            (Some(result), None) => {
                record.status = OperationStatus::Completed;
                record.result = Some(result);
            }
            (None, Some(error)) => {
                record.status = OperationStatus::Error;
                record.error = Some(error);
            }
            // Internal callers always pass exactly one side.
            _ => return Err(RegistryError::NotFound),
        }
        record.resolved_at = Some(now);
        Ok((record.clone(), true))
    }

    pub async fn remove(&self, operation_id: &str) -> Option<OperationRecord> {
        let mut inner = self.inner.lock().await;
        inner.remove(operation_id)
    }

    pub async fn list_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut ids = inner.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// Evicts terminal records older than the retention window. Pending records
    /// are never evicted by age alone; they may legitimately run right up to
    /// the monitoring ceiling.
    pub async fn sweep_expired(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut inner = self.inner.lock().await;
        let expired = inner
            .iter()
            .filter(|(_, record)| record.is_terminal() && record.start_time < cutoff)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        for id in &expired {
            inner.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!(evicted = expired.len(), "registry retention sweep evicted records");
        }
        expired.len()
    }

    /// True when the record is terminal and past the retention window; the
    /// status endpoint reports these as expired (410) and drops them.
    pub async fn take_if_expired(
        &self,
        operation_id: &str,
        retention: Duration,
    ) -> Option<OperationRecord> {
        let cutoff = Utc::now() - retention;
        let mut inner = self.inner.lock().await;
        let expired = matches!(
            inner.get(operation_id),
            Some(record) if record.is_terminal() && record.start_time < cutoff
        );
        if expired {
            inner.remove(operation_id)
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, operation_id: &str, start_time: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.get_mut(operation_id) {
            record.start_time = start_time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studioflow_proto::ProjectState;

    fn result_with_reply(reply: &str) -> OperationResult {
        OperationResult {
            response_to_user: reply.to_string(),
            updated_state: ProjectState::new("p1"),
        }
    }

    #[tokio::test]
    async fn pending_records_are_consistent() {
        let registry = OperationRegistry::default();
        let record = registry
            .insert_pending("op_1", "p1")
            .await
            .expect("insert should succeed");
        assert_eq!(record.status, OperationStatus::Pending);
        assert!(record.is_consistent());
        assert!(!record.is_terminal());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let registry = OperationRegistry::default();
        registry.insert_pending("op_1", "p1").await.expect("first insert");
        let error = registry
            .insert_pending("op_1", "p2")
            .await
            .expect_err("second insert should fail");
        assert!(matches!(error, RegistryError::DuplicateId));
    }

    #[tokio::test]
    async fn first_terminal_write_wins() {
        let registry = OperationRegistry::default();
        registry.insert_pending("op_2", "p1").await.expect("insert");

        let (record, updated) = registry
            .complete("op_2", result_with_reply("done"))
            .await
            .expect("complete");
        assert!(updated);
        assert_eq!(record.status, OperationStatus::Completed);
        assert!(record.is_consistent());

        // A racing second writer with a different payload is a no-op.
        let (record, updated) = registry
            .complete("op_2", result_with_reply("other payload"))
            .await
            .expect("duplicate complete");
        assert!(!updated);
        assert_eq!(
            record.result.as_ref().map(|r| r.response_to_user.as_str()),
            Some("done")
        );

        let (record, updated) = registry
            .fail("op_2", "late failure".to_string())
            .await
            .expect("late fail");
        assert!(!updated);
        assert_eq!(record.status, OperationStatus::Completed);
    }

    #[tokio::test]
    async fn fail_sets_error_and_is_consistent() {
        let registry = OperationRegistry::default();
        registry.insert_pending("op_3", "p1").await.expect("insert");
        let (record, updated) = registry
            .fail("op_3", "workflow rejected payload".to_string())
            .await
            .expect("fail");
        assert!(updated);
        assert_eq!(record.status, OperationStatus::Error);
        assert!(record.is_consistent());
    }

    #[tokio::test]
    async fn sweep_evicts_only_stale_terminal_records() {
        let registry = OperationRegistry::default();
        registry.insert_pending("op_old_done", "p1").await.expect("insert");
        registry.insert_pending("op_old_pending", "p1").await.expect("insert");
        registry
            .complete("op_old_done", result_with_reply("done"))
            .await
            .expect("complete");

        // Age both records past the window.
        {
            let mut inner = registry.inner.lock().await;
            for record in inner.values_mut() {
                record.start_time = Utc::now() - Duration::hours(2);
            }
        }

        let evicted = registry.sweep_expired(Duration::hours(1)).await;
        assert_eq!(evicted, 1);
        assert!(registry.get("op_old_done").await.is_none());
        // Pending records survive regardless of age.
        assert!(registry.get("op_old_pending").await.is_some());
        assert_eq!(registry.list_ids().await, vec!["op_old_pending".to_string()]);
    }

    #[tokio::test]
    async fn take_if_expired_removes_stale_terminal_records() {
        let registry = OperationRegistry::default();
        registry.insert_pending("op_4", "p1").await.expect("insert");
        registry
            .complete("op_4", result_with_reply("done"))
            .await
            .expect("complete");

        assert!(registry
            .take_if_expired("op_4", Duration::hours(1))
            .await
            .is_none());

        {
            let mut inner = registry.inner.lock().await;
            if let Some(record) = inner.get_mut("op_4") {
                record.start_time = Utc::now() - Duration::hours(2);
            }
        }

        let taken = registry
            .take_if_expired("op_4", Duration::hours(1))
            .await
            .expect("expired record");
        assert_eq!(taken.operation_id, "op_4");
        assert!(registry.get("op_4").await.is_none());
    }
}
