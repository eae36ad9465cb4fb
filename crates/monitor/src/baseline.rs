use chrono::{DateTime, Utc};

use studioflow_proto::{assets_fingerprint, ProjectState};

/// Pre-operation snapshot used for change-based completion detection.
///
/// Captured immediately before an operation starts and read-only afterward.
/// Detection compares content, timestamp, and the assets fingerprint; history
/// length is recorded for telemetry but is never a completion signal on its
/// own, because messages can be replaced without changing count.
#[derive(Clone, Debug)]
pub struct OperationBaseline {
    pub latest_content: Option<String>,
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub assets_hash: String,
    pub history_len: usize,
}

impl OperationBaseline {
    #[must_use]
    pub fn capture(state: &ProjectState) -> Self {
        let latest = state.latest_message();
        Self {
            latest_content: latest.map(|message| message.content.clone()),
            latest_timestamp: latest.map(|message| message.timestamp),
            assets_hash: assets_fingerprint(&state.assets),
            history_len: state.history.len(),
        }
    }

    /// True when the fetched state differs from the baseline in latest-message
    /// content, latest-message timestamp, or assets fingerprint.
    #[must_use]
    pub fn detects_change(&self, state: &ProjectState) -> bool {
        let latest = state.latest_message();
        let content = latest.map(|message| message.content.as_str());
        if content != self.latest_content.as_deref() {
            return true;
        }
        let timestamp = latest.map(|message| message.timestamp);
        if timestamp != self.latest_timestamp {
            return true;
        }
        assets_fingerprint(&state.assets) != self.assets_hash
    }
}
