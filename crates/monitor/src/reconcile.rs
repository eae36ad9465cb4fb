use chrono::{DateTime, TimeDelta, Utc};

use studioflow_proto::{ChatMessage, ProjectState, Role};

/// How long a just-sent local user message stays protected from remote merges.
pub const RECENT_USER_MESSAGE_WINDOW_SECONDS: i64 = 30;

/// Merges a remote snapshot into the local one without losing in-flight edits.
///
/// The longer history wins as the base; any local user message younger than the
/// protection window that the base lacks is re-appended, then the combined list
/// is sorted by timestamp. Remote is authoritative for everything else when it
/// carries a value.
#[must_use]
pub fn merge_project_state(
    local: &ProjectState,
    remote: &ProjectState,
    now: DateTime<Utc>,
) -> ProjectState {
    ProjectState {
        project_id: if remote.project_id.trim().is_empty() {
            local.project_id.clone()
        } else {
            remote.project_id.clone()
        },
        history: merge_histories(&local.history, &remote.history, now),
        assets: if remote.assets.is_empty() {
            local.assets.clone()
        } else {
            remote.assets.clone()
        },
        phase: if remote.phase.trim().is_empty() {
            local.phase.clone()
        } else {
            remote.phase.clone()
        },
        checklist: if remote.checklist.is_empty() {
            local.checklist.clone()
        } else {
            remote.checklist.clone()
        },
        budget: if remote.budget == studioflow_proto::Budget::default() {
            local.budget
        } else {
            remote.budget
        },
    }
}

#[must_use]
pub fn merge_histories(
    local: &[ChatMessage],
    remote: &[ChatMessage],
    now: DateTime<Utc>,
) -> Vec<ChatMessage> {
    let base = if remote.len() > local.len() { remote } else { local };
    let mut merged = base.to_vec();
    let protection = TimeDelta::seconds(RECENT_USER_MESSAGE_WINDOW_SECONDS);
    for message in local {
        let is_recent_user = message.role == Role::User && now - message.timestamp < protection;
        if is_recent_user && !merged.iter().any(|existing| existing.id == message.id) {
            merged.push(message.clone());
        }
    }
    merged.sort_by_key(|message| message.timestamp);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn user_at(id: &str, content: &str, at: DateTime<Utc>) -> ChatMessage {
        ChatMessage::user(id, content, at)
    }

    fn assistant_at(id: &str, content: &str, at: DateTime<Utc>) -> ChatMessage {
        ChatMessage::assistant(id, content, at)
    }

    #[test]
    fn shorter_remote_with_no_recent_local_message_is_a_no_op() {
        let now = Utc::now();
        let old = now - ChronoDuration::minutes(10);
        let local = vec![
            user_at("m1", "hello", old),
            assistant_at("m2", "hi there", old),
        ];
        let remote = vec![user_at("m1", "hello", old)];

        let merged = merge_histories(&local, &remote, now);
        assert_eq!(merged, local);
    }

    #[test]
    fn recent_local_user_message_survives_any_remote_content() {
        let now = Utc::now();
        let old = now - ChronoDuration::minutes(10);
        let fresh = now - ChronoDuration::seconds(5);
        let local = vec![
            user_at("m1", "hello", old),
            user_at("m3", "one more thing", fresh),
        ];
        let remote = vec![
            user_at("m1", "hello", old),
            assistant_at("m2", "reply", old + ChronoDuration::seconds(10)),
            assistant_at("m4", "another reply", old + ChronoDuration::seconds(20)),
        ];

        let merged = merge_histories(&local, &remote, now);
        assert!(merged.iter().any(|message| message.id == "m3"));
        // Remote was longer so it is the base; everything it carried stays.
        assert!(merged.iter().any(|message| message.id == "m4"));
    }

    #[test]
    fn stale_local_user_message_is_not_resurrected() {
        let now = Utc::now();
        let old = now - ChronoDuration::minutes(10);
        let local = vec![user_at("m1", "hello", old)];
        let remote = vec![
            assistant_at("m2", "fresh reply", now),
            assistant_at("m3", "and media", now),
        ];

        let merged = merge_histories(&local, &remote, now);
        assert!(!merged.iter().any(|message| message.id == "m1"));
    }

    #[test]
    fn merged_history_is_sorted_by_timestamp() {
        let now = Utc::now();
        let fresh = now - ChronoDuration::seconds(3);
        let local = vec![user_at("m3", "latest question", fresh)];
        let remote = vec![
            user_at("m1", "first", now - ChronoDuration::minutes(5)),
            assistant_at("m2", "second", now - ChronoDuration::minutes(4)),
        ];

        let merged = merge_histories(&local, &remote, now);
        let ids = merged.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn duplicate_identity_is_not_appended_twice() {
        let now = Utc::now();
        let fresh = now - ChronoDuration::seconds(2);
        let local = vec![user_at("m9", "already synced", fresh)];
        let remote = vec![
            user_at("m9", "already synced", fresh),
            assistant_at("m10", "on it", now),
        ];

        let merged = merge_histories(&local, &remote, now);
        assert_eq!(
            merged.iter().filter(|message| message.id == "m9").count(),
            1
        );
    }

    #[test]
    fn scalar_fields_follow_the_remote_snapshot_when_present() {
        let now = Utc::now();
        let mut local = ProjectState::new("p1");
        local.phase = "scripting".to_string();
        local.budget = studioflow_proto::Budget {
            spent: 1.0,
            total: 10.0,
        };
        let mut remote = ProjectState::new("p1");
        remote.phase = "rendering".to_string();
        remote
            .assets
            .insert("video".to_string(), json!({"url": "https://..."}));
        remote.checklist.insert("script_done".to_string(), true);
        remote.budget = studioflow_proto::Budget {
            spent: 4.5,
            total: 10.0,
        };

        let merged = merge_project_state(&local, &remote, now);
        assert_eq!(merged.phase, "rendering");
        assert!(merged.assets.contains_key("video"));
        assert_eq!(merged.checklist.get("script_done"), Some(&true));
        assert!((merged.budget.spent - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_remote_fields_fall_back_to_local_values() {
        let now = Utc::now();
        let mut local = ProjectState::new("p1");
        local.phase = "scripting".to_string();
        local
            .assets
            .insert("script".to_string(), json!("draft one"));
        let remote = ProjectState::new("");

        let merged = merge_project_state(&local, &remote, now);
        assert_eq!(merged.project_id, "p1");
        assert_eq!(merged.phase, "scripting");
        assert!(merged.assets.contains_key("script"));
    }
}
