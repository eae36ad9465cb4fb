use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Author of a chat history entry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry in a project's chat history.
///
/// `id` is the message identity used by the reconciliation merge; two messages
/// with the same id are the same message regardless of which source carried them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatMessage {
    #[must_use]
    pub fn user(id: impl Into<String>, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
            timestamp,
            media: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn assistant(
        id: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: content.into(),
            timestamp,
            media: Vec::new(),
            error: None,
        }
    }
}

/// Spend tracking pair carried alongside the project.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Budget {
    pub spent: f64,
    pub total: f64,
}

/// The authoritative application snapshot for one project.
///
/// `assets` is an open-ended mapping of named creative artifacts (scripts,
/// images, videos, audio, reference metadata); its schema is not enumerable here
/// and values stay as raw JSON. `history` is append-only under normal operation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub assets: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub checklist: BTreeMap<String, bool>,
    #[serde(default)]
    pub budget: Budget,
}

impl ProjectState {
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Latest history entry, if any.
    #[must_use]
    pub fn latest_message(&self) -> Option<&ChatMessage> {
        self.history.last()
    }

    /// Newest-first scan for the latest assistant message with non-empty content.
    #[must_use]
    pub fn latest_assistant_message(&self) -> Option<&ChatMessage> {
        self.history
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant && !message.content.trim().is_empty())
    }
}

/// Hash of an assets mapping, used for change-based completion detection.
///
/// The mapping is serialized with sorted keys (`BTreeMap` ordering) so the
/// fingerprint is stable across sources that reorder object members.
#[must_use]
pub fn assets_fingerprint(assets: &BTreeMap<String, serde_json::Value>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in assets {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json_bytes(value));
        hasher.update([0u8]);
    }
    hex_digest(hasher)
}

fn canonical_json_bytes(value: &serde_json::Value) -> Vec<u8> {
    match value {
        serde_json::Value::Object(map) => {
            let sorted = map
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<BTreeMap<_, _>>();
            let mut out = Vec::new();
            out.push(b'{');
            for (index, (key, value)) in sorted.iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(serde_json::to_vec(key).unwrap_or_default().as_slice());
                out.push(b':');
                out.extend_from_slice(canonical_json_bytes(value).as_slice());
            }
            out.push(b'}');
            out
        }
        serde_json::Value::Array(items) => {
            let mut out = Vec::new();
            out.push(b'[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(canonical_json_bytes(item).as_slice());
            }
            out.push(b']');
            out
        }
        other => serde_json::to_vec(other).unwrap_or_default(),
    }
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
