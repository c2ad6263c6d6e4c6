use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a message plays in a provider-facing history, following the
/// conventional chat-completion vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One atomic utterance. Immutable after construction.
///
/// `agent_id` identifies the origin (`agent_a`, `agent_b`, `system`,
/// `researcher`) independent of `role`, which is the perspective-dependent
/// label a provider sees — see [`crate::agent::AgentId`] for the closed set
/// of conversation-participant ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
        }
    }
}
