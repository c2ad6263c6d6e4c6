use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::Agent;
use crate::message::{Message, Role};

/// Generate a short unique hex id, the same shape used for conversation and
/// event ids throughout the log (8 hex characters).
pub fn short_hex_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// A pair of messages completing one full A→B exchange. Never partial at
/// rest — a half-turn never leaves the turn executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub agent_a_message: Message,
    pub agent_b_message: Message,
}

/// Container for an entire exchange between exactly two agents.
///
/// Messages are append-only. After setup, the ordering invariant is:
/// `(user-initial, agent_a, agent_b, agent_a, agent_b, …)` with an optional
/// leading system message per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub agents: [Agent; 2],
    pub messages: Vec<Message>,
    pub started_at: DateTime<Utc>,
    pub initial_prompt: String,
}

impl Conversation {
    pub fn new(id: impl Into<String>, agent_a: Agent, agent_b: Agent, initial_prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agents: [agent_a, agent_b],
            messages: Vec::new(),
            started_at: Utc::now(),
            initial_prompt: initial_prompt.into(),
        }
    }

    pub fn agent_a(&self) -> &Agent {
        &self.agents[0]
    }

    pub fn agent_b(&self) -> &Agent {
        &self.agents[1]
    }

    /// Number of complete turns so far. Only counts assistant-role
    /// replies, so the leading system-prompt messages setup tags with
    /// `agent_a`/`agent_b` (role `System`, not `Assistant`) never get
    /// mistaken for turn messages.
    pub fn turn_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant && (m.agent_id == "agent_a" || m.agent_id == "agent_b"))
            .count()
            / 2
    }
}
