use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of conversation participants. Pidgin runs strictly two-party
/// dialogues — see the crate-level Non-goals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    AgentA,
    AgentB,
}

impl AgentId {
    /// The other participant.
    pub fn other(self) -> Self {
        match self {
            Self::AgentA => Self::AgentB,
            Self::AgentB => Self::AgentA,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentA => "agent_a",
            Self::AgentB => "agent_b",
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant's configuration.
///
/// `display_name` is mutable only during setup (assignment or
/// self-choosing via the [`crate::config::Config::models`] registry
/// lookups); callers must treat it as frozen once the first turn starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub model: String,
    pub display_name: String,
    pub temperature: Option<f32>,
}

impl Agent {
    pub fn new(id: AgentId, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            id,
            display_name: model.clone(),
            model,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}
