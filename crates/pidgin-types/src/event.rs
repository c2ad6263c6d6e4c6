//! The closed set of events that flow through the event bus.
//!
//! Every event carries a common envelope (`event_id`, `timestamp`,
//! `conversation_id`) plus type-specific fields. [`Event`] is the
//! discriminated sum a static language needs in place of the source's
//! duck-typed handler registration (see DESIGN.md).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::{short_hex_id, Turn};
use crate::message::Message;

/// Why a conversation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    MaxTurnsReached,
    HighConvergence,
    Interrupted,
    Error,
}

/// Why the message handler paced a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaceReason {
    RequestRate,
    TokenRate,
    Mixed,
}

/// Source of an interrupt request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptSource {
    User,
    Convergence,
    ContextLimit,
}

/// The action the turn executor takes when convergence crosses the
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceAction {
    Stop,
    Warn,
}

macro_rules! event_kinds {
    ($($variant:ident => $data:ident : $tag:literal),+ $(,)?) => {
        /// Discriminator used for subscriber registration — a handler
        /// subscribes to one concrete `EventKind` or to the wildcard
        /// (see `pidgin_core::bus`).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum EventKind {
            $($variant),+
        }

        /// The closed set of events emitted into the bus.
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "event_type")]
        pub enum Event {
            $(
                #[serde(rename = $tag)]
                $variant($data),
            )+
        }

        impl Event {
            pub fn kind(&self) -> EventKind {
                match self {
                    $(Event::$variant(_) => EventKind::$variant),+
                }
            }

            pub fn conversation_id(&self) -> &str {
                match self {
                    $(Event::$variant(d) => &d.conversation_id),+
                }
            }

            pub fn event_id(&self) -> &str {
                match self {
                    $(Event::$variant(d) => &d.envelope.event_id),+
                }
            }

            pub fn timestamp(&self) -> DateTime<Utc> {
                match self {
                    $(Event::$variant(d) => d.envelope.timestamp),+
                }
            }

            /// The event type name exactly as it appears in the JSONL log
            /// (§6): the discriminator value.
            pub fn type_name(&self) -> &'static str {
                match self {
                    $(Event::$variant(_) => $tag),+
                }
            }
        }
    };
}

event_kinds! {
    ConversationStart => ConversationStartData: "ConversationStart",
    SystemPrompt => SystemPromptData: "SystemPrompt",
    TurnStart => TurnStartData: "TurnStart",
    MessageRequest => MessageRequestData: "MessageRequest",
    MessageChunk => MessageChunkData: "MessageChunk",
    MessageComplete => MessageCompleteData: "MessageComplete",
    TurnComplete => TurnCompleteData: "TurnComplete",
    ConversationEnd => ConversationEndData: "ConversationEnd",
    ApiError => ApiErrorData: "APIError",
    ProviderTimeout => ProviderTimeoutData: "ProviderTimeout",
    RateLimitPace => RateLimitPaceData: "RateLimitPace",
    TokenUsage => TokenUsageData: "TokenUsage",
    ContextTruncation => ContextTruncationData: "ContextTruncation",
    InterruptRequest => InterruptRequestData: "InterruptRequest",
    ConversationPaused => ConversationPausedData: "ConversationPaused",
    ConversationResumed => ConversationResumedData: "ConversationResumed",
}

/// Stamp a fresh `event_id`/`timestamp` for a newly constructed event
/// payload. Every `*Data` struct embeds these via this helper so callers
/// never set them by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            event_id: short_hex_id(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationStartData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub agent_a_model: String,
    pub agent_b_model: String,
    pub agent_a_display_name: String,
    pub agent_b_display_name: String,
    pub initial_prompt: String,
    pub max_turns: u32,
    pub temperature_a: Option<f32>,
    pub temperature_b: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPromptData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub agent_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnStartData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub turn_number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequestData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub agent_id: String,
    pub turn_number: u32,
    pub conversation_history: Vec<Message>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageChunkData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub agent_id: String,
    pub chunk: String,
    pub chunk_index: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCompleteData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub agent_id: String,
    pub message: Message,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnCompleteData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub turn_number: u32,
    pub turn: Turn,
    pub convergence_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEndData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub total_turns: u32,
    pub reason: EndReason,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub agent_id: String,
    pub provider: String,
    pub error_type: String,
    pub error_message: String,
    pub retryable: bool,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTimeoutData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub agent_id: String,
    pub provider: String,
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPaceData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub provider: String,
    pub wait_time: f64,
    pub reason: PaceReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub tokens_per_minute_limit: u64,
    pub current_usage_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTruncationData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub agent_id: String,
    pub provider: String,
    pub model: String,
    pub turn_number: u32,
    pub original_message_count: usize,
    pub truncated_message_count: usize,
    pub messages_dropped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptRequestData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub turn_number: u32,
    pub source: InterruptSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPausedData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub turn_number: u32,
    pub paused_during: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResumedData {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub conversation_id: String,
    pub turn_number: u32,
}
