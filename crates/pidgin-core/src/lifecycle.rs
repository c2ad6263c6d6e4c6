//! Conversation setup and teardown (§4.10).
//!
//! The single authoritative lifecycle — the source's near-duplicate
//! `conversation_setup` module is dead/legacy by its own account (§9's
//! Open Question) and has no counterpart here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use pidgin_types::agent::Agent;
use pidgin_types::config::Config;
use pidgin_types::conversation::{short_hex_id, Conversation};
use pidgin_types::event::{
    ConversationEndData, ConversationStartData, EndReason, Envelope, Event, SystemPromptData,
};
use pidgin_types::message::{Message, Role};
use pidgin_types::Result;

use crate::bus::EventBus;

/// Owns the one-time setup/teardown sequence for a single conversation:
/// seeding messages, emitting the start events, and emitting exactly one
/// `ConversationEnd` no matter how many times teardown is requested.
pub struct ConversationLifecycle {
    bus: Arc<EventBus>,
    ended: AtomicBool,
    started_at: Instant,
}

impl ConversationLifecycle {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            ended: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Construct the `Conversation` value with a fresh id.
    pub fn create_conversation(
        &self,
        agent_a: Agent,
        agent_b: Agent,
        initial_prompt: impl Into<String>,
    ) -> Conversation {
        Conversation::new(short_hex_id(), agent_a, agent_b, initial_prompt)
    }

    /// Append per-agent system prompts (skipping empty ones, "chaos
    /// mode") and the initial prompt, tagged with `config.human_tag`, as
    /// a `researcher`-origin user message.
    pub fn add_initial_messages(
        &self,
        conversation: &mut Conversation,
        config: &Config,
        system_prompt_a: &str,
        system_prompt_b: &str,
    ) {
        if !system_prompt_a.is_empty() {
            conversation
                .messages
                .push(Message::new(Role::System, system_prompt_a, "agent_a"));
        }
        if !system_prompt_b.is_empty() {
            conversation
                .messages
                .push(Message::new(Role::System, system_prompt_b, "agent_b"));
        }
        let tagged = format!("{}{}", config.human_tag, conversation.initial_prompt);
        conversation
            .messages
            .push(Message::new(Role::User, tagged, "researcher"));
    }

    /// Emit `ConversationStart` then one `SystemPrompt` per non-empty
    /// system prompt already present in `conversation.messages`.
    pub async fn emit_start_events(&self, conversation: &Conversation, max_turns: u32) -> Result<()> {
        self.bus
            .emit(Event::ConversationStart(ConversationStartData {
                envelope: Envelope::default(),
                conversation_id: conversation.id.clone(),
                agent_a_model: conversation.agent_a().model.clone(),
                agent_b_model: conversation.agent_b().model.clone(),
                agent_a_display_name: conversation.agent_a().display_name.clone(),
                agent_b_display_name: conversation.agent_b().display_name.clone(),
                initial_prompt: conversation.initial_prompt.clone(),
                max_turns,
                temperature_a: conversation.agent_a().temperature,
                temperature_b: conversation.agent_b().temperature,
            }))
            .await?;

        for message in &conversation.messages {
            if message.role == Role::System {
                self.bus
                    .emit(Event::SystemPrompt(SystemPromptData {
                        envelope: Envelope::default(),
                        conversation_id: conversation.id.clone(),
                        agent_id: message.agent_id.clone(),
                        prompt: message.content.clone(),
                    }))
                    .await?;
            }
        }
        Ok(())
    }

    /// Emit exactly one `ConversationEnd`. A second call (from any stop
    /// path racing another) is a no-op — the guard enforces §8's
    /// "`ConversationEnd` at most once" invariant.
    pub async fn emit_end_event_with_reason(
        &self,
        conversation: &Conversation,
        reason: EndReason,
    ) -> Result<()> {
        if self.ended.swap(true, Ordering::SeqCst) {
            tracing::debug!(conversation_id = %conversation.id, "ConversationEnd already emitted, ignoring");
            return Ok(());
        }
        self.bus
            .emit(Event::ConversationEnd(ConversationEndData {
                envelope: Envelope::default(),
                conversation_id: conversation.id.clone(),
                total_turns: conversation.turn_count() as u32,
                reason,
                duration_ms: self.started_at.elapsed().as_millis() as u64,
            }))
            .await?;
        self.bus.close_conversation_log_for(&conversation.id);
        Ok(())
    }
}
