//! Cooperative interrupt flag and pause/resume event coordination (§4.7).
//!
//! Shaped after the teacher's `CancelToken` (`Arc<AtomicBool>`, idempotent
//! trigger) rather than a real signal handler — installing a process-wide
//! `SIGINT` handler is out of scope for a library crate; the binary that
//! wires this up (`pidgin-cli`) is responsible for calling [`InterruptHandler::request`]
//! from its own signal plumbing. Semantics otherwise port
//! `original_source/pidgin/core/interrupt_handler.py` exactly: a single
//! flag, idempotent on repeat triggers, `should_continue` hard-wired to
//! "exit" (see DESIGN.md's Open Question decision).
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pidgin_types::event::{
    ConversationPausedData, ConversationResumedData, Envelope, Event, InterruptRequestData,
    InterruptSource,
};
use pidgin_types::Result;

use crate::bus::EventBus;

/// What the conductor should do after a pause. Currently always
/// [`ContinueDecision::Exit`] — see the crate's Open Question note;
/// structured so a future interactive prompt can supply a different
/// policy without changing call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueDecision {
    Continue,
    Exit,
}

/// A policy function deciding what happens after a pause. The default
/// ports the original's hard-wired behavior.
pub type ContinuePolicy = fn() -> ContinueDecision;

pub fn default_continue_policy() -> ContinueDecision {
    ContinueDecision::Exit
}

/// Cooperative interrupt flag shared across the tasks driving one
/// conversation.
#[derive(Clone)]
pub struct InterruptHandler {
    requested: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    policy: ContinuePolicy,
}

impl InterruptHandler {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            policy: default_continue_policy,
        }
    }

    pub fn with_policy(policy: ContinuePolicy) -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            policy,
        }
    }

    /// Trigger the interrupt. Idempotent — a second call is a no-op, same
    /// as the original's "subsequent signals ignored" behavior.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn check_interrupt(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Emit `InterruptRequest` for `source`.
    pub async fn handle_interrupt_request(
        &self,
        bus: &EventBus,
        conversation_id: &str,
        turn_number: u32,
        source: InterruptSource,
    ) -> Result<()> {
        bus.emit(Event::InterruptRequest(InterruptRequestData {
            envelope: Envelope::default(),
            conversation_id: conversation_id.to_string(),
            turn_number,
            source,
        }))
        .await
    }

    /// Emit `InterruptRequest` then `ConversationPaused`, and mark the
    /// handler paused.
    pub async fn handle_pause(
        &self,
        bus: &EventBus,
        conversation_id: &str,
        turn_number: u32,
        paused_during: impl Into<String>,
    ) -> Result<()> {
        self.handle_interrupt_request(bus, conversation_id, turn_number, InterruptSource::User)
            .await?;
        self.paused.store(true, Ordering::SeqCst);
        bus.emit(Event::ConversationPaused(ConversationPausedData {
            envelope: Envelope::default(),
            conversation_id: conversation_id.to_string(),
            turn_number,
            paused_during: paused_during.into(),
        }))
        .await
    }

    pub async fn handle_resume(
        &self,
        bus: &EventBus,
        conversation_id: &str,
        turn_number: u32,
    ) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        bus.emit(Event::ConversationResumed(ConversationResumedData {
            envelope: Envelope::default(),
            conversation_id: conversation_id.to_string(),
            turn_number,
        }))
        .await
    }

    /// What to do once paused. Delegates to the configured policy.
    pub fn should_continue(&self) -> ContinueDecision {
        (self.policy)()
    }
}

impl Default for InterruptHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_handler_is_not_interrupted() {
        let handler = InterruptHandler::new();
        assert!(!handler.check_interrupt());
        assert!(!handler.is_paused());
    }

    #[test]
    fn request_sets_the_flag() {
        let handler = InterruptHandler::new();
        handler.request();
        assert!(handler.check_interrupt());
    }

    #[test]
    fn request_is_idempotent() {
        let handler = InterruptHandler::new();
        handler.request();
        handler.request();
        assert!(handler.check_interrupt());
    }

    #[test]
    fn default_policy_is_exit() {
        let handler = InterruptHandler::new();
        assert_eq!(handler.should_continue(), ContinueDecision::Exit);
    }

    #[test]
    fn custom_policy_is_honored() {
        fn always_continue() -> ContinueDecision {
            ContinueDecision::Continue
        }
        let handler = InterruptHandler::with_policy(always_continue);
        assert_eq!(handler.should_continue(), ContinueDecision::Continue);
    }

    #[tokio::test]
    async fn handle_pause_emits_request_then_paused_and_sets_flag() {
        let bus = EventBus::new(10);
        let handler = InterruptHandler::new();
        handler
            .handle_pause(&bus, "conv1", 2, "between_turns")
            .await
            .unwrap();
        assert!(handler.is_paused());
        let history = bus.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].type_name(), "InterruptRequest");
        assert_eq!(history[1].type_name(), "ConversationPaused");
    }

    #[tokio::test]
    async fn handle_resume_clears_paused_flag() {
        let bus = EventBus::new(10);
        let handler = InterruptHandler::new();
        handler.handle_pause(&bus, "conv1", 2, "between_turns").await.unwrap();
        handler.handle_resume(&bus, "conv1", 2).await.unwrap();
        assert!(!handler.is_paused());
        let history = bus.get_history();
        assert_eq!(history[2].type_name(), "ConversationResumed");
    }
}
