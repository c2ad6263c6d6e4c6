//! Drives one A→B exchange: turn-start, both agents' messages, the
//! convergence check, turn-complete (§4.5).
//!
//! `ConversationEnd` itself stays owned by the conversation lifecycle
//! (§3's event-ownership table lists `Lifecycle` as its sole emitter);
//! this executor reports *why* to stop via [`StopReason`] rather than
//! emitting the event itself, keeping the idempotency guard in one
//! place. See DESIGN.md's Open Question notes for this shift.

use std::sync::Arc;
use std::time::Duration;

use pidgin_types::agent::Agent;
use pidgin_types::conversation::{Conversation, Turn};
use pidgin_types::event::{ConvergenceAction, Envelope, Event, TurnCompleteData, TurnStartData};
use pidgin_types::Result;

use crate::bus::EventBus;
use crate::convergence;
use crate::interrupt_handler::InterruptHandler;
use crate::message_handler::{MessageHandler, MessageOutcome};

/// Why the conductor should stop running turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    HighConvergence,
    ProviderError,
}

/// Outcome of one call to [`TurnExecutor::run_single_turn`].
#[derive(Debug)]
pub enum TurnOutcome {
    /// The turn completed under threshold (or action is `warn`); keep
    /// running turns.
    Continue(Turn),
    /// Stop running turns. `turn` is `Some` when a turn completed but
    /// tripped the convergence threshold, `None` when a half-turn
    /// never completed (interrupt, timeout, or provider failure).
    Stop { turn: Option<Turn>, reason: StopReason },
}

pub struct TurnExecutor {
    bus: Arc<EventBus>,
    message_handler: Arc<MessageHandler>,
    threshold: f64,
    action: ConvergenceAction,
}

impl TurnExecutor {
    pub fn new(
        bus: Arc<EventBus>,
        message_handler: Arc<MessageHandler>,
        threshold: f64,
        action: ConvergenceAction,
    ) -> Self {
        Self {
            bus,
            message_handler,
            threshold,
            action,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run_single_turn(
        &self,
        conversation: &mut Conversation,
        turn_number: u32,
        agent_a: &Agent,
        agent_b: &Agent,
        provider_a: &str,
        provider_b: &str,
        interrupt: &InterruptHandler,
        timeout: Duration,
    ) -> Result<TurnOutcome> {
        self.bus
            .emit(Event::TurnStart(TurnStartData {
                envelope: Envelope::default(),
                conversation_id: conversation.id.clone(),
                turn_number,
            }))
            .await?;

        let outcome_a = self
            .message_handler
            .get_agent_message_with_interrupt(
                &conversation.id,
                agent_a,
                provider_a,
                turn_number,
                &conversation.messages,
                Some(interrupt),
                Some(timeout),
            )
            .await?;
        let msg_a = match outcome_a {
            MessageOutcome::Message(m) => m,
            MessageOutcome::Interrupted | MessageOutcome::TimedOut => {
                return Ok(TurnOutcome::Stop {
                    turn: None,
                    reason: StopReason::Interrupted,
                });
            }
            MessageOutcome::Failed(_) => {
                return Ok(TurnOutcome::Stop {
                    turn: None,
                    reason: StopReason::ProviderError,
                });
            }
        };

        // Agent B needs to see A's reply, but neither message is
        // committed to the conversation until the turn completes —
        // a half-turn never leaves this function.
        let mut history_with_a = conversation.messages.clone();
        history_with_a.push(msg_a.clone());

        let outcome_b = self
            .message_handler
            .get_agent_message_with_interrupt(
                &conversation.id,
                agent_b,
                provider_b,
                turn_number,
                &history_with_a,
                Some(interrupt),
                Some(timeout),
            )
            .await?;
        let msg_b = match outcome_b {
            MessageOutcome::Message(m) => m,
            MessageOutcome::Interrupted | MessageOutcome::TimedOut => {
                return Ok(TurnOutcome::Stop {
                    turn: None,
                    reason: StopReason::Interrupted,
                });
            }
            MessageOutcome::Failed(_) => {
                return Ok(TurnOutcome::Stop {
                    turn: None,
                    reason: StopReason::ProviderError,
                });
            }
        };
        conversation.messages.push(msg_a.clone());
        conversation.messages.push(msg_b.clone());

        let turn = Turn {
            agent_a_message: msg_a,
            agent_b_message: msg_b,
        };
        let score = convergence::calculate(&conversation.messages);

        self.bus
            .emit(Event::TurnComplete(TurnCompleteData {
                envelope: Envelope::default(),
                conversation_id: conversation.id.clone(),
                turn_number,
                turn: turn.clone(),
                convergence_score: score,
            }))
            .await?;

        if score >= self.threshold && self.action == ConvergenceAction::Stop {
            return Ok(TurnOutcome::Stop {
                turn: Some(turn),
                reason: StopReason::HighConvergence,
            });
        }

        Ok(TurnOutcome::Continue(turn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pidgin_types::agent::AgentId;
    use pidgin_types::message::{Message, Role};
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::rate_limiter::RateLimiter;

    fn conversation() -> Conversation {
        Conversation::new("conv1", Agent::new(AgentId::AgentA, "a"), Agent::new(AgentId::AgentB, "b"), "hi")
    }

    fn auto_respond(bus: Arc<EventBus>, agent_id: AgentId, reply: &'static str) {
        let subscribe_bus = bus.clone();
        subscribe_bus.subscribe(
            pidgin_types::event::EventKind::MessageRequest,
            Arc::new(move |event: &Event| {
                let Event::MessageRequest(data) = event else {
                    return Box::pin(async {});
                };
                if data.agent_id != agent_id.as_str() {
                    return Box::pin(async {});
                }
                let bus = bus.clone();
                let conversation_id = data.conversation_id.clone();
                let agent_id_str = data.agent_id.clone();
                Box::pin(async move {
                    let message = Message::new(Role::Assistant, reply, agent_id_str.clone());
                    let _ = bus
                        .emit(Event::MessageComplete(pidgin_types::event::MessageCompleteData {
                            envelope: Envelope::default(),
                            conversation_id,
                            agent_id: agent_id_str,
                            message,
                            prompt_tokens: 1,
                            completion_tokens: 1,
                            total_tokens: 2,
                            duration_ms: 1,
                        }))
                        .await;
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            }),
        );
    }

    #[tokio::test]
    async fn completed_turn_under_threshold_continues() {
        let bus = Arc::new(EventBus::new(100));
        let handler = Arc::new(MessageHandler::new(
            bus.clone(),
            Arc::new(RateLimiter::new(HashMap::new())),
            Duration::from_secs(5),
        ));
        auto_respond(bus.clone(), AgentId::AgentA, "totally different words");
        auto_respond(bus.clone(), AgentId::AgentB, "nothing alike here");

        let executor = TurnExecutor::new(bus.clone(), handler, 0.99, ConvergenceAction::Stop);
        let mut conversation = conversation();
        let interrupt = InterruptHandler::new();
        let agent_a = conversation.agents[0].clone();
        let agent_b = conversation.agents[1].clone();

        let outcome = executor
            .run_single_turn(
                &mut conversation,
                0,
                &agent_a,
                &agent_b,
                "local",
                "local",
                &interrupt,
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::Continue(_)));
        assert_eq!(conversation.messages.len(), 2);
    }

    #[tokio::test]
    async fn high_convergence_stops_after_completing_the_turn() {
        let bus = Arc::new(EventBus::new(100));
        let handler = Arc::new(MessageHandler::new(
            bus.clone(),
            Arc::new(RateLimiter::new(HashMap::new())),
            Duration::from_secs(5),
        ));
        auto_respond(bus.clone(), AgentId::AgentA, "same");
        auto_respond(bus.clone(), AgentId::AgentB, "same");

        let executor = TurnExecutor::new(bus.clone(), handler, 0.5, ConvergenceAction::Stop);
        let mut conversation = conversation();
        let interrupt = InterruptHandler::new();
        let agent_a = conversation.agents[0].clone();
        let agent_b = conversation.agents[1].clone();

        let outcome = executor
            .run_single_turn(
                &mut conversation,
                0,
                &agent_a,
                &agent_b,
                "local",
                "local",
                &interrupt,
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        match outcome {
            TurnOutcome::Stop { turn: Some(_), reason: StopReason::HighConvergence } => {}
            other => panic!("expected high-convergence stop, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_on_first_agent_stops_with_no_turn() {
        let bus = Arc::new(EventBus::new(100));
        let handler = Arc::new(MessageHandler::new(
            bus.clone(),
            Arc::new(RateLimiter::new(HashMap::new())),
            Duration::from_millis(30),
        ));
        // No subscriber answers agent_a at all.
        let executor = TurnExecutor::new(bus.clone(), handler, 0.99, ConvergenceAction::Stop);
        let mut conversation = conversation();
        let interrupt = InterruptHandler::new();
        let agent_a = conversation.agents[0].clone();
        let agent_b = conversation.agents[1].clone();

        let outcome = executor
            .run_single_turn(
                &mut conversation,
                0,
                &agent_a,
                &agent_b,
                "local",
                "local",
                &interrupt,
                Duration::from_millis(30),
            )
            .await
            .unwrap();

        match outcome {
            TurnOutcome::Stop { turn: None, reason: StopReason::Interrupted } => {}
            other => panic!("expected interrupted stop with no turn, got {other:?}"),
        }
        assert!(conversation.messages.is_empty());
    }

    #[tokio::test]
    async fn timeout_on_second_agent_leaves_no_dangling_first_message() {
        let bus = Arc::new(EventBus::new(100));
        let handler = Arc::new(MessageHandler::new(
            bus.clone(),
            Arc::new(RateLimiter::new(HashMap::new())),
            Duration::from_millis(30),
        ));
        auto_respond(bus.clone(), AgentId::AgentA, "hello");
        // No subscriber answers agent_b.
        let executor = TurnExecutor::new(bus.clone(), handler, 0.99, ConvergenceAction::Stop);
        let mut conversation = conversation();
        let interrupt = InterruptHandler::new();
        let agent_a = conversation.agents[0].clone();
        let agent_b = conversation.agents[1].clone();

        let outcome = executor
            .run_single_turn(
                &mut conversation,
                0,
                &agent_a,
                &agent_b,
                "local",
                "local",
                &interrupt,
                Duration::from_millis(30),
            )
            .await
            .unwrap();

        match outcome {
            TurnOutcome::Stop { turn: None, reason: StopReason::Interrupted } => {}
            other => panic!("expected interrupted stop with no turn, got {other:?}"),
        }
        assert!(conversation.messages.is_empty(), "agent A's message must not survive agent B's failure");
    }
}
