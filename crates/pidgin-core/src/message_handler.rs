//! Per-turn message acquisition: rate limiting, the pending-future table,
//! and the future/interrupt/timeout race (§4.4, §4.6).
//!
//! Ported in spirit from `original_source/pidgin/core/message_handler.py`.
//! The pending-future table is a one-shot channel per `(conversation_id,
//! agent)` pair (§9's "pending-future table → one-shot channels" note)
//! rather than the original's `asyncio.Future`; the provider wrapper
//! resolves it by sending on the channel it's handed at registration
//! time. Keying on the conversation id too (not just the agent) is what
//! lets multiple conversations share one bus and one set of provider
//! wrappers without their in-flight requests colliding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pidgin_types::agent::{Agent, AgentId};
use pidgin_types::event::{
    Envelope, Event, EventKind, MessageRequestData, PaceReason as EventPaceReason,
    ProviderTimeoutData, RateLimitPaceData,
};
use pidgin_types::message::Message;
use pidgin_types::stream::Usage;
use pidgin_types::Result;

use crate::bus::EventBus;
use crate::interrupt_handler::InterruptHandler;
use crate::rate_limiter::{PaceReason, RateLimiter};

/// Parse the string form an event carries back into the closed `AgentId` set.
fn parse_agent_id(s: &str) -> Option<AgentId> {
    match s {
        "agent_a" => Some(AgentId::AgentA),
        "agent_b" => Some(AgentId::AgentB),
        _ => None,
    }
}

/// What the provider wrapper sends back on the pending channel: the
/// assembled message and its usage, or an error summary for `APIError`
/// cases.
pub type ProviderOutcome = std::result::Result<(Message, Usage), String>;

/// The pending-future table: at most one outstanding channel per
/// `(conversation_id, agent)` pair.
pub type PendingTable = Arc<Mutex<HashMap<(String, AgentId), tokio::sync::oneshot::Sender<ProviderOutcome>>>>;

/// Result of waiting for one agent's turn.
#[derive(Debug)]
pub enum MessageOutcome {
    Message(Message),
    Interrupted,
    TimedOut,
    Failed(String),
}

/// How long to keep waiting on the pending future after an interrupt
/// fires, before giving up (§4.4 step 5's "keep awaiting briefly").
const POST_INTERRUPT_GRACE: Duration = Duration::from_secs(2);
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const PACE_EMIT_THRESHOLD: Duration = Duration::from_millis(100);

pub struct MessageHandler {
    bus: Arc<EventBus>,
    rate_limiter: Arc<RateLimiter>,
    pending: PendingTable,
    default_timeout: Duration,
}

impl MessageHandler {
    /// Build a handler and wire the completion-correlation subscribers
    /// (§4.6): `MessageComplete` resolves a waiting agent's pending
    /// channel with success, `APIError` resolves it with failure. This is
    /// the only path that unblocks `get_agent_message`.
    pub fn new(bus: Arc<EventBus>, rate_limiter: Arc<RateLimiter>, default_timeout: Duration) -> Self {
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));

        let complete_pending = pending.clone();
        bus.subscribe(
            EventKind::MessageComplete,
            Arc::new(move |event: &Event| {
                let pending = complete_pending.clone();
                let Event::MessageComplete(data) = event else {
                    return Box::pin(async {});
                };
                let Some(agent_id) = parse_agent_id(&data.agent_id) else {
                    return Box::pin(async {});
                };
                let key = (data.conversation_id.clone(), agent_id);
                let message = data.message.clone();
                let usage = Usage {
                    prompt_tokens: data.prompt_tokens,
                    completion_tokens: data.completion_tokens,
                    total_tokens: data.total_tokens,
                };
                Box::pin(async move {
                    if let Some(tx) = pending.lock().remove(&key) {
                        let _ = tx.send(Ok((message, usage)));
                    }
                })
            }),
        );

        let error_pending = pending.clone();
        bus.subscribe(
            EventKind::ApiError,
            Arc::new(move |event: &Event| {
                let pending = error_pending.clone();
                let Event::ApiError(data) = event else {
                    return Box::pin(async {});
                };
                let Some(agent_id) = parse_agent_id(&data.agent_id) else {
                    return Box::pin(async {});
                };
                let key = (data.conversation_id.clone(), agent_id);
                let error_message = data.error_message.clone();
                Box::pin(async move {
                    if let Some(tx) = pending.lock().remove(&key) {
                        let _ = tx.send(Err(error_message));
                    }
                })
            }),
        );

        Self {
            bus,
            rate_limiter,
            pending,
            default_timeout,
        }
    }

    /// Clone of the pending table, handed to provider wrappers so they
    /// can resolve a waiting agent's channel.
    pub fn pending_table(&self) -> PendingTable {
        self.pending.clone()
    }

    /// `chars/4 * 1.1 + overhead`, where overhead is 200 for Claude
    /// models and 100 otherwise — the handler's own payload estimate,
    /// distinct from the rate limiter's admission-sizing estimate
    /// (§4.2's note on the two being allowed to diverge).
    fn estimate_payload_tokens(history: &[Message], model: &str) -> u64 {
        let chars: usize = history.iter().map(|m| m.content.len()).sum();
        let overhead = if model.to_lowercase().contains("claude") {
            200.0
        } else {
            100.0
        };
        ((chars as f64 / 4.0) * 1.1 + overhead).ceil() as u64
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn get_agent_message(
        &self,
        conversation_id: &str,
        agent: &Agent,
        provider_name: &str,
        turn_number: u32,
        history: &[Message],
    ) -> Result<MessageOutcome> {
        self.get_agent_message_with_interrupt(
            conversation_id,
            agent,
            provider_name,
            turn_number,
            history,
            None,
            None,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn get_agent_message_with_interrupt(
        &self,
        conversation_id: &str,
        agent: &Agent,
        provider_name: &str,
        turn_number: u32,
        history: &[Message],
        interrupt: Option<&InterruptHandler>,
        timeout: Option<Duration>,
    ) -> Result<MessageOutcome> {
        let estimated = Self::estimate_payload_tokens(history, &agent.model);
        let admission = self.rate_limiter.acquire(provider_name, estimated).await;

        if admission.wait >= PACE_EMIT_THRESHOLD {
            self.bus
                .emit(Event::RateLimitPace(RateLimitPaceData {
                    envelope: Envelope::default(),
                    conversation_id: conversation_id.to_string(),
                    provider: provider_name.to_string(),
                    wait_time: admission.wait.as_secs_f64(),
                    reason: match admission.reason {
                        PaceReason::RequestRate => EventPaceReason::RequestRate,
                        PaceReason::TokenRate => EventPaceReason::TokenRate,
                        PaceReason::Mixed => EventPaceReason::Mixed,
                        PaceReason::None => EventPaceReason::Mixed,
                    },
                }))
                .await?;
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        let pending_key = (conversation_id.to_string(), agent.id);
        self.pending.lock().insert(pending_key.clone(), tx);

        self.bus
            .emit(Event::MessageRequest(MessageRequestData {
                envelope: Envelope::default(),
                conversation_id: conversation_id.to_string(),
                agent_id: agent.id.as_str().to_string(),
                turn_number,
                conversation_history: history.to_vec(),
                temperature: agent.temperature,
            }))
            .await?;

        let timeout = timeout.unwrap_or(self.default_timeout);
        let outcome = self.wait_for_outcome(rx, interrupt, timeout).await;
        self.pending.lock().remove(&pending_key);

        match outcome {
            WaitResult::Resolved(Ok((message, usage))) => {
                self.rate_limiter
                    .record_request_complete(provider_name, usage.total_tokens as u64);
                Ok(MessageOutcome::Message(message))
            }
            WaitResult::Resolved(Err(error)) => Ok(MessageOutcome::Failed(error)),
            WaitResult::Interrupted => {
                if let Some(handler) = interrupt {
                    handler
                        .handle_pause(
                            &self.bus,
                            conversation_id,
                            turn_number,
                            format!("waiting_for_{}", agent.id.as_str()),
                        )
                        .await?;
                }
                Ok(MessageOutcome::Interrupted)
            }
            WaitResult::TimedOut => {
                self.bus
                    .emit(Event::ProviderTimeout(ProviderTimeoutData {
                        envelope: Envelope::default(),
                        conversation_id: conversation_id.to_string(),
                        agent_id: agent.id.as_str().to_string(),
                        provider: provider_name.to_string(),
                        timeout_seconds: timeout.as_secs_f64(),
                    }))
                    .await?;
                Ok(MessageOutcome::TimedOut)
            }
        }
    }

    async fn wait_for_outcome(
        &self,
        mut rx: tokio::sync::oneshot::Receiver<ProviderOutcome>,
        interrupt: Option<&InterruptHandler>,
        timeout: Duration,
    ) -> WaitResult {
        let poll_interrupt = async {
            match interrupt {
                Some(handle) => loop {
                    if handle.check_interrupt() {
                        return;
                    }
                    tokio::time::sleep(INTERRUPT_POLL_INTERVAL).await;
                },
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = &mut rx => {
                return match result {
                    Ok(outcome) => WaitResult::Resolved(outcome),
                    Err(_) => WaitResult::Resolved(Err("provider wrapper dropped without responding".to_string())),
                };
            }
            _ = poll_interrupt => {}
            _ = tokio::time::sleep(timeout) => {
                return WaitResult::TimedOut;
            }
        }

        // Interrupted: wait a little longer in case the provider still answers.
        tokio::select! {
            result = &mut rx => match result {
                Ok(outcome) => WaitResult::Resolved(outcome),
                Err(_) => WaitResult::Interrupted,
            },
            _ = tokio::time::sleep(POST_INTERRUPT_GRACE) => WaitResult::Interrupted,
        }
    }
}

enum WaitResult {
    Resolved(ProviderOutcome),
    Interrupted,
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pidgin_types::agent::AgentId;
    use pidgin_types::message::Role;
    use std::collections::HashMap as StdHashMap;

    fn handler(timeout: Duration) -> MessageHandler {
        MessageHandler::new(
            Arc::new(EventBus::new(100)),
            Arc::new(RateLimiter::new(StdHashMap::new())),
            timeout,
        )
    }

    #[tokio::test]
    async fn resolves_when_provider_answers_promptly() {
        let handler = handler(Duration::from_secs(5));
        let agent = Agent::new(AgentId::AgentA, "local-a");
        let pending = handler.pending_table();

        let history = vec![Message::new(Role::User, "hi", "researcher")];
        let fut = handler.get_agent_message("conv1", &agent, "local", 0, &history);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let tx = pending.lock().remove(&("conv1".to_string(), AgentId::AgentA)).unwrap();
            let _ = tx.send(Ok((
                Message::new(Role::Assistant, "hello", "agent_a"),
                Usage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                },
            )));
        });

        let outcome = fut.await.unwrap();
        assert!(matches!(outcome, MessageOutcome::Message(m) if m.content == "hello"));
    }

    #[tokio::test]
    async fn times_out_when_nobody_answers() {
        let handler = handler(Duration::from_millis(50));
        let agent = Agent::new(AgentId::AgentA, "local-a");
        let outcome = handler
            .get_agent_message("conv1", &agent, "local", 0, &[])
            .await
            .unwrap();
        assert!(matches!(outcome, MessageOutcome::TimedOut));
        let history = handler.bus.get_history();
        assert!(history.iter().any(|e| e.type_name() == "ProviderTimeout"));
    }

    #[tokio::test]
    async fn failure_is_surfaced_as_failed_outcome() {
        let handler = handler(Duration::from_secs(5));
        let agent = Agent::new(AgentId::AgentA, "local-a");
        let pending = handler.pending_table();

        let fut = handler.get_agent_message("conv1", &agent, "local", 0, &[]);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let tx = pending.lock().remove(&("conv1".to_string(), AgentId::AgentA)).unwrap();
            let _ = tx.send(Err("401 unauthorized".to_string()));
        });

        let outcome = fut.await.unwrap();
        assert!(matches!(outcome, MessageOutcome::Failed(msg) if msg.contains("unauthorized")));
    }

    #[tokio::test]
    async fn interrupt_returns_interrupted_when_provider_never_answers() {
        let handler = handler(Duration::from_secs(10));
        let agent = Agent::new(AgentId::AgentA, "local-a");
        let interrupt = InterruptHandler::new();
        interrupt.request();

        let start = std::time::Instant::now();
        let outcome = handler
            .get_agent_message_with_interrupt(
                "conv1",
                &agent,
                "local",
                0,
                &[],
                Some(&interrupt),
                Some(Duration::from_secs(10)),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, MessageOutcome::Interrupted));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn interrupt_emits_interrupt_request_then_conversation_paused() {
        let bus = Arc::new(EventBus::new(100));
        let handler = MessageHandler::new(bus.clone(), Arc::new(RateLimiter::new(StdHashMap::new())), Duration::from_secs(10));
        let agent = Agent::new(AgentId::AgentA, "local-a");
        let interrupt = InterruptHandler::new();
        interrupt.request();

        handler
            .get_agent_message_with_interrupt("conv1", &agent, "local", 0, &[], Some(&interrupt), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        let names: Vec<_> = bus.get_history().iter().map(|e| e.type_name()).collect();
        assert!(names.contains(&"InterruptRequest"));
        assert!(names.contains(&"ConversationPaused"));
        assert!(
            names.iter().position(|n| *n == "InterruptRequest") < names.iter().position(|n| *n == "ConversationPaused"),
            "InterruptRequest must precede ConversationPaused, got {names:?}"
        );
        assert!(interrupt.is_paused());
    }

    #[tokio::test]
    async fn only_one_pending_entry_per_agent_at_a_time() {
        let handler = handler(Duration::from_millis(50));
        let agent = Agent::new(AgentId::AgentA, "local-a");
        handler
            .get_agent_message("conv1", &agent, "local", 0, &[])
            .await
            .unwrap();
        assert!(handler.pending_table().lock().is_empty());
    }
}
