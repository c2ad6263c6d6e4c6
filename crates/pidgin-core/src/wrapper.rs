//! The provider wrapper: turns a streaming [`LlmProvider`] into an event
//! subscriber (§4.3, §9's "provider wrapper as an event subscriber, not a
//! method"). The conductor never calls a provider directly — it emits
//! `MessageRequest`, and whichever wrapper is bound to that event's
//! `agent_id` reacts.
//!
//! History perspective transformation is grounded in
//! `original_source/pidgin/core/router.py`'s `_build_agent_history`: each
//! agent sees its own prior turns as `assistant` and the other agent's as
//! `user`, and never sees the other agent's system prompt.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use pidgin_types::agent::AgentId;
use pidgin_types::event::{
    ApiErrorData, ContextTruncationData, Envelope, Event, EventKind, MessageChunkData,
    MessageCompleteData, TokenUsageData,
};
use pidgin_types::message::{Message, Role};
use pidgin_types::stream::StreamEvent;
use pidgin_types::Result;

use pidgin_providers::{classify, ChatRequest, LlmProvider};

use crate::bus::EventBus;
use crate::rate_limiter::RateLimiter;

/// Default per-model context budget in tokens. Real deployments would
/// size this per model; the spec leaves the exact budget unspecified
/// beyond "provider/model-specific", so one conservative constant covers
/// every model this crate ships a provider for.
const DEFAULT_MAX_CONTEXT_TOKENS: u64 = 8_000;

fn estimate_tokens(messages: &[Message]) -> u64 {
    let chars: usize = messages.iter().map(|m| m.content.len()).sum();
    (chars as u64 / 4).max(1)
}

pub struct ProviderWrapper {
    agent_id: AgentId,
    bus: Arc<EventBus>,
    provider: Arc<dyn LlmProvider>,
    rate_limiter: Arc<RateLimiter>,
    model: String,
    max_context_tokens: u64,
}

impl ProviderWrapper {
    pub fn new(
        agent_id: AgentId,
        bus: Arc<EventBus>,
        provider: Arc<dyn LlmProvider>,
        rate_limiter: Arc<RateLimiter>,
        model: impl Into<String>,
    ) -> Arc<Self> {
        Self::with_max_context_tokens(
            agent_id,
            bus,
            provider,
            rate_limiter,
            model,
            DEFAULT_MAX_CONTEXT_TOKENS,
        )
    }

    pub fn with_max_context_tokens(
        agent_id: AgentId,
        bus: Arc<EventBus>,
        provider: Arc<dyn LlmProvider>,
        rate_limiter: Arc<RateLimiter>,
        model: impl Into<String>,
        max_context_tokens: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent_id,
            bus,
            provider,
            rate_limiter,
            model: model.into(),
            max_context_tokens,
        })
    }

    /// Register this wrapper with the bus. Its handler filters on the
    /// bound `agent_id` and spawns the actual streaming work so it never
    /// blocks other `MessageRequest` subscribers (§4.3's last sentence).
    pub fn install(self: &Arc<Self>) {
        let wrapper = self.clone();
        self.bus.subscribe(
            EventKind::MessageRequest,
            Arc::new(move |event: &Event| {
                let Event::MessageRequest(data) = event else {
                    return Box::pin(async {});
                };
                if data.agent_id != wrapper.agent_id.as_str() {
                    return Box::pin(async {});
                }
                let wrapper = wrapper.clone();
                let data = data.clone();
                Box::pin(async move {
                    tokio::spawn(async move {
                        wrapper.handle_request(data).await;
                    });
                })
            }),
        );
    }

    /// Split `history` into this agent's local perspective: own prior
    /// turns become `assistant`, the other agent's become `user`, the
    /// other agent's system prompt is dropped entirely, and the
    /// human-tagged initial prompt passes through as `user`.
    fn transform_history(&self, history: &[Message]) -> Vec<Message> {
        history
            .iter()
            .filter_map(|m| {
                if m.role == Role::System {
                    if m.agent_id == self.agent_id.as_str() {
                        Some(m.clone())
                    } else {
                        None
                    }
                } else if m.agent_id == self.agent_id.as_str() {
                    Some(Message::new(Role::Assistant, m.content.clone(), m.agent_id.clone()))
                } else {
                    Some(Message::new(Role::User, m.content.clone(), m.agent_id.clone()))
                }
            })
            .collect()
    }

    /// Drop the oldest non-system messages from the front until the
    /// estimate fits the budget. Returns the (possibly trimmed) messages
    /// and how many were dropped.
    fn truncate_to_budget(&self, messages: Vec<Message>) -> (Vec<Message>, usize) {
        let mut messages = messages;
        let mut dropped = 0;
        while estimate_tokens(&messages) > self.max_context_tokens {
            let Some(idx) = messages.iter().position(|m| m.role != Role::System) else {
                break;
            };
            messages.remove(idx);
            dropped += 1;
        }
        (messages, dropped)
    }

    async fn handle_request(&self, data: pidgin_types::event::MessageRequestData) {
        if let Err(err) = self.run(&data).await {
            tracing::warn!(agent_id = %data.agent_id, error = %err, "provider wrapper failed to emit its response");
        }
    }

    async fn run(&self, data: &pidgin_types::event::MessageRequestData) -> Result<()> {
        let conversation_id = &data.conversation_id;
        let provider_id = self.provider.provider_id().to_string();
        let original_count = data.conversation_history.len();

        let transformed = self.transform_history(&data.conversation_history);
        let (transformed, dropped) = self.truncate_to_budget(transformed);
        if dropped > 0 {
            self.bus
                .emit(Event::ContextTruncation(ContextTruncationData {
                    envelope: Envelope::default(),
                    conversation_id: conversation_id.clone(),
                    agent_id: data.agent_id.clone(),
                    provider: provider_id.clone(),
                    model: self.model.clone(),
                    turn_number: data.turn_number,
                    original_message_count: original_count,
                    truncated_message_count: transformed.len(),
                    messages_dropped: dropped,
                }))
                .await?;
        }

        let request = ChatRequest {
            messages: transformed,
            temperature: data.temperature,
        };

        let stream = match self.provider.chat_stream(request).await {
            Ok(stream) => stream,
            Err(err) => {
                self.emit_failure(conversation_id, &data.agent_id, &provider_id, &err.to_string())
                    .await?;
                return Ok(());
            }
        };
        tokio::pin!(stream);

        let start = Instant::now();
        let chunk_index = AtomicU32::new(0);
        let mut content = String::new();

        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::Token { text }) => {
                    content.push_str(&text);
                    let idx = chunk_index.fetch_add(1, Ordering::SeqCst);
                    self.bus
                        .emit(Event::MessageChunk(MessageChunkData {
                            envelope: Envelope::default(),
                            conversation_id: conversation_id.clone(),
                            agent_id: data.agent_id.clone(),
                            chunk: text,
                            chunk_index: idx,
                            elapsed_ms: start.elapsed().as_millis() as u64,
                        }))
                        .await?;
                }
                Ok(StreamEvent::Done { usage, .. }) => {
                    let usage = usage.unwrap_or(pidgin_types::stream::Usage {
                        prompt_tokens: 0,
                        completion_tokens: 0,
                        total_tokens: 0,
                    });
                    let message = Message::new(Role::Assistant, content.clone(), data.agent_id.clone());
                    self.bus
                        .emit(Event::MessageComplete(MessageCompleteData {
                            envelope: Envelope::default(),
                            conversation_id: conversation_id.clone(),
                            agent_id: data.agent_id.clone(),
                            message,
                            prompt_tokens: usage.prompt_tokens,
                            completion_tokens: usage.completion_tokens,
                            total_tokens: usage.total_tokens,
                            duration_ms: start.elapsed().as_millis() as u64,
                        }))
                        .await?;

                    let (used, limit) = self.rate_limiter.usage_snapshot(&provider_id);
                    self.bus
                        .emit(Event::TokenUsage(TokenUsageData {
                            envelope: Envelope::default(),
                            conversation_id: conversation_id.clone(),
                            provider: provider_id.clone(),
                            model: self.model.clone(),
                            tokens_used: usage.total_tokens as u64,
                            prompt_tokens: usage.prompt_tokens,
                            completion_tokens: usage.completion_tokens,
                            tokens_per_minute_limit: limit,
                            current_usage_rate: if limit == 0 {
                                0.0
                            } else {
                                used as f64 / limit as f64
                            },
                        }))
                        .await?;
                    return Ok(());
                }
                Ok(StreamEvent::Error { message }) => {
                    self.emit_failure(conversation_id, &data.agent_id, &provider_id, &message)
                        .await?;
                    return Ok(());
                }
                Err(err) => {
                    self.emit_failure(conversation_id, &data.agent_id, &provider_id, &err.to_string())
                        .await?;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn emit_failure(
        &self,
        conversation_id: &str,
        agent_id: &str,
        provider_id: &str,
        error_message: &str,
    ) -> Result<()> {
        let classification = classify(error_message);
        self.bus
            .emit(Event::ApiError(ApiErrorData {
                envelope: Envelope::default(),
                conversation_id: conversation_id.to_string(),
                agent_id: agent_id.to_string(),
                provider: provider_id.to_string(),
                error_type: classification.error_type.to_string(),
                error_message: error_message.to_string(),
                retryable: classification.retryable,
                retry_count: 0,
            }))
            .await
    }
}
