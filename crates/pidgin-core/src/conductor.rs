//! Top-level orchestrator composing the bus, rate limiter, message
//! handler, turn executor, lifecycle, and both agents' provider wrappers
//! into one runnable conversation (§2, §4).

use std::sync::Arc;
use std::time::Duration;

use pidgin_types::agent::{Agent, AgentId};
use pidgin_types::config::Config;
use pidgin_types::conversation::Conversation;
use pidgin_types::event::EndReason;
use pidgin_types::Result;

use pidgin_providers::LlmProvider;

use crate::bus::EventBus;
use crate::interrupt_handler::InterruptHandler;
use crate::lifecycle::ConversationLifecycle;
use crate::message_handler::MessageHandler;
use crate::name_coordinator;
use crate::rate_limiter::RateLimiter;
use crate::turn_executor::{StopReason, TurnExecutor, TurnOutcome};
use crate::wrapper::ProviderWrapper;

/// Why `run_conversation` returned, plus the conversation it built.
#[derive(Debug)]
pub struct RunOutcome {
    pub conversation: Conversation,
    pub reason: EndReason,
}

fn end_reason_for(stop: StopReason) -> EndReason {
    match stop {
        StopReason::Interrupted => EndReason::Interrupted,
        StopReason::HighConvergence => EndReason::HighConvergence,
        StopReason::ProviderError => EndReason::Error,
    }
}

/// Wires together one conversation's worth of machinery and drives it to
/// completion. Holds no state across conversations — create a fresh
/// `Conductor` per run, the way the teacher's top-level runner constructs
/// a fresh session per invocation rather than reusing one.
pub struct Conductor {
    config: Config,
    bus: Arc<EventBus>,
    rate_limiter: Arc<RateLimiter>,
    lifecycle: ConversationLifecycle,
    turn_executor: TurnExecutor,
    interrupt: InterruptHandler,
    max_turns: u32,
}

impl Conductor {
    /// Build a conductor for one conversation. `log_dir` is optional:
    /// when absent the bus keeps only its in-memory history (useful for
    /// tests), when present every event is also durably appended as
    /// JSONL under it.
    pub fn new(config: Config, log_dir: Option<impl Into<std::path::PathBuf>>, max_turns: u32) -> Self {
        let bus = Arc::new(match log_dir {
            Some(dir) => EventBus::with_log_dir(config.max_history_size, dir),
            None => EventBus::new(config.max_history_size),
        });
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
        let default_timeout = Duration::from_secs_f64(config.default_timeout_secs);
        let message_handler = Arc::new(MessageHandler::new(bus.clone(), rate_limiter.clone(), default_timeout));
        let turn_executor = TurnExecutor::new(
            bus.clone(),
            message_handler.clone(),
            config.convergence.threshold,
            config.convergence.action,
        );
        let lifecycle = ConversationLifecycle::new(bus.clone());

        Self {
            config,
            bus,
            rate_limiter,
            lifecycle,
            turn_executor,
            interrupt: InterruptHandler::new(),
            max_turns,
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn interrupt_handler(&self) -> InterruptHandler {
        self.interrupt.clone()
    }

    /// Run a full conversation: wire both providers, seed the initial
    /// messages, emit the start events, run turns until a stop condition
    /// fires or `max_turns` is reached, then emit exactly one
    /// `ConversationEnd`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_conversation(
        &self,
        mut agent_a: Agent,
        mut agent_b: Agent,
        provider_a: Arc<dyn LlmProvider>,
        provider_b: Arc<dyn LlmProvider>,
        initial_prompt: impl Into<String>,
        system_prompt_a: &str,
        system_prompt_b: &str,
    ) -> Result<RunOutcome> {
        name_coordinator::assign_display_names(&self.config, &mut agent_a, &mut agent_b);

        ProviderWrapper::new(AgentId::AgentA, self.bus.clone(), provider_a, self.rate_limiter.clone(), agent_a.model.clone())
            .install();
        ProviderWrapper::new(AgentId::AgentB, self.bus.clone(), provider_b, self.rate_limiter.clone(), agent_b.model.clone())
            .install();

        let provider_a_name = self.config.provider_for_model(&agent_a.model);
        let provider_b_name = self.config.provider_for_model(&agent_b.model);

        let mut conversation = self
            .lifecycle
            .create_conversation(agent_a.clone(), agent_b.clone(), initial_prompt);
        self.lifecycle
            .add_initial_messages(&mut conversation, &self.config, system_prompt_a, system_prompt_b);
        self.lifecycle
            .emit_start_events(&conversation, self.max_turns)
            .await?;

        let timeout = Duration::from_secs_f64(self.config.default_timeout_secs);
        let mut reason = EndReason::MaxTurnsReached;

        for turn_number in 0..self.max_turns {
            if self.interrupt.check_interrupt() {
                reason = EndReason::Interrupted;
                break;
            }

            let outcome = self
                .turn_executor
                .run_single_turn(
                    &mut conversation,
                    turn_number,
                    &agent_a,
                    &agent_b,
                    &provider_a_name,
                    &provider_b_name,
                    &self.interrupt,
                    timeout,
                )
                .await?;

            match outcome {
                TurnOutcome::Continue(_) => continue,
                TurnOutcome::Stop { reason: stop_reason, .. } => {
                    reason = end_reason_for(stop_reason);
                    break;
                }
            }
        }

        self.lifecycle
            .emit_end_event_with_reason(&conversation, reason)
            .await?;

        Ok(RunOutcome { conversation, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pidgin_providers::LocalProvider;
    use pidgin_types::config::{ConvergenceConfig, ModelInfo};
    use pidgin_types::event::ConvergenceAction;

    fn config(threshold: f64, action: ConvergenceAction) -> Config {
        let mut config = Config {
            convergence: ConvergenceConfig { threshold, action },
            default_timeout_secs: 5.0,
            ..Config::default()
        };
        config.models.insert(
            "local-a".to_string(),
            ModelInfo { provider: "local".to_string(), display_name: "Local A".to_string() },
        );
        config.models.insert(
            "local-b".to_string(),
            ModelInfo { provider: "local".to_string(), display_name: "Local B".to_string() },
        );
        config
    }

    #[tokio::test]
    async fn runs_until_max_turns_when_convergence_never_trips() {
        let conductor = Conductor::new(config(0.999, ConvergenceAction::Stop), None::<std::path::PathBuf>, 3);
        let agent_a = Agent::new(AgentId::AgentA, "local-a");
        let agent_b = Agent::new(AgentId::AgentB, "local-b");

        let outcome = conductor
            .run_conversation(
                agent_a,
                agent_b,
                Arc::new(LocalProvider::new("local")),
                Arc::new(LocalProvider::new("local")),
                "let's begin",
                "",
                "",
            )
            .await
            .unwrap();

        assert_eq!(outcome.reason, EndReason::MaxTurnsReached);
        assert_eq!(outcome.conversation.turn_count(), 3);

        let history = conductor.bus().get_history();
        assert_eq!(history.iter().filter(|e| e.type_name() == "ConversationEnd").count(), 1);
        assert_eq!(history.iter().filter(|e| e.type_name() == "TurnComplete").count(), 3);
    }

    #[tokio::test]
    async fn interrupt_before_first_turn_stops_immediately() {
        let conductor = Conductor::new(config(0.999, ConvergenceAction::Stop), None::<std::path::PathBuf>, 5);
        conductor.interrupt_handler().request();
        let agent_a = Agent::new(AgentId::AgentA, "local-a");
        let agent_b = Agent::new(AgentId::AgentB, "local-b");

        let outcome = conductor
            .run_conversation(
                agent_a,
                agent_b,
                Arc::new(LocalProvider::new("local")),
                Arc::new(LocalProvider::new("local")),
                "let's begin",
                "",
                "",
            )
            .await
            .unwrap();

        assert_eq!(outcome.reason, EndReason::Interrupted);
        assert_eq!(outcome.conversation.turn_count(), 0);
    }
}
