//! `pidgin` — run a structured multi-turn conversation between two local
//! agents and print the outcome.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pidgin_core::conductor::Conductor;
use pidgin_providers::LocalProvider;
use pidgin_types::agent::{Agent, AgentId};
use pidgin_types::config::Config;

/// pidgin — a research harness for structured agent-to-agent conversations.
#[derive(Debug, Parser)]
#[command(name = "pidgin", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a conversation to completion and print its outcome.
    Run {
        /// The initial prompt handed to agent A.
        prompt: String,
        /// Maximum number of turns before stopping unconditionally.
        #[arg(long, default_value_t = 10)]
        turns: u32,
        /// Convergence threshold in [0, 1] at which the conversation stops early.
        #[arg(long, default_value_t = 0.85)]
        threshold: f64,
        /// Directory to write the per-conversation JSONL event log into.
        #[arg(long)]
        log_dir: Option<String>,
        /// System prompt for agent A.
        #[arg(long, default_value = "")]
        system_a: String,
        /// System prompt for agent B.
        #[arg(long, default_value = "")]
        system_b: String,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run { prompt, turns, threshold, log_dir, system_a, system_b } => {
            run(prompt, turns, threshold, log_dir, system_a, system_b).await
        }
    }
}

async fn run(
    prompt: String,
    turns: u32,
    threshold: f64,
    log_dir: Option<String>,
    system_a: String,
    system_b: String,
) -> anyhow::Result<()> {
    let mut config = Config::default();
    config.convergence.threshold = threshold;

    let conductor = Conductor::new(config, log_dir, turns);

    let agent_a = Agent::new(AgentId::AgentA, "local-a");
    let agent_b = Agent::new(AgentId::AgentB, "local-b");

    let outcome = conductor
        .run_conversation(
            agent_a,
            agent_b,
            Arc::new(LocalProvider::new("local")),
            Arc::new(LocalProvider::new("local")),
            prompt,
            &system_a,
            &system_b,
        )
        .await?;

    println!(
        "conversation {} ended after {} turn(s): {:?}",
        outcome.conversation.id,
        outcome.conversation.turn_count(),
        outcome.reason,
    );
    for message in &outcome.conversation.messages {
        println!("[{}] {}", message.agent_id, message.content);
    }

    Ok(())
}
