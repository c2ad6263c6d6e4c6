//! Deterministic, network-free [`LlmProvider`] used by the crate's own
//! tests and by `pidgin-cli`'s demo run.
//!
//! Grounded in `original_source/pidgin/local/test_model.py`: canned
//! response banks selected by a simple classification of the last message
//! in the transformed history (question / agreement / convergence after
//! enough turns / elaboration), with a content hash picking among ties so
//! the same input always produces the same reply.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_stream::stream;
use pidgin_types::message::Role;
use pidgin_types::stream::{StreamEvent, Usage};
use pidgin_types::Result;

use crate::traits::{ChatRequest, LlmProvider};

const GREETINGS: &[&str] = &[
    "Hello! I'm ready to talk.",
    "Hi there, let's get started.",
    "Hey, good to be here.",
];

const QUESTIONS: &[&str] = &[
    "That's a good question, let me think about the pattern here.",
    "I'd say it depends on the test conditions.",
    "Good question — I notice a recurring convergence in how we're both answering.",
];

const AGREEMENTS: &[&str] = &[
    "Yes, exactly — I agree completely.",
    "Right, that's correct.",
    "Agreed, that matches what I was thinking.",
];

const ELABORATIONS: &[&str] = &[
    "Let me elaborate on that a bit further.",
    "Building on what you said, there's more to unpack here.",
    "To add some detail: that's one way of looking at it.",
];

const CONVERGENCE: &[&str] = &[
    "Same.",
    "I agree, same here.",
    "Yes, same as before.",
];

fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

fn word_count_suffix(word_count: usize) -> &'static str {
    if word_count < 10 {
        " (brief)"
    } else if word_count > 50 {
        " (at length)"
    } else {
        ""
    }
}

fn pick_response(messages: &[pidgin_types::message::Message]) -> String {
    let turn_count = messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .count();

    let Some(last) = messages.last() else {
        return GREETINGS[0].to_string();
    };

    let lower = last.content.to_lowercase();
    let word_count = last.content.split_whitespace().count();

    if turn_count > 10 {
        let idx = (turn_count as usize) % CONVERGENCE.len();
        return CONVERGENCE[idx].to_string();
    }

    if lower.contains('?')
        || lower.contains("what")
        || lower.contains("how")
        || lower.contains("why")
        || lower.contains("when")
        || lower.contains("where")
    {
        let idx = (content_hash(&lower) as usize) % QUESTIONS.len();
        let mut reply = QUESTIONS[idx].to_string();
        if lower.contains("pattern") || lower.contains("test") || lower.contains("convergence") {
            reply.push_str(" (and yes, I see it too)");
        }
        return reply;
    }

    if lower.contains("yes")
        || lower.contains("agree")
        || lower.contains("right")
        || lower.contains("exactly")
        || lower.contains("correct")
    {
        let idx = turn_count % AGREEMENTS.len();
        return AGREEMENTS[idx].to_string();
    }

    let idx = turn_count % ELABORATIONS.len();
    format!("{}{}", ELABORATIONS[idx], word_count_suffix(word_count))
}

/// A canned, content-hashed provider with no network I/O.
pub struct LocalProvider {
    id: String,
}

impl LocalProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait::async_trait]
impl LlmProvider for LocalProvider {
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<pidgin_types::stream::BoxStream<'static, Result<StreamEvent>>> {
        let reply = pick_response(&req.messages);
        let words: Vec<String> = reply.split(' ').map(|w| w.to_string()).collect();
        let completion_tokens = (reply.len() / 4).max(1) as u32;
        let prompt_tokens = (req
            .messages
            .iter()
            .map(|m| m.content.len())
            .sum::<usize>()
            / 4)
            .max(1) as u32;

        let s = stream! {
            for word in words {
                yield Ok(StreamEvent::Token { text: format!("{word} ") });
            }
            yield Ok(StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                }),
                finish_reason: Some("stop".to_string()),
            });
        };
        Ok(Box::pin(s))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
