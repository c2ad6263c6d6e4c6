//! Scalar convergence scoring (§4.8).
//!
//! `analysis/convergence.py` was filtered out of the kept original source
//! (see DESIGN.md), so this is an original implementation honoring the
//! spec's contract: deterministic, pure function of the message list,
//! bounded in `[0, 1]`, higher means more similar, 0 when the two
//! messages differ trivially in length. Combines vocabulary overlap
//! (Jaccard over lowercased word sets) with a length-ratio term.

use std::collections::HashSet;

use pidgin_types::message::Message;

/// Compute the convergence score across the two most recent messages of
/// each agent. Returns `0.0` until both agents have spoken at least once.
pub fn calculate(messages: &[Message]) -> f64 {
    let agent_a_last = messages.iter().rev().find(|m| m.agent_id == "agent_a");
    let agent_b_last = messages.iter().rev().find(|m| m.agent_id == "agent_b");

    let (Some(a), Some(b)) = (agent_a_last, agent_b_last) else {
        return 0.0;
    };

    score_pair(&a.content, &b.content)
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

fn score_pair(a: &str, b: &str) -> f64 {
    let words_a = word_set(a);
    let words_b = word_set(b);

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count() as f64;
    let union = words_a.union(&words_b).count() as f64;
    let overlap = intersection / union;

    let len_a = a.len() as f64;
    let len_b = b.len() as f64;
    let length_ratio = if len_a.max(len_b) == 0.0 {
        1.0
    } else {
        len_a.min(len_b) / len_a.max(len_b)
    };

    (0.7 * overlap + 0.3 * length_ratio).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pidgin_types::message::Role;

    fn msg(agent_id: &str, content: &str) -> Message {
        Message::new(Role::Assistant, content, agent_id)
    }

    #[test]
    fn no_messages_scores_zero() {
        assert_eq!(calculate(&[]), 0.0);
    }

    #[test]
    fn one_agent_missing_scores_zero() {
        let messages = vec![msg("agent_a", "hello there")];
        assert_eq!(calculate(&messages), 0.0);
    }

    #[test]
    fn identical_messages_score_near_one() {
        let messages = vec![msg("agent_a", "same same"), msg("agent_b", "same same")];
        let score = calculate(&messages);
        assert!(score > 0.99, "expected near 1.0, got {score}");
    }

    #[test]
    fn completely_different_messages_score_low() {
        let messages = vec![
            msg("agent_a", "the quick brown fox jumps over the lazy dog"),
            msg("agent_b", "xyz"),
        ];
        let score = calculate(&messages);
        assert!(score < 0.3, "expected low score, got {score}");
    }

    #[test]
    fn only_the_most_recent_pair_is_considered() {
        let messages = vec![
            msg("agent_a", "completely unrelated text here"),
            msg("agent_b", "completely unrelated text here"),
            msg("agent_a", "same"),
            msg("agent_b", "different"),
        ];
        let score = calculate(&messages);
        let direct = score_pair("same", "different");
        assert_eq!(score, direct);
    }

    #[test]
    fn score_is_bounded() {
        let messages = vec![
            msg("agent_a", "a b c d e f g"),
            msg("agent_b", "a b c d e f g h i j k l m n o p"),
        ];
        let score = calculate(&messages);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn score_is_deterministic() {
        let messages = vec![msg("agent_a", "hello world"), msg("agent_b", "hello there")];
        assert_eq!(calculate(&messages), calculate(&messages));
    }
}
