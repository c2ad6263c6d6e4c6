//! Model → provider resolution and display-name assignment (§4.9).
//!
//! The provider lookup and display-name assignment rules, and the
//! `extract_chosen_name` regex cascade, are ported in spirit from
//! `original_source/pidgin/core/name_coordinator.py` — same ordered
//! pattern list and fallback chain, translated to the `regex` crate.

use std::sync::OnceLock;

use pidgin_types::agent::Agent;
use pidgin_types::config::Config;
use regex::Regex;

/// Resolve a model identifier's provider via the config's model registry,
/// falling back to `"unknown"`.
pub fn provider_for_model(config: &Config, model: &str) -> String {
    config.provider_for_model(model)
}

/// Assign display names for the two agents. When both resolve to the same
/// display name (e.g. both running the same model), suffix `-A` / `-B` to
/// disambiguate; otherwise each keeps its own model's display name,
/// falling back to the literal "Agent A" / "Agent B" when neither is
/// registered.
pub fn assign_display_names(config: &Config, agent_a: &mut Agent, agent_b: &mut Agent) {
    let info_a = config.models.get(&agent_a.model);
    let info_b = config.models.get(&agent_b.model);

    match (info_a, info_b) {
        (Some(a), Some(b)) if a.display_name == b.display_name => {
            agent_a.display_name = format!("{}-A", a.display_name);
            agent_b.display_name = format!("{}-B", b.display_name);
        }
        (Some(a), Some(b)) => {
            agent_a.display_name = a.display_name.clone();
            agent_b.display_name = b.display_name.clone();
        }
        (Some(a), None) => {
            agent_a.display_name = a.display_name.clone();
            agent_b.display_name = "Agent B".to_string();
        }
        (None, Some(b)) => {
            agent_a.display_name = "Agent A".to_string();
            agent_b.display_name = b.display_name.clone();
        }
        (None, None) => {
            agent_a.display_name = "Agent A".to_string();
            agent_b.display_name = "Agent B".to_string();
        }
    }
}

fn name_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)I'll (?:go by|be|choose) \[?(\w{2,8})\]?").unwrap(),
            Regex::new(r"(?i)call me \[?(\w{2,8})\]?").unwrap(),
            Regex::new(r"(?i)my name is \[?(\w{2,8})\]?").unwrap(),
            Regex::new(r"(?i)I (?:choose|select) \[?(\w{2,8})\]?").unwrap(),
            Regex::new(r"(?i)I am \[?(\w{2,8})\]?").unwrap(),
            Regex::new(r"^\[?(\w{2,8})\]? here").unwrap(),
        ]
    })
}

fn quoted_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""(\w{2,8})""#).unwrap())
}

fn bracketed_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\w{2,8})\]").unwrap())
}

/// Search free text for a self-chosen name, trying the ordered pattern
/// cascade first, then a quoted name, then a bracketed name. Returns the
/// cleaned 2-8 character match, or `None`.
pub fn extract_chosen_name(text: &str) -> Option<String> {
    for pattern in name_patterns() {
        if let Some(caps) = pattern.captures(text) {
            return caps.get(1).map(|m| m.as_str().to_string());
        }
    }
    if let Some(caps) = quoted_name_pattern().captures(text) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    if let Some(caps) = bracketed_name_pattern().captures(text) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pidgin_types::agent::AgentId;
    use pidgin_types::config::ModelInfo;

    fn config_with(model: &str, provider: &str, display_name: &str) -> Config {
        let mut config = Config::default();
        config.models.insert(
            model.to_string(),
            ModelInfo {
                provider: provider.to_string(),
                display_name: display_name.to_string(),
            },
        );
        config
    }

    #[test]
    fn provider_for_known_model() {
        let config = config_with("claude-sonnet-4", "anthropic", "Claude");
        assert_eq!(provider_for_model(&config, "claude-sonnet-4"), "anthropic");
    }

    #[test]
    fn provider_for_unknown_model_is_unknown() {
        let config = Config::default();
        assert_eq!(provider_for_model(&config, "mystery-model"), "unknown");
    }

    #[test]
    fn distinct_models_keep_their_own_display_names() {
        let mut config = config_with("model-a", "anthropic", "Claude");
        config.models.insert(
            "model-b".to_string(),
            ModelInfo {
                provider: "openai".to_string(),
                display_name: "GPT".to_string(),
            },
        );
        let mut a = Agent::new(AgentId::AgentA, "model-a");
        let mut b = Agent::new(AgentId::AgentB, "model-b");
        assign_display_names(&config, &mut a, &mut b);
        assert_eq!(a.display_name, "Claude");
        assert_eq!(b.display_name, "GPT");
    }

    #[test]
    fn same_model_gets_suffixed() {
        let config = config_with("model-a", "anthropic", "Claude");
        let mut a = Agent::new(AgentId::AgentA, "model-a");
        let mut b = Agent::new(AgentId::AgentB, "model-a");
        assign_display_names(&config, &mut a, &mut b);
        assert_eq!(a.display_name, "Claude-A");
        assert_eq!(b.display_name, "Claude-B");
    }

    #[test]
    fn unregistered_models_fall_back_to_literal_names() {
        let config = Config::default();
        let mut a = Agent::new(AgentId::AgentA, "model-a");
        let mut b = Agent::new(AgentId::AgentB, "model-b");
        assign_display_names(&config, &mut a, &mut b);
        assert_eq!(a.display_name, "Agent A");
        assert_eq!(b.display_name, "Agent B");
    }

    #[test]
    fn extracts_ill_go_by_pattern() {
        assert_eq!(extract_chosen_name("I'll go by Nova from now on."), Some("Nova".to_string()));
    }

    #[test]
    fn extracts_call_me_pattern() {
        assert_eq!(extract_chosen_name("Call me Rex."), Some("Rex".to_string()));
    }

    #[test]
    fn extracts_my_name_is_pattern() {
        assert_eq!(extract_chosen_name("My name is Sable."), Some("Sable".to_string()));
    }

    #[test]
    fn falls_back_to_quoted_name() {
        assert_eq!(extract_chosen_name("You can call me \"Echo\" for short."), Some("Echo".to_string()));
    }

    #[test]
    fn matches_bracketed_name_before_here() {
        assert_eq!(extract_chosen_name("[Juno] here, ready to begin."), Some("Juno".to_string()));
    }

    #[test]
    fn falls_back_to_bare_bracketed_name() {
        assert_eq!(extract_chosen_name("Some text then [Orin] appears mid-sentence."), Some("Orin".to_string()));
    }

    #[test]
    fn returns_none_when_nothing_matches() {
        assert_eq!(extract_chosen_name("Let's get started with the discussion."), None);
    }
}
