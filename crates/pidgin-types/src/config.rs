//! Flat, file-loadable configuration for a conversation run.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::event::ConvergenceAction;
use crate::Error;

/// Top-level configuration. Every field has a sane default so a bare
/// `[convergence]`-less TOML file (or no file at all) still produces a
/// runnable config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub convergence: ConvergenceConfig,
    /// Rate limit overrides keyed by provider name (`"anthropic"`,
    /// `"openai"`, `"local"`, …). Providers absent from this map fall back
    /// to [`ProviderRateLimit::default`].
    pub rate_limits: HashMap<String, ProviderRateLimit>,
    pub default_timeout_secs: f64,
    pub max_history_size: usize,
    /// Prefix tagged onto a human-provided initial prompt when it is
    /// recorded as a message (see `conversation_lifecycle`).
    pub human_tag: String,
    /// Model registry used for display-name lookups and provider
    /// resolution, keyed by model id (e.g. `"claude-sonnet-4"`).
    pub models: HashMap<String, ModelInfo>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            convergence: ConvergenceConfig::default(),
            rate_limits: HashMap::new(),
            default_timeout_secs: 60.0,
            max_history_size: 1000,
            human_tag: "[HUMAN]: ".to_string(),
            models: HashMap::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Look up a model's provider name, defaulting to `"unknown"` when the
    /// model isn't registered (mirrors the name coordinator's fallback).
    pub fn provider_for_model(&self, model: &str) -> String {
        self.models
            .get(model)
            .map(|m| m.provider.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn rate_limit_for(&self, provider: &str) -> ProviderRateLimit {
        self.rate_limits
            .get(provider)
            .cloned()
            .unwrap_or_default()
    }

    /// Validate the configuration and return a list of issues. An empty
    /// vec means everything looks good; callers should still proceed on
    /// [`ConfigSeverity::Warning`]-only results.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if !(0.0..=1.0).contains(&self.convergence.threshold) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "convergence.threshold".into(),
                message: "must be between 0.0 and 1.0".into(),
            });
        }

        if self.default_timeout_secs <= 0.0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "default_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.max_history_size == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "max_history_size".into(),
                message: "0 disables history retention entirely".into(),
            });
        }

        for (provider, limit) in &self.rate_limits {
            if limit.requests_per_minute == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("rate_limits.{provider}.requests_per_minute"),
                    message: "must be greater than 0".into(),
                });
            }
            if limit.tokens_per_minute == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("rate_limits.{provider}.tokens_per_minute"),
                    message: "must be greater than 0".into(),
                });
            }
        }

        for (model, info) in &self.models {
            if info.provider.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("models.{model}.provider"),
                    message: "provider must not be empty".into(),
                });
            }
        }

        errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub threshold: f64,
    pub action: ConvergenceAction,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            action: ConvergenceAction::Stop,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderRateLimit {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
}

impl Default for ProviderRateLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 50,
            tokens_per_minute: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn from_toml_str_parses_overrides() {
        let toml = r#"
            default_timeout_secs = 30.0
            max_history_size = 500

            [convergence]
            threshold = 0.9
            action = "warn"

            [rate_limits.anthropic]
            requests_per_minute = 10
            tokens_per_minute = 40000

            [models."claude-sonnet-4"]
            provider = "anthropic"
            display_name = "Claude"
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.default_timeout_secs, 30.0);
        assert_eq!(config.max_history_size, 500);
        assert_eq!(config.convergence.threshold, 0.9);
        assert!(matches!(config.convergence.action, ConvergenceAction::Warn));
        assert_eq!(config.rate_limit_for("anthropic").requests_per_minute, 10);
        assert_eq!(config.provider_for_model("claude-sonnet-4"), "anthropic");
    }

    #[test]
    fn unknown_model_falls_back() {
        let config = Config::default();
        assert_eq!(config.provider_for_model("whatever"), "unknown");
    }

    #[test]
    fn missing_provider_limit_falls_back_to_default() {
        let config = Config::default();
        let limit = config.rate_limit_for("anthropic");
        assert_eq!(limit.requests_per_minute, 50);
        assert_eq!(limit.tokens_per_minute, 100_000);
    }

    #[test]
    fn validate_flags_bad_threshold() {
        let mut config = Config::default();
        config.convergence.threshold = 1.5;
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, ConfigSeverity::Error);
        assert_eq!(errors[0].field, "convergence.threshold");
    }

    #[test]
    fn validate_flags_zero_rate_limit() {
        let mut config = Config::default();
        config.rate_limits.insert(
            "local".into(),
            ProviderRateLimit {
                requests_per_minute: 0,
                tokens_per_minute: 0,
            },
        );
        let errors = config.validate();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn validate_warns_on_zero_history_size() {
        let mut config = Config::default();
        config.max_history_size = 0;
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, ConfigSeverity::Warning);
    }
}
