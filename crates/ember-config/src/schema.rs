// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Layered configuration for an [`AgentInstance`](../ember_runtime/struct.AgentInstance.html):
//! model selection, iteration limits, and compaction parameters.

use serde::{Deserialize, Serialize};

fn default_max_iterations() -> u32 {
    20
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_temperature() -> f32 {
    0.7
}
fn default_reserve_tokens() -> u32 {
    2048
}
fn default_keep_recent_tokens() -> u32 {
    2048
}
fn default_max_history_share() -> f64 {
    0.5
}
fn default_soft_msg_threshold() -> usize {
    20
}
fn default_retry_limit() -> u32 {
    2
}
fn default_duplicate_threshold() -> u32 {
    3
}
fn default_memory_flush_soft_threshold() -> u32 {
    1500
}
fn default_true() -> bool {
    true
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_model_name() -> String {
    "gpt-4o".to_string()
}

/// Compaction strategy selected for an agent's steady-state context management.
///
/// `Off` disables both soft summarization and safeguard pre-call compaction;
/// force compression on a provider context-overflow error still runs
/// regardless of this setting, since it is the last line of defense for I5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompactionMode {
    Off,
    Legacy,
    #[default]
    Safeguard,
}

impl std::fmt::Display for CompactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompactionMode::Off => "off",
            CompactionMode::Legacy => "legacy",
            CompactionMode::Safeguard => "safeguard",
        };
        f.write_str(s)
    }
}

/// A fallback model candidate, tried in order when the primary model's
/// provider call fails with a non-recoverable error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFallback {
    pub provider: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub fallbacks: Vec<ModelFallback>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            name: default_model_name(),
            api_key_env: None,
            base_url: None,
            fallbacks: Vec::new(),
        }
    }
}

/// Rate-limiter and sandbox settings, including tool-set restriction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// `<= 0` means unlimited.
    #[serde(default)]
    pub max_tool_calls_per_minute: i64,
    /// `<= 0` means unlimited.
    #[serde(default)]
    pub max_requests_per_minute: i64,
    /// When true, write/edit/delete tools are omitted from the registry
    /// handed to the loop (sandboxed, read-only operation).
    #[serde(default)]
    pub restrict_to_workspace: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_tool_calls_per_minute: 0,
            max_requests_per_minute: 0,
            restrict_to_workspace: false,
        }
    }
}

/// Per-agent compaction, iteration, and memory-flush parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Context window in tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub compaction_mode: CompactionMode,
    #[serde(default = "default_reserve_tokens")]
    pub reserve_tokens: u32,
    #[serde(default = "default_keep_recent_tokens")]
    pub keep_recent_tokens: u32,
    #[serde(default = "default_max_history_share")]
    pub max_history_share: f64,
    /// Soft-summarization message-count trigger: fires when
    /// `len(history) > soft_msg_threshold`.
    #[serde(default = "default_soft_msg_threshold")]
    pub soft_msg_threshold: usize,
    #[serde(default = "default_true")]
    pub memory_flush_enabled: bool,
    #[serde(default = "default_memory_flush_soft_threshold")]
    pub memory_flush_soft_threshold: u32,
    /// Max retries after a context-overflow force compression within one turn.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Consecutive identical tool-call batches before the duplicate detector aborts.
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            compaction_mode: CompactionMode::default(),
            reserve_tokens: default_reserve_tokens(),
            keep_recent_tokens: default_keep_recent_tokens(),
            max_history_share: default_max_history_share(),
            soft_msg_threshold: default_soft_msg_threshold(),
            memory_flush_enabled: true,
            memory_flush_soft_threshold: default_memory_flush_soft_threshold(),
            retry_limit: default_retry_limit(),
            duplicate_threshold: default_duplicate_threshold(),
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    /// Resolved pre-call compaction trigger: `context_window * max_history_share`.
    pub fn history_budget(&self) -> u32 {
        (self.max_tokens as f64 * self.max_history_share) as u32
    }

    /// Resolved keep-recent floor: `max(1024, context_window / 4)`, but never
    /// below the configured `keep_recent_tokens` value.
    pub fn keep_recent_floor(&self) -> u32 {
        self.keep_recent_tokens.max(1024).max(self.max_tokens / 4)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Validate cross-field invariants not expressible in serde defaults alone.
    ///
    /// `max_history_share` must lie in `(0, 0.9]` — an exclusive lower bound,
    /// since a zero or negative share would trigger safeguard compaction on
    /// every single call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let share = self.agent.max_history_share;
        if !(share > 0.0 && share <= 0.9) {
            return Err(ConfigError::InvalidHistoryShare(share));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("agent.max_history_share must be in (0, 0.9], got {0}")]
    InvalidHistoryShare(f64),
    #[error("agent.max_iterations must be >= 1")]
    InvalidMaxIterations,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = AgentConfig::default();
        assert_eq!(c.max_iterations, 20);
        assert_eq!(c.max_tokens, 8192);
        assert_eq!(c.temperature, 0.7);
        assert_eq!(c.compaction_mode, CompactionMode::Safeguard);
        assert_eq!(c.reserve_tokens, 2048);
        assert_eq!(c.keep_recent_tokens, 2048);
        assert_eq!(c.max_history_share, 0.5);
        assert_eq!(c.memory_flush_soft_threshold, 1500);
    }

    #[test]
    fn history_budget_is_share_of_context_window() {
        let mut c = AgentConfig::default();
        c.max_tokens = 10_000;
        c.max_history_share = 0.5;
        assert_eq!(c.history_budget(), 5_000);
    }

    #[test]
    fn keep_recent_floor_uses_quarter_of_window_when_larger() {
        let mut c = AgentConfig::default();
        c.max_tokens = 100_000;
        c.keep_recent_tokens = 2048;
        assert_eq!(c.keep_recent_floor(), 25_000);
    }

    #[test]
    fn keep_recent_floor_floors_at_1024() {
        let mut c = AgentConfig::default();
        c.max_tokens = 1000;
        c.keep_recent_tokens = 0;
        assert_eq!(c.keep_recent_floor(), 1024);
    }

    #[test]
    fn validate_accepts_default() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_history_share() {
        let mut cfg = Config::default();
        cfg.agent.max_history_share = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_history_share_above_point_nine() {
        let mut cfg = Config::default();
        cfg.agent.max_history_share = 0.95;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_point_nine_inclusive() {
        let mut cfg = Config::default();
        cfg.agent.max_history_share = 0.9;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let cfg: Config = serde_yaml::from_str("agent:\n  max_iterations: 3\n").unwrap();
        assert_eq!(cfg.agent.max_iterations, 3);
        assert_eq!(cfg.agent.max_tokens, 8192);
        assert_eq!(cfg.model.provider, "openai");
    }

    #[test]
    fn compaction_mode_round_trips_through_yaml() {
        let cfg: Config = serde_yaml::from_str("agent:\n  compaction_mode: legacy\n").unwrap();
        assert_eq!(cfg.agent.compaction_mode, CompactionMode::Legacy);
        let back = serde_yaml::to_string(&cfg).unwrap();
        assert!(back.contains("legacy"));
    }

    #[test]
    fn zero_rate_limit_means_unlimited() {
        let t = ToolsConfig::default();
        assert_eq!(t.max_tool_calls_per_minute, 0);
        assert_eq!(t.max_requests_per_minute, 0);
    }
}
