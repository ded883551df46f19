// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `/show`, `/list`, `/switch` command handling. Parsing is whitespace-split;
//! unknown subcommands fall back to a usage string.

use std::collections::HashMap;
use std::sync::Arc;

use ember_model::ModelProvider;
use tokio::sync::RwLock;

use crate::instance::AgentInstance;

const USAGE: &str = "usage: /show model|channel, /list models|channels, /switch model|channel to <name>";

/// Handles one `/`-prefixed command. `current_channel` is the channel the
/// inbound message arrived on, used by `/show channel`.
pub async fn handle_command(
    content: &str,
    instance: &RwLock<AgentInstance>,
    catalog: &HashMap<String, Arc<dyn ModelProvider>>,
    known_channels: &[String],
    current_channel: &str,
) -> String {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    match tokens.as_slice() {
        ["/show", "model"] => {
            let guard = instance.read().await;
            let p = guard.primary_provider();
            format!("current model: {}:{}", p.name(), p.model_name())
        }
        ["/show", "channel"] => format!("current channel: {current_channel}"),
        ["/list", "models"] => {
            let mut names: Vec<&String> = catalog.keys().collect();
            names.sort();
            if names.is_empty() {
                "no models registered".to_string()
            } else {
                names.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            }
        }
        ["/list", "channels"] => {
            if known_channels.is_empty() {
                "no channels configured".to_string()
            } else {
                known_channels.join(", ")
            }
        }
        ["/switch", "model", "to", name @ ..] if !name.is_empty() => {
            let key = name.join(" ");
            let mut guard = instance.write().await;
            if guard.switch_model(catalog, &key) {
                format!("switched model to {key}")
            } else {
                format!("no model registered for {key}")
            }
        }
        ["/switch", "channel", "to", name @ ..] if !name.is_empty() => {
            // Channel transport binding is owned by the outer message bus
            // adapter; acknowledge the preference only.
            format!("noted preferred channel: {}", name.join(" "))
        }
        _ => USAGE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ember_config::Config;
    use ember_core::InMemoryBus;
    use ember_model::{ChatResponse, CompletionRequest, ProviderError};
    use ember_tools::ToolRegistry;

    use crate::instance::AgentInstanceFactory;

    struct StubProvider(&'static str);

    #[async_trait]
    impl ModelProvider for StubProvider {
        fn name(&self) -> &str {
            self.0
        }
        fn model_name(&self) -> &str {
            self.0
        }
        async fn chat(&self, _req: CompletionRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse::default())
        }
    }

    fn catalog() -> HashMap<String, Arc<dyn ModelProvider>> {
        let mut m: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
        m.insert("openai:gpt-4o".to_string(), Arc::new(StubProvider("primary")));
        m.insert("openai:gpt-4o-mini".to_string(), Arc::new(StubProvider("fallback")));
        m
    }

    fn build() -> RwLock<AgentInstance> {
        let factory = AgentInstanceFactory::new(catalog());
        let dir = tempfile::tempdir().unwrap();
        let instance = factory
            .build(Config::default(), dir.path(), ToolRegistry::new(), Arc::new(InMemoryBus::new(8)))
            .unwrap();
        RwLock::new(instance)
    }

    #[tokio::test]
    async fn show_model_reports_current_primary() {
        let instance = build();
        let out = handle_command("/show model", &instance, &catalog(), &[], "cli").await;
        assert!(out.contains("primary"));
    }

    #[tokio::test]
    async fn show_channel_echoes_current_channel() {
        let instance = build();
        let out = handle_command("/show channel", &instance, &catalog(), &[], "telegram").await;
        assert_eq!(out, "current channel: telegram");
    }

    #[tokio::test]
    async fn list_models_lists_sorted_catalog_keys() {
        let instance = build();
        let out = handle_command("/list models", &instance, &catalog(), &[], "cli").await;
        assert_eq!(out, "openai:gpt-4o, openai:gpt-4o-mini");
    }

    #[tokio::test]
    async fn list_channels_lists_configured_channels() {
        let instance = build();
        let channels = vec!["cli".to_string(), "telegram".to_string()];
        let out = handle_command("/list channels", &instance, &catalog(), &channels, "cli").await;
        assert_eq!(out, "cli, telegram");
    }

    #[tokio::test]
    async fn switch_model_to_known_key_succeeds() {
        let instance = build();
        let out = handle_command("/switch model to openai:gpt-4o-mini", &instance, &catalog(), &[], "cli").await;
        assert_eq!(out, "switched model to openai:gpt-4o-mini");
        assert_eq!(instance.read().await.primary_provider().name(), "fallback");
    }

    #[tokio::test]
    async fn switch_model_to_unknown_key_fails_without_mutating_state() {
        let instance = build();
        let out = handle_command("/switch model to nonexistent:x", &instance, &catalog(), &[], "cli").await;
        assert!(out.starts_with("no model registered"));
        assert_eq!(instance.read().await.primary_provider().name(), "primary");
    }

    #[tokio::test]
    async fn unknown_subcommand_returns_usage() {
        let instance = build();
        let out = handle_command("/frobnicate", &instance, &catalog(), &[], "cli").await;
        assert_eq!(out, USAGE);
    }
}
