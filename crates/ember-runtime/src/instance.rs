// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Config-derived agent instance factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ember_config::Config;
use ember_core::{sessions_dir, FsSessionStore, OutboundBus, SessionStore, ToolExecutor};
use ember_model::ModelProvider;
use ember_tools::{RateLimiter, Tool, ToolRegistry};

use crate::compact::Compactor;
use crate::memory::MemoryFlusher;

/// Tool name substrings omitted from the registry when
/// `tools.restrict_to_workspace` is set (sandboxed, read-only operation).
const WRITE_LIKE_TOOLS: [&str; 4] = ["write", "edit", "append", "delete"];

fn provider_key(provider: &str, name: &str) -> String {
    format!("{provider}:{name}")
}

/// One configured agent: its own session store, tool registry, workspace,
/// model (with ordered fallbacks), and resolved compaction parameters.
/// Lifetime = process lifetime; mutated only via explicit model-switch ops.
pub struct AgentInstance {
    pub workspace: PathBuf,
    pub config: Config,
    pub session_store: Arc<dyn SessionStore>,
    pub tool_registry: ToolRegistry,
    pub rate_limiter: Arc<RateLimiter>,
    pub tool_executor: Arc<ToolExecutor>,
    pub compactor: Arc<Compactor>,
    pub memory: Arc<MemoryFlusher>,
    pub bus: Arc<dyn OutboundBus>,
    primary: Arc<dyn ModelProvider>,
    fallbacks: Vec<Arc<dyn ModelProvider>>,
}

impl AgentInstance {
    /// Providers tried in order for one `chat()` call: the configured
    /// primary, then each configured fallback.
    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn ModelProvider>> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    pub fn primary_provider(&self) -> &Arc<dyn ModelProvider> {
        &self.primary
    }

    /// Switch the primary model to a previously-registered provider, by
    /// `<provider>:<name>` key, for the `/switch model to <name>` command.
    pub fn switch_model(&mut self, catalog: &HashMap<String, Arc<dyn ModelProvider>>, key: &str) -> bool {
        match catalog.get(key) {
            Some(p) => {
                self.primary = p.clone();
                true
            }
            None => false,
        }
    }
}

/// Builds [`AgentInstance`]s from layered configuration plus a catalog of
/// already-constructed model providers — this factory only resolves
/// *which* provider to use, not how it talks to its backend.
pub struct AgentInstanceFactory {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl AgentInstanceFactory {
    pub fn new(providers: HashMap<String, Arc<dyn ModelProvider>>) -> Self {
        Self { providers }
    }

    fn resolve(&self, provider: &str, name: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(&provider_key(provider, name)).cloned()
    }

    /// `tools` is the full unfiltered registry for this agent; sandbox
    /// filtering (when configured) happens here, not at the call site.
    pub fn build(
        &self,
        config: Config,
        workspace: impl Into<PathBuf>,
        tools: ToolRegistry,
        bus: Arc<dyn OutboundBus>,
    ) -> Result<AgentInstance, String> {
        let workspace = workspace.into();
        let primary = self
            .resolve(&config.model.provider, &config.model.name)
            .ok_or_else(|| format!("no provider registered for {}:{}", config.model.provider, config.model.name))?;

        let mut fallbacks = Vec::new();
        for fb in &config.model.fallbacks {
            if let Some(p) = self.resolve(&fb.provider, &fb.name) {
                fallbacks.push(p);
            }
        }

        let tool_registry = filter_for_sandbox(tools, config.tools.restrict_to_workspace);

        let session_store: Arc<dyn SessionStore> = Arc::new(FsSessionStore::new(sessions_dir(&workspace)));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.tools.max_requests_per_minute,
            config.tools.max_tool_calls_per_minute,
        ));
        let compactor = Arc::new(Compactor::new(primary.clone(), session_store.clone()));
        let memory = Arc::new(MemoryFlusher::new(primary.clone(), session_store.clone(), &workspace));
        let tool_executor = Arc::new(ToolExecutor::new(
            tool_registry.clone(),
            rate_limiter.clone(),
            media_dir(&workspace),
            bus.clone(),
        ));

        Ok(AgentInstance {
            workspace,
            config,
            session_store,
            tool_registry,
            rate_limiter,
            tool_executor,
            compactor,
            memory,
            bus,
            primary,
            fallbacks,
        })
    }
}

fn filter_for_sandbox(registry: ToolRegistry, restrict: bool) -> ToolRegistry {
    if !restrict {
        return registry;
    }
    let mut filtered = ToolRegistry::new();
    for name in registry.names() {
        if WRITE_LIKE_TOOLS.iter().any(|w| name.contains(w)) {
            continue;
        }
        if let Some(tool) = registry.get(&name) {
            filtered.register_shared(tool);
        }
    }
    filtered
}

pub fn media_dir(workspace: &Path) -> PathBuf {
    workspace.join("media")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ember_core::InMemoryBus;
    use ember_model::{ChatResponse, CompletionRequest, ProviderError};
    use ember_tools::{ParallelPolicy, ToolCall, ToolContext, ToolResult};

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

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        fn parallel_policy(&self) -> ParallelPolicy {
            ParallelPolicy::ReadOnlyParallel
        }
        async fn execute(&self, _ctx: &ToolContext, _call: &ToolCall) -> ToolResult {
            ToolResult::ok("ok")
        }
    }

    fn providers() -> HashMap<String, Arc<dyn ModelProvider>> {
        let mut m: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
        m.insert("openai:gpt-4o".to_string(), Arc::new(StubProvider("primary")));
        m.insert("openai:gpt-4o-mini".to_string(), Arc::new(StubProvider("fallback")));
        m
    }

    #[test]
    fn build_resolves_primary_and_fallbacks() {
        let factory = AgentInstanceFactory::new(providers());
        let mut cfg = Config::default();
        cfg.model.fallbacks.push(ember_config::ModelFallback {
            provider: "openai".into(),
            name: "gpt-4o-mini".into(),
        });
        let dir = tempfile::tempdir().unwrap();
        let mut tools = ToolRegistry::new();
        tools.register(NamedTool("read_file"));
        let instance = factory
            .build(cfg, dir.path(), tools, Arc::new(InMemoryBus::new(8)))
            .unwrap();
        assert_eq!(instance.providers().count(), 2);
    }

    #[test]
    fn build_fails_for_unregistered_provider() {
        let factory = AgentInstanceFactory::new(HashMap::new());
        let dir = tempfile::tempdir().unwrap();
        let result = factory.build(Config::default(), dir.path(), ToolRegistry::new(), Arc::new(InMemoryBus::new(8)));
        assert!(result.is_err());
    }

    #[test]
    fn sandbox_restriction_omits_write_like_tools() {
        let factory = AgentInstanceFactory::new(providers());
        let mut cfg = Config::default();
        cfg.tools.restrict_to_workspace = true;
        let dir = tempfile::tempdir().unwrap();
        let mut tools = ToolRegistry::new();
        tools.register(NamedTool("read_file"));
        tools.register(NamedTool("write"));
        tools.register(NamedTool("edit_file"));
        let instance = factory
            .build(cfg, dir.path(), tools, Arc::new(InMemoryBus::new(8)))
            .unwrap();
        let names = instance.tool_registry.names();
        assert!(names.contains(&"read_file".to_string()));
        assert!(!names.contains(&"write".to_string()));
        assert!(!names.contains(&"edit_file".to_string()));
    }

    #[test]
    fn unrestricted_sandbox_keeps_every_tool() {
        let factory = AgentInstanceFactory::new(providers());
        let dir = tempfile::tempdir().unwrap();
        let mut tools = ToolRegistry::new();
        tools.register(NamedTool("write"));
        let instance = factory
            .build(Config::default(), dir.path(), tools, Arc::new(InMemoryBus::new(8)))
            .unwrap();
        assert!(instance.tool_registry.names().contains(&"write".to_string()));
    }

    #[test]
    fn switch_model_swaps_primary_on_known_key() {
        let factory = AgentInstanceFactory::new(providers());
        let dir = tempfile::tempdir().unwrap();
        let mut instance = factory
            .build(Config::default(), dir.path(), ToolRegistry::new(), Arc::new(InMemoryBus::new(8)))
            .unwrap();
        assert!(instance.switch_model(&providers(), "openai:gpt-4o-mini"));
        assert_eq!(instance.primary_provider().name(), "fallback");
        assert!(!instance.switch_model(&providers(), "nonexistent:model"));
    }
}
