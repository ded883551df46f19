// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use crate::tool::{Tool, ToolCall, ToolContext, ToolResult};

/// JSON-schema-shaped tool description handed to the provider driver.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Append-only tool registry, built once at `AgentInstance` construction.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Register an already-shared tool, e.g. one carried over unfiltered from
    /// another registry (sandbox-aware tool-set filtering).
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Whether every tool named in this batch declares `read_only_parallel`
    /// — a single hold-out forces the whole batch sequential.
    pub fn all_read_only_parallel(&self, names: &[String]) -> bool {
        names.iter().all(|n| {
            self.get(n)
                .map(|t| t.parallel_policy() == crate::tool::ParallelPolicy::ReadOnlyParallel)
                .unwrap_or(false)
        })
    }

    /// Invoke a tool by name, returning a `tool <name> not found` error result
    /// when absent rather than an error return.
    pub async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolResult {
        match self.get(&call.name) {
            Some(tool) => {
                tool.set_context(ctx);
                tool.execute(ctx, call).await
            }
            None => ToolResult::err(format!("tool {} not found", call.name)),
        }
    }
}
