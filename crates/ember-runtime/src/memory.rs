// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Optional memory flush: distills durable facts into
//! `<workspace>/memory/MEMORY.md`, run at most once per compaction_count.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ember_config::AgentConfig;
use ember_core::{AgentError, SessionStore};
use ember_model::{ChatResponse, CompletionOptions, CompletionRequest, Message, ModelProvider, Role};

const HEADINGS: [&str; 6] = [
    "Profile",
    "Long-term Facts",
    "Active Goals",
    "Constraints",
    "Open Threads",
    "Deprecated/Resolved",
];

const FLUSH_PROMPT: &str = "\
Extract durable memory worth keeping across sessions from the conversation \
excerpt below. Respond with Markdown bullets grouped under EXACTLY these \
headings, omitting a heading entirely if it has nothing to add:

## Profile
## Long-term Facts
## Active Goals
## Constraints
## Open Threads
## Deprecated/Resolved";

/// Parses a `## Heading` / `- bullet` Markdown document into heading -> bullets.
fn parse_sections(text: &str) -> BTreeMap<String, Vec<String>> {
    let mut sections: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("## ") {
            current = Some(heading.trim().to_string());
            sections.entry(current.clone().unwrap()).or_default();
        } else if let Some(bullet) = trimmed.strip_prefix("- ") {
            if let Some(h) = &current {
                sections.entry(h.clone()).or_default().push(bullet.trim().to_string());
            }
        }
    }
    sections
}

/// Merge `incoming` bullets into `existing`, deduping case-insensitively per
/// heading and sorting alphabetically, then render back to Markdown in the
/// fixed heading order (extra headings the model invented are appended after).
fn merge_and_render(existing: &BTreeMap<String, Vec<String>>, incoming: &BTreeMap<String, Vec<String>>) -> String {
    let mut merged: BTreeMap<String, Vec<String>> = existing.clone();
    for (heading, bullets) in incoming {
        let entry = merged.entry(heading.clone()).or_default();
        for b in bullets {
            entry.push(b.clone());
        }
    }
    for bullets in merged.values_mut() {
        let mut seen = std::collections::HashSet::new();
        bullets.retain(|b| seen.insert(b.to_lowercase()));
        bullets.sort();
    }

    let mut out = String::from("# Memory\n");
    for heading in HEADINGS {
        if let Some(bullets) = merged.get(heading) {
            if bullets.is_empty() {
                continue;
            }
            out.push_str(&format!("\n## {heading}\n"));
            for b in bullets {
                out.push_str(&format!("- {b}\n"));
            }
        }
    }
    for (heading, bullets) in &merged {
        if HEADINGS.contains(&heading.as_str()) || bullets.is_empty() {
            continue;
        }
        out.push_str(&format!("\n## {heading}\n"));
        for b in bullets {
            out.push_str(&format!("- {b}\n"));
        }
    }
    out
}

fn recent_excerpt(history: &[Message], max: usize) -> String {
    history
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant) && !m.content.trim().is_empty())
        .rev()
        .take(max)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|m| format!("[{:?}] {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct MemoryFlusher {
    provider: Arc<dyn ModelProvider>,
    store: Arc<dyn SessionStore>,
    memory_path: PathBuf,
}

impl MemoryFlusher {
    pub fn new(provider: Arc<dyn ModelProvider>, store: Arc<dyn SessionStore>, workspace: &Path) -> Self {
        Self {
            provider,
            store,
            memory_path: workspace.join("memory").join("MEMORY.md"),
        }
    }

    /// No-op unless memory flush is enabled and at least one compaction has
    /// happened since the last flush. Idempotent against `compaction_count`:
    /// calling this twice at the same count is a no-op the second time.
    pub async fn maybe_flush(&self, session_key: &str, cfg: &AgentConfig) -> Result<(), AgentError> {
        if !cfg.memory_flush_enabled {
            return Ok(());
        }
        let (count, flush_at) = self
            .store
            .get_compaction_state(session_key)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        if count <= flush_at {
            return Ok(());
        }

        let history = self
            .store
            .get_history(session_key)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        let excerpt = recent_excerpt(&history, 12);
        if excerpt.is_empty() {
            self.store
                .mark_memory_flush(session_key)
                .await
                .map_err(|e| AgentError::Unknown(e.to_string()))?;
            return Ok(());
        }

        let req = CompletionRequest {
            messages: vec![Message::system(FLUSH_PROMPT), Message::user(excerpt)],
            tools: Vec::new(),
            model: String::new(),
            options: CompletionOptions { max_tokens: 1024, temperature: 0.2 },
        };
        let response: ChatResponse = self
            .provider
            .chat(req)
            .await
            .map_err(|e| AgentError::from_provider_kind(e.effective_kind(), e.message))?;

        let existing_text = tokio::fs::read_to_string(&self.memory_path).await.unwrap_or_default();
        let existing = parse_sections(&existing_text);
        let incoming = parse_sections(&response.content);
        let rendered = merge_and_render(&existing, &incoming);

        if let Some(parent) = self.memory_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::Unknown(e.to_string()))?;
        }
        tokio::fs::write(&self.memory_path, rendered)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;

        self.store
            .mark_memory_flush(session_key)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        Ok(())
    }
}
