// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context compactor: soft summarization, emergency force compression, and
//! steady-state safeguard splitting, all pivoting around the "never split a
//! tool_calls group" invariant.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ember_config::AgentConfig;
use ember_core::{AgentError, SessionStore};
use ember_model::{ChatResponse, CompletionOptions, CompletionRequest, Message, ModelProvider, Role};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SOFT_TAIL_LEN: usize = 4;
const MULTI_PART_THRESHOLD: usize = 10;

/// Summarization timeout, applied per provider call inside soft
/// summarization (including each half of a multi-part merge).
const SUMMARIZE_TIMEOUT: Duration = Duration::from_secs(120);
/// Safeguard compaction timeout, applied per provider call inside the
/// structured-checkpoint chunk loop.
const SAFEGUARD_TIMEOUT: Duration = Duration::from_secs(90);

const SUMMARIZE_PROMPT: &str = "\
Summarize the conversation below in a concise, information-dense way. \
Preserve technical details, decisions, file names, and tool outputs that may \
matter to future turns. The summary replaces the original history.";

const MERGE_PROMPT: &str = "\
Merge the following partial summaries of one conversation into a single \
concise summary, preserving every technical detail from each part.";

const STRUCTURED_PROMPT: &str = "\
Produce a structured state checkpoint from the conversation excerpt below. \
Use EXACTLY these Markdown headings, in this order, and do not add others:

## Intent
## Decisions
## Tool Results
## Pending Actions
## Constraints

Fold in the prior checkpoint (given first, if any) rather than discarding it; \
preserve file paths, identifiers, and decisions verbatim where they matter.";

const SAFEGUARD_REMINDER: &str =
    "[Post-compaction refresh: re-check bootstrap and memory before continuing.]";

fn total_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.approx_tokens()).sum()
}

/// Walk backward from the end of a tool-group boundary, stopping at the first
/// index `i` such that cutting `history[..i]` / `history[i..]` never splits a
/// `tool_calls` assistant from its tool responses. `start` is where the
/// unconstrained walk landed; this only ever moves `start` further back.
fn snap_to_group_boundary(history: &[Message], start: usize) -> usize {
    let mut i = start;
    while i > 0 {
        // If history[i] is a tool response, its pairing assistant lives at or
        // before i - keep walking back until we're past the whole group.
        if history[i].role == Role::Tool {
            i -= 1;
            continue;
        }
        // If history[i - 1] is a tool-call assistant, cutting at i would
        // separate it from its answers - step back over it too.
        if i > 0 && history[i - 1].is_tool_call_assistant() {
            i -= 1;
            continue;
        }
        break;
    }
    i
}

/// Result of one `force_compress` call.
pub struct ForceCompressOutcome {
    /// The rebuilt provider message list: `[system, note, conversation.., trigger]`.
    pub messages: Vec<Message>,
    /// The messages dropped from the middle, for media cleanup.
    pub dropped: Vec<Message>,
}

/// Emergency mid-turn drop triggered by a context-overflow provider error.
/// Pure and deterministic: no provider call, never fails.
pub fn force_compress(messages: &[Message]) -> ForceCompressOutcome {
    if messages.len() < 3 {
        return ForceCompressOutcome {
            messages: messages.to_vec(),
            dropped: Vec::new(),
        };
    }
    let system = messages[0].clone();
    let trigger = messages[messages.len() - 1].clone();
    let conversation = &messages[1..messages.len() - 1];
    if conversation.is_empty() {
        return ForceCompressOutcome {
            messages: messages.to_vec(),
            dropped: Vec::new(),
        };
    }

    let mut mid = conversation.len() / 2;
    if conversation[mid].role == Role::Tool {
        while mid < conversation.len() && conversation[mid].role == Role::Tool {
            mid += 1;
        }
    } else if conversation[mid].is_tool_call_assistant() {
        mid += 1;
        while mid < conversation.len() && conversation[mid].role == Role::Tool {
            mid += 1;
        }
    }
    // Upper-bounded only by the full conversation length: if the tool group
    // spans to the end, dropping everything is safer than splitting it.
    let mid = mid.max(1).min(conversation.len());

    let dropped = conversation[..mid].to_vec();
    let note = Message::user(format!(
        "Emergency compression dropped {} oldest messages due to context limit",
        dropped.len()
    ));

    let mut rebuilt = Vec::with_capacity(conversation.len() - mid + 3);
    rebuilt.push(system);
    rebuilt.push(note);
    rebuilt.extend_from_slice(&conversation[mid..]);
    rebuilt.push(trigger);

    ForceCompressOutcome {
        messages: rebuilt,
        dropped,
    }
}

/// Choose the `keep_start` pivot for safeguard mode: walk backward from the
/// tail accumulating tokens until `keep_recent_tokens` is reached, then snap
/// outward so the split never separates a tool_calls assistant from its
/// tool responses.
pub fn safeguard_pivot(history: &[Message], keep_recent_tokens: u32) -> usize {
    if history.is_empty() {
        return 0;
    }
    let mut acc: u64 = 0;
    let mut idx = history.len();
    for (i, msg) in history.iter().enumerate().rev() {
        if acc >= keep_recent_tokens as u64 {
            idx = i + 1;
            break;
        }
        acc += msg.approx_tokens() as u64;
        idx = i;
    }
    snap_to_group_boundary(history, idx)
}

struct ChatRequestBuilder;

impl ChatRequestBuilder {
    fn prompt(system: &str, body: impl Into<String>) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::system(system), Message::user(body.into())],
            tools: Vec::new(),
            model: String::new(),
            options: CompletionOptions {
                max_tokens: 2048,
                temperature: 0.25,
            },
        }
    }
}

fn serialize_excerpt(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("[{:?}] {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Summarizes and splits history to keep the loop under the context budget.
/// Owns the per-session "summarization in progress" flag so overlapping
/// turns on the same session never run two summarizations concurrently.
pub struct Compactor {
    provider: Arc<dyn ModelProvider>,
    store: Arc<dyn SessionStore>,
    summarizing: Mutex<HashSet<String>>,
}

impl Compactor {
    pub fn new(provider: Arc<dyn ModelProvider>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            provider,
            store,
            summarizing: Mutex::new(HashSet::new()),
        }
    }

    async fn chat(&self, req: CompletionRequest, budget: Duration) -> Result<ChatResponse, AgentError> {
        match tokio::time::timeout(budget, self.provider.chat(req)).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(AgentError::from_provider_kind(e.effective_kind(), e.message)),
            Err(_) => Err(AgentError::Timeout(format!("compaction provider call exceeded {}s", budget.as_secs()))),
        }
    }

    /// Soft summarization: runs after a successful turn when history is
    /// large by message count or token estimate. Skips entirely if another
    /// summarization for this session is already in flight.
    pub async fn maybe_soft_summarize(
        &self,
        session_key: &str,
        cfg: &AgentConfig,
    ) -> Result<(), AgentError> {
        {
            let mut guard = self.summarizing.lock().await;
            if !guard.insert(session_key.to_string()) {
                debug!(session_key, "soft summarization already in progress, skipping");
                return Ok(());
            }
        }
        let result = self.run_soft_summarize(session_key, cfg).await;
        self.summarizing.lock().await.remove(session_key);
        result
    }

    async fn run_soft_summarize(
        &self,
        session_key: &str,
        cfg: &AgentConfig,
    ) -> Result<(), AgentError> {
        let history = self
            .store
            .get_history(session_key)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;

        let tokens = total_tokens(&history);
        let triggered =
            history.len() > cfg.soft_msg_threshold || tokens as f64 > 0.75 * cfg.max_tokens as f64;
        if !triggered {
            return Ok(());
        }

        let tail_start = history.len().saturating_sub(SOFT_TAIL_LEN);
        let (body, tail) = history.split_at(tail_start);

        let oversized_limit = (cfg.max_tokens / 2) as usize;
        let mut omitted_oversized = 0usize;
        let filtered: Vec<Message> = body
            .iter()
            .filter(|m| {
                if m.approx_tokens() > oversized_limit {
                    omitted_oversized += 1;
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect();
        if omitted_oversized > 0 {
            info!(session_key, omitted_oversized, "some oversized messages omitted from summary");
        }
        if filtered.is_empty() {
            return Ok(());
        }

        let summary_text = if filtered.len() > MULTI_PART_THRESHOLD {
            let half = filtered.len() / 2;
            let (a, b) = filtered.split_at(half);
            let part_a = self.summarize_once(a).await?;
            let part_b = self.summarize_once(b).await?;
            let merge_req = ChatRequestBuilder::prompt(
                MERGE_PROMPT,
                format!("Part 1:\n{part_a}\n\nPart 2:\n{part_b}"),
            );
            self.chat(merge_req, SUMMARIZE_TIMEOUT).await?.content
        } else {
            self.summarize_once(&filtered).await?
        };

        self.store
            .set_summary(session_key, summary_text)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        self.store
            .set_history(session_key, tail.to_vec())
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        self.store
            .save(session_key)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        Ok(())
    }

    async fn summarize_once(&self, messages: &[Message]) -> Result<String, AgentError> {
        let req = ChatRequestBuilder::prompt(SUMMARIZE_PROMPT, serialize_excerpt(messages));
        Ok(self.chat(req, SUMMARIZE_TIMEOUT).await?.content)
    }

    /// Safeguard mode: steady-state pre-call compaction. No-op unless
    /// `compaction_mode == Safeguard` and the history exceeds the budget.
    pub async fn maybe_safeguard_compact(
        &self,
        session_key: &str,
        cfg: &AgentConfig,
    ) -> Result<(), AgentError> {
        if cfg.compaction_mode != ember_config::CompactionMode::Safeguard {
            return Ok(());
        }
        let history = self
            .store
            .get_history(session_key)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        let budget = cfg.history_budget();
        if total_tokens(&history) as u32 <= budget {
            return Ok(());
        }

        let keep_start = safeguard_pivot(&history, cfg.keep_recent_floor());
        let keep_start = keep_start.clamp(0, history.len());
        let (to_summarize, kept) = history.split_at(keep_start);
        if to_summarize.is_empty() {
            return Ok(());
        }

        let existing_summary = self
            .store
            .get_summary(session_key)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;

        let chunk_budget = ((0.35 * cfg.max_tokens as f64) - 1024.0).max(256.0) as usize;
        let mut running_summary = existing_summary;
        let mut chunk_start = 0usize;
        while chunk_start < to_summarize.len() {
            let mut chunk_end = chunk_start;
            let mut acc = 0usize;
            while chunk_end < to_summarize.len() {
                let next = to_summarize[chunk_end].approx_tokens();
                if acc > 0 && acc + next > chunk_budget {
                    break;
                }
                acc += next;
                chunk_end += 1;
            }
            let chunk_end = chunk_end.max(chunk_start + 1);
            let chunk = &to_summarize[chunk_start..chunk_end];

            let body = if running_summary.is_empty() {
                serialize_excerpt(chunk)
            } else {
                format!(
                    "Prior checkpoint:\n{running_summary}\n\nNew excerpt:\n{}",
                    serialize_excerpt(chunk)
                )
            };
            let req = ChatRequestBuilder::prompt(STRUCTURED_PROMPT, body);
            running_summary = self.chat(req, SAFEGUARD_TIMEOUT).await?.content;
            chunk_start = chunk_end;
        }

        running_summary.push_str("\n\n");
        running_summary.push_str(SAFEGUARD_REMINDER);

        self.store
            .set_summary(session_key, running_summary)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        self.store
            .set_history(session_key, kept.to_vec())
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        self.store
            .increment_compaction_count(session_key)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        self.store
            .save(session_key)
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        warn!(session_key, dropped = to_summarize.len(), "safeguard compaction ran");
        Ok(())
    }
}
