// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! LLM iteration loop: the turn orchestrator tying together the rate
//! limiter, history sanitizer (via the context builder), tool executor,
//! duplicate-batch detector, compactor, cancellation, and status emitter.

use std::sync::Arc;

use ember_core::{AgentError, DuplicateDetector, Invocation};
use ember_model::{
    CompletionOptions, CompletionRequest, Message, ModelProvider, ProviderErrorKind, Role, ToolCallRequest,
};
use ember_tools::ToolCall;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::{build_messages, PromptContext};
use crate::instance::AgentInstance;
use crate::status::{tool_status_label, StatusEmitter};

const NO_REPLY_TOKEN: &str = "NO_REPLY";
const INTERRUPTED_PLACEHOLDER: &str = "[response interrupted]";
const SILENT_PLACEHOLDER: &str = "[silent]";
const SUMMARIZATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);
const SAFEGUARD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(90);

/// Parameters for one `run_agent_loop` invocation.
pub struct RunOptions {
    pub session_key: String,
    pub channel: String,
    pub chat_id: String,
    pub user_message: String,
    pub media: Vec<String>,
    pub default_response: String,
    pub enable_summary: bool,
    pub send_response: bool,
    pub no_history: bool,
    pub input_mode: Option<String>,
    pub metadata: std::collections::HashMap<String, String>,
}

impl RunOptions {
    pub fn new(session_key: impl Into<String>, channel: impl Into<String>, chat_id: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            channel: channel.into(),
            chat_id: chat_id.into(),
            user_message: user_message.into(),
            media: Vec::new(),
            default_response: String::new(),
            enable_summary: true,
            send_response: true,
            no_history: false,
            input_mode: None,
            metadata: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub content: String,
    pub interrupted: bool,
}

fn to_tool_call(req: &ToolCallRequest) -> ToolCall {
    ToolCall { id: req.id.clone(), name: req.name.clone(), args: req.arguments.clone() }
}

fn to_tool_definitions(registry: &ember_tools::ToolRegistry) -> Vec<ember_model::ToolDefinition> {
    registry
        .schemas()
        .into_iter()
        .map(|s| ember_model::ToolDefinition { name: s.name, description: s.description, parameters: s.parameters })
        .collect()
}

/// Runs one full turn: up to `max_iterations` think/tool rounds, returning
/// the final reply content (already persisted to the session).
pub async fn run_agent_loop(
    instance: &AgentInstance,
    opts: RunOptions,
    cancel: CancellationToken,
    status: &StatusEmitter,
) -> Result<RunOutcome, AgentError> {
    let cfg = instance.config.agent.clone();
    let store = &instance.session_store;

    if !opts.no_history && cfg.memory_flush_enabled {
        let _ = tokio::time::timeout(SUMMARIZATION_TIMEOUT, instance.memory.maybe_flush(&opts.session_key, &cfg)).await;
    }
    if !opts.no_history && cfg.compaction_mode == ember_config::CompactionMode::Safeguard {
        let _ = tokio::time::timeout(
            SAFEGUARD_TIMEOUT,
            instance.compactor.maybe_safeguard_compact(&opts.session_key, &cfg),
        )
        .await;
    }

    let mut history = if opts.no_history {
        Vec::new()
    } else {
        store.get_history(&opts.session_key).await.map_err(|e| AgentError::Unknown(e.to_string()))?
    };
    let summary = if opts.no_history {
        String::new()
    } else {
        store.get_summary(&opts.session_key).await.map_err(|e| AgentError::Unknown(e.to_string()))?
    };

    let current_turn = if opts.media.is_empty() {
        Message::user(opts.user_message.clone())
    } else {
        Message::user_with_media(opts.user_message.clone(), opts.media.clone())
    };

    let mut prompt_ctx = PromptContext::new("ember", &instance.workspace.display().to_string(), "tokio");
    if !summary.is_empty() {
        prompt_ctx = prompt_ctx.with_previous_summary(summary);
    }
    prompt_ctx = prompt_ctx.with_input_mode(opts.input_mode.as_deref());

    if opts.no_history {
        history.push(current_turn.clone());
    } else {
        store
            .add_full_message(&opts.session_key, current_turn.clone())
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        history.push(current_turn.clone());
    }

    let mut messages = build_messages(&prompt_ctx, &history, None);
    let tool_defs = to_tool_definitions(&instance.tool_registry);

    let mut dup_detector = DuplicateDetector::new(cfg.duplicate_threshold);
    let mut final_content = String::new();
    let mut interrupted = false;
    let mut overflow_notified = false;
    let mut retries = 0u32;

    let providers: Vec<_> = instance.providers().cloned().collect();
    let mut provider_idx = 0usize;

    status.set_status("thinking").await;

    'turn: for _iteration in 1..=cfg.max_iterations {
        if cancel.is_cancelled() {
            interrupted = true;
            break;
        }
        if let Err(limited) = instance.rate_limiter.check_request() {
            warn!(session_key = %opts.session_key, ?limited, "request rate limited");
            final_content = "I'm being rate limited right now — please try again in a moment.".to_string();
            break;
        }

        let active_provider = &providers[provider_idx];
        let req = CompletionRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            model: active_provider.model_name().to_string(),
            options: CompletionOptions { max_tokens: cfg.reserve_tokens, temperature: cfg.temperature },
        };

        let chat_result = tokio::select! {
            _ = cancel.cancelled() => {
                interrupted = true;
                break 'turn;
            }
            result = active_provider.chat(req) => result,
        };

        let response = match chat_result {
            Ok(r) => r,
            Err(err) => {
                let kind = err.effective_kind();
                if kind == ProviderErrorKind::Cancelled || cancel.is_cancelled() {
                    interrupted = true;
                    break 'turn;
                }
                if kind == ProviderErrorKind::ContextOverflow {
                    if retries >= cfg.retry_limit {
                        return Err(AgentError::ContextOverflow);
                    }
                    if !overflow_notified {
                        instance
                            .bus
                            .publish(ember_core::OutboundMessage::warning(
                                &opts.channel,
                                &opts.chat_id,
                                "Compressing context and retrying…",
                            ))
                            .await;
                        overflow_notified = true;
                    }
                    let outcome = crate::compact::force_compress(&messages);
                    ember_core::cleanup_media_for_messages(&outcome.dropped).await;
                    if outcome.messages.len() > 1 {
                        let refreshed_history = outcome.messages[1..].to_vec();
                        let _ = store.set_history(&opts.session_key, refreshed_history).await;
                    }
                    messages = outcome.messages;
                    retries += 1;
                    continue 'turn;
                }
                if provider_idx + 1 < providers.len() {
                    let next = &providers[provider_idx + 1];
                    warn!(
                        session_key = %opts.session_key,
                        from = active_provider.name(),
                        to = next.name(),
                        ?kind,
                        "provider call failed, switching to fallback"
                    );
                    instance
                        .bus
                        .publish(ember_core::OutboundMessage::warning(
                            &opts.channel,
                            &opts.chat_id,
                            format!("{} is unavailable, retrying with {}…", active_provider.name(), next.name()),
                        ))
                        .await;
                    provider_idx += 1;
                    continue 'turn;
                }
                return Err(AgentError::from_provider_kind(kind, err.message));
            }
        };

        if response.content.trim() == NO_REPLY_TOKEN {
            let placeholder = Message::assistant(SILENT_PLACEHOLDER);
            let _ = store.add_full_message(&opts.session_key, placeholder).await;
            let _ = store.save(&opts.session_key).await;
            return Ok(RunOutcome { content: String::new(), interrupted: false });
        }

        if !response.has_tool_calls() {
            final_content = response.content;
            break;
        }

        if dup_detector.observe(&response.tool_calls) {
            final_content = dup_detector.abort_message().to_string();
            break;
        }

        let assistant_msg = Message::assistant_with_tool_calls(response.content.clone(), response.tool_calls.clone());
        store
            .add_full_message(&opts.session_key, assistant_msg.clone())
            .await
            .map_err(|e| AgentError::Unknown(e.to_string()))?;
        messages.push(assistant_msg);

        let tool_names: Vec<String> = response.tool_calls.iter().map(|t| t.name.clone()).collect();
        let run_parallel = instance.tool_registry.all_read_only_parallel(&tool_names);

        let tool_messages = run_tool_batch(instance, &opts, &response.tool_calls, run_parallel, status).await;
        for msg in tool_messages {
            store
                .add_full_message(&opts.session_key, msg.clone())
                .await
                .map_err(|e| AgentError::Unknown(e.to_string()))?;
            messages.push(msg);
        }

        if cancel.is_cancelled() {
            interrupted = true;
            break;
        }
        status.set_status("thinking").await;
    }

    if interrupted {
        let placeholder = Message::assistant(INTERRUPTED_PLACEHOLDER);
        let _ = store.add_full_message(&opts.session_key, placeholder).await;
        let _ = store.save(&opts.session_key).await;
        return Ok(RunOutcome { content: String::new(), interrupted: true });
    }

    if final_content.is_empty() {
        final_content = opts.default_response.clone();
    }

    if !final_content.is_empty() {
        let _ = store.add_full_message(&opts.session_key, Message::assistant(final_content.clone())).await;
    }
    let _ = store.save(&opts.session_key).await;

    if opts.enable_summary && cfg.compaction_mode == ember_config::CompactionMode::Legacy {
        let compactor = instance.compactor.clone();
        let session_key = opts.session_key.clone();
        let cfg2 = cfg.clone();
        tokio::spawn(async move {
            let _ = tokio::time::timeout(SUMMARIZATION_TIMEOUT, compactor.maybe_soft_summarize(&session_key, &cfg2)).await;
        });
    }

    if opts.send_response && !final_content.is_empty() {
        instance
            .bus
            .publish(ember_core::OutboundMessage::reply(&opts.channel, &opts.chat_id, final_content.clone()))
            .await;
    }

    info!(session_key = %opts.session_key, "turn complete");
    Ok(RunOutcome { content: final_content, interrupted: false })
}

/// Executes one tool-call batch, honoring the all-or-nothing read-only
/// parallel policy. Returns the resulting `tool` messages in the original
/// call order regardless of execution order.
async fn run_tool_batch(
    instance: &AgentInstance,
    opts: &RunOptions,
    calls: &[ToolCallRequest],
    run_parallel: bool,
    status: &StatusEmitter,
) -> Vec<Message> {
    let invocation = || Invocation { channel: &opts.channel, chat_id: &opts.chat_id, send_response: opts.send_response };

    if run_parallel {
        status.set_status(format!("running {} tools...", calls.len())).await;
        let calls_futures = calls.iter().map(|req| {
            let call = to_tool_call(req);
            let inv = invocation();
            async move { instance.tool_executor.execute(&inv, &call).await }
        });
        futures::future::join_all(calls_futures).await
    } else {
        let mut out = Vec::with_capacity(calls.len());
        for req in calls {
            let call = to_tool_call(req);
            status.set_status(tool_status_label(&call)).await;
            let inv = invocation();
            out.push(instance.tool_executor.execute(&inv, &call).await);
        }
        out
    }
}

/// Whether a message is the assistant's interruption placeholder, used by
/// tests and by the sanitizer-adjacent invariants to detect a cancelled turn.
pub fn is_interrupted_placeholder(message: &Message) -> bool {
    message.role == Role::Assistant && message.content == INTERRUPTED_PLACEHOLDER
}
