// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Inbound dispatcher: consumes one inbound message, serializes it against
//! any in-flight processing for the same session via the cancellation
//! registry, and routes it to a command handler or the iteration loop.

use std::collections::HashMap;
use std::sync::Arc;

use ember_core::{is_internal_channel, AgentError, OutboundBus, OutboundMessage};
use ember_model::ModelProvider;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::agent_loop::{run_agent_loop, RunOptions};
use crate::cancel::CancellationRegistry;
use crate::commands::handle_command;
use crate::instance::AgentInstance;
use crate::status::StatusEmitter;

/// One inbound message as consumed from a channel adapter.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    pub session_key: Option<String>,
    pub media: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    /// `msg.session_key` when present, otherwise `<channel>:<chat_id>`.
    pub fn resolve_session_key(&self) -> String {
        self.session_key
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.channel, self.chat_id))
    }
}

/// Routes inbound messages to either the command handler or the iteration
/// loop, owning the single [`AgentInstance`] this process serves and the
/// per-session cancellation table.
pub struct Dispatcher {
    instance: Arc<RwLock<AgentInstance>>,
    registry: Arc<CancellationRegistry>,
    provider_catalog: HashMap<String, Arc<dyn ModelProvider>>,
    known_channels: Vec<String>,
}

impl Dispatcher {
    pub fn new(
        instance: AgentInstance,
        provider_catalog: HashMap<String, Arc<dyn ModelProvider>>,
        known_channels: Vec<String>,
    ) -> Self {
        Self {
            instance: Arc::new(RwLock::new(instance)),
            registry: Arc::new(CancellationRegistry::new()),
            provider_catalog,
            known_channels,
        }
    }

    /// Begins processing `msg` on a spawned task and returns immediately;
    /// the task owns the full begin/process/publish/end lifecycle.
    pub fn dispatch(self: &Arc<Self>, msg: InboundMessage) {
        let this = self.clone();
        tokio::spawn(async move {
            this.process_one(msg).await;
        });
    }

    /// Processes one inbound message to completion. Exposed directly (in
    /// addition to `dispatch`) so callers that already run on their own task
    /// can await the result without a further spawn.
    pub async fn process_one(&self, msg: InboundMessage) {
        let session_key = msg.resolve_session_key();
        let handle = self.registry.begin(&session_key).await;
        let id = handle.id();
        let token = handle.token.clone();

        let bus = { self.instance.read().await.bus.clone() };
        let status = StatusEmitter::start(bus.clone(), msg.channel.clone(), msg.chat_id.clone());

        let outcome = self.process_message(&msg, token, &status).await;

        match outcome {
            Ok(content) => {
                if !content.is_empty() {
                    bus.publish(OutboundMessage::reply(&msg.channel, &msg.chat_id, content)).await;
                }
                status.finish(None).await;
            }
            Err(err) => {
                let text = err.user_message();
                if !text.is_empty() && !is_internal_channel(&msg.channel) {
                    bus.publish(OutboundMessage::reply(&msg.channel, &msg.chat_id, text.clone())).await;
                }
                error!(session_key = %session_key, ?err, "turn failed");
                status.finish(Some(&text)).await;
            }
        }

        handle.finish();
        self.registry.end(&session_key, id).await;
        info!(session_key = %session_key, "dispatch complete");
    }

    async fn process_message(
        &self,
        msg: &InboundMessage,
        cancel: CancellationToken,
        status: &StatusEmitter,
    ) -> Result<String, AgentError> {
        if msg.content.trim_start().starts_with('/') {
            let out = handle_command(
                msg.content.trim(),
                &self.instance,
                &self.provider_catalog,
                &self.known_channels,
                &msg.channel,
            )
            .await;
            return Ok(out);
        }

        let guard = self.instance.read().await;
        let mut opts = RunOptions::new(msg.resolve_session_key(), msg.channel.clone(), msg.chat_id.clone(), msg.content.clone());
        opts.media = msg.media.clone();
        opts.input_mode = msg.metadata.get("input_mode").cloned();
        opts.metadata = msg.metadata.clone();
        let outcome = run_agent_loop(&guard, opts, cancel, status).await?;
        Ok(outcome.content)
    }
}
