// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Outbound message bus interface.
//!
//! `InMemoryBus` is a minimal broadcast-backed implementation used by tests
//! and simple embeddings; production deployments are expected to supply
//! their own.

use async_trait::async_trait;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundKind {
    Reply,
    Status,
    StatusEnd,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub kind: OutboundKind,
}

impl OutboundMessage {
    pub fn reply(channel: impl Into<String>, chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { channel: channel.into(), chat_id: chat_id.into(), content: content.into(), kind: OutboundKind::Reply }
    }

    pub fn status(channel: impl Into<String>, chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { channel: channel.into(), chat_id: chat_id.into(), content: content.into(), kind: OutboundKind::Status }
    }

    pub fn status_end(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self { channel: channel.into(), chat_id: chat_id.into(), content: String::new(), kind: OutboundKind::StatusEnd }
    }

    pub fn warning(channel: impl Into<String>, chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { channel: channel.into(), chat_id: chat_id.into(), content: content.into(), kind: OutboundKind::Warning }
    }

    pub fn error(channel: impl Into<String>, chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { channel: channel.into(), chat_id: chat_id.into(), content: content.into(), kind: OutboundKind::Error }
    }
}

/// Channels named "system", "cli", or "subagent" are internal and suppress
/// user-facing status lifecycle per C8.
pub fn is_internal_channel(channel: &str) -> bool {
    matches!(channel, "system" | "cli" | "subagent")
}

#[async_trait]
pub trait OutboundBus: Send + Sync {
    /// Fire-and-forget publish; bus failures are not propagated to callers.
    async fn publish(&self, message: OutboundMessage);
}

/// Minimal broadcast-channel backed bus. Publishes are best-effort: a lagged
/// or absent subscriber never blocks or errors the publisher.
pub struct InMemoryBus {
    tx: broadcast::Sender<OutboundMessage>,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl OutboundBus for InMemoryBus {
    async fn publish(&self, message: OutboundMessage) {
        let _ = self.tx.send(message);
    }
}
