// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The LLM provider driver interface: a simple request/response call, not a
//! streaming one. The iteration loop makes one `chat()` call per iteration
//! and gets back a complete response or a classified error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Message, ToolCallRequest};

/// A tool definition as handed to the provider alongside the message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub model: String,
    pub options: CompletionOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A complete, non-streamed response from a single `chat()` call.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: String,
    pub usage: Usage,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Error-kind classification. The provider driver is expected to
/// classify its own failures; `Unknown` means the driver could not determine
/// a reason and the loop's textual heuristic is consulted as a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    AuthFailed,
    RateLimited,
    Billing,
    Timeout,
    Overloaded,
    BadFormat,
    ContextOverflow,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Resolve the effective error kind for context-overflow handling: trust
    /// the driver's own classification unless it reports `Unknown`, in which
    /// case fall back to a textual keyword heuristic over the message body.
    pub fn effective_kind(&self) -> ProviderErrorKind {
        if self.kind != ProviderErrorKind::Unknown {
            return self.kind;
        }
        classify_by_keywords(&self.message)
    }
}

/// Textual fallback classifier: looks for token/context/length/
/// invalidparameter keywords. Only consulted when the provider driver
/// itself returns `Unknown`.
pub fn classify_by_keywords(message: &str) -> ProviderErrorKind {
    let lower = message.to_lowercase();
    let context_keywords = ["token", "context", "length", "invalidparameter"];
    if context_keywords.iter().any(|kw| lower.contains(kw)) {
        ProviderErrorKind::ContextOverflow
    } else {
        ProviderErrorKind::Unknown
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;
    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;
    /// Send a completion request and return a complete response or a
    /// classified error. Not a streaming call.
    async fn chat(&self, req: CompletionRequest) -> Result<ChatResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_falls_back_to_keyword_heuristic() {
        let err = ProviderError::new(ProviderErrorKind::Unknown, "maximum context length exceeded");
        assert_eq!(err.effective_kind(), ProviderErrorKind::ContextOverflow);
    }

    #[test]
    fn classified_kind_is_trusted_even_if_message_has_no_keywords() {
        let err = ProviderError::new(ProviderErrorKind::ContextOverflow, "boom");
        assert_eq!(err.effective_kind(), ProviderErrorKind::ContextOverflow);
    }

    #[test]
    fn classified_non_context_kind_is_not_overridden_by_keywords() {
        // Even though the message happens to contain "token", the driver's
        // own classification (RateLimited) must win.
        let err = ProviderError::new(ProviderErrorKind::RateLimited, "token bucket exhausted");
        assert_eq!(err.effective_kind(), ProviderErrorKind::RateLimited);
    }

    #[test]
    fn keyword_heuristic_recognizes_all_documented_keywords() {
        for kw in ["token", "context", "length", "invalidparameter"] {
            assert_eq!(
                classify_by_keywords(&format!("error: {kw} exceeded")),
                ProviderErrorKind::ContextOverflow,
                "keyword {kw} should classify as context overflow"
            );
        }
    }

    #[test]
    fn keyword_heuristic_defaults_to_unknown() {
        assert_eq!(classify_by_keywords("connection reset"), ProviderErrorKind::Unknown);
    }

    #[test]
    fn has_tool_calls_reflects_list() {
        let mut r = ChatResponse::default();
        assert!(!r.has_tool_calls());
        r.tool_calls.push(ToolCallRequest {
            id: "1".into(),
            name: "x".into(),
            arguments: serde_json::json!({}),
        });
        assert!(r.has_tool_calls());
    }
}
