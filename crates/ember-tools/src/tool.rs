// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool interface and the result shape routed by the executor.

use async_trait::async_trait;

/// One LLM-requested tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// A reference to media produced by a tool call, before it has been
/// persisted to disk — typically a base64 `data:` URL.
#[derive(Debug, Clone)]
pub struct MediaOutput {
    pub data_url: String,
}

/// The result of one tool invocation.
///
/// Routing semantics: if `silent` is true OR `for_user` is empty, nothing is
/// sent to the user. `for_llm` is always what the model sees, falling back
/// to the error text when empty.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub for_user: String,
    pub for_llm: String,
    pub silent: bool,
    pub is_error: bool,
    pub err: Option<String>,
    pub media: Vec<MediaOutput>,
}

impl ToolResult {
    pub fn ok(for_llm: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            ..Default::default()
        }
    }

    pub fn ok_with_user(for_llm: impl Into<String>, for_user: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            for_user: for_user.into(),
            ..Default::default()
        }
    }

    pub fn silent(for_llm: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            silent: true,
            ..Default::default()
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            is_error: true,
            err: Some(message),
            ..Default::default()
        }
    }

    pub fn with_media(mut self, media: Vec<MediaOutput>) -> Self {
        self.media = media;
        self
    }

    /// Content handed back to the iteration loop: `for_llm` unless empty, in
    /// which case the error text, in which case empty string.
    pub fn llm_content(&self) -> String {
        if !self.for_llm.is_empty() {
            self.for_llm.clone()
        } else if let Some(e) = &self.err {
            e.clone()
        } else {
            String::new()
        }
    }

    /// Whether this result should ever reach the user-facing bus.
    pub fn should_publish_to_user(&self) -> bool {
        !self.silent && !self.for_user.is_empty()
    }
}

/// Whether a tool may run concurrently with other tools in the same batch.
/// Parallelism is all-or-nothing across a batch: a single tool lacking
/// `ReadOnlyParallel` forces the entire batch sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelPolicy {
    #[default]
    Sequential,
    ReadOnlyParallel,
}

/// Invocation context threaded through `execute` (channel/chat routing).
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub channel: String,
    pub chat_id: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    /// Optional capability: tools that only read state may declare
    /// `ReadOnlyParallel` to opt into batch parallelism.
    fn parallel_policy(&self) -> ParallelPolicy {
        ParallelPolicy::Sequential
    }

    /// Optional capability: tools that accept `set_context` are informed of
    /// the current (channel, chat_id) before each invocation. Probed by the
    /// executor via a downcast, matching the "optional capability" pattern.
    fn set_context(&self, _ctx: &ToolContext) {}

    async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _ctx: &ToolContext, call: &ToolCall) -> ToolResult {
            ToolResult::ok(call.args.to_string())
        }
    }

    #[tokio::test]
    async fn echo_tool_roundtrips_args_into_for_llm() {
        let t = EchoTool;
        let call = ToolCall {
            id: "1".into(),
            name: "echo".into(),
            args: serde_json::json!({"x": 1}),
        };
        let out = t.execute(&ToolContext::default(), &call).await;
        assert_eq!(out.llm_content(), r#"{"x":1}"#);
    }

    #[test]
    fn llm_content_falls_back_to_error_text() {
        let r = ToolResult::err("boom");
        assert_eq!(r.llm_content(), "boom");
    }

    #[test]
    fn llm_content_empty_when_nothing_set() {
        let r = ToolResult::default();
        assert_eq!(r.llm_content(), "");
    }

    #[test]
    fn silent_result_never_publishes() {
        let r = ToolResult::silent("for the model only");
        assert!(!r.should_publish_to_user());
    }

    #[test]
    fn empty_for_user_never_publishes_even_if_not_silent() {
        let r = ToolResult::ok("for llm");
        assert!(!r.should_publish_to_user());
    }

    #[test]
    fn populated_for_user_publishes() {
        let r = ToolResult::ok_with_user("for llm", "for user");
        assert!(r.should_publish_to_user());
    }

    #[test]
    fn default_parallel_policy_is_sequential() {
        let t = EchoTool;
        assert_eq!(t.parallel_policy(), ParallelPolicy::Sequential);
    }
}
