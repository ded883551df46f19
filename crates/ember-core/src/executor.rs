// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool executor with result routing and media persistence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use ember_model::{extract_image_markers, Message};
use ember_tools::{RateLimited, RateLimiter, ToolCall, ToolContext, ToolRegistry, ToolResult};

use crate::bus::{OutboundBus, OutboundMessage};

/// Invocation context threaded through one tool call: who to route
/// user-visible output to, and whether the caller wants it sent at all.
pub struct Invocation<'a> {
    pub channel: &'a str,
    pub chat_id: &'a str,
    pub send_response: bool,
}

pub struct ToolExecutor {
    registry: ToolRegistry,
    rate_limiter: Arc<RateLimiter>,
    media_dir: PathBuf,
    bus: Arc<dyn OutboundBus>,
}

impl ToolExecutor {
    pub fn new(
        registry: ToolRegistry,
        rate_limiter: Arc<RateLimiter>,
        media_dir: impl Into<PathBuf>,
        bus: Arc<dyn OutboundBus>,
    ) -> Self {
        Self { registry, rate_limiter, media_dir: media_dir.into(), bus }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Runs one tool call, routes its output, and returns the `Message` to
    /// append to the running conversation (role = tool).
    pub async fn execute(&self, inv: &Invocation<'_>, call: &ToolCall) -> Message {
        if let Err(RateLimited { limit, .. }) = self.rate_limiter.check_tool_call() {
            let text = format!("Rate limited: no more than {limit} tool calls per minute.");
            return Message::tool_result(call.id.clone(), text);
        }

        let ctx = ToolContext {
            channel: inv.channel.to_string(),
            chat_id: inv.chat_id.to_string(),
        };
        let result = self.registry.execute(&ctx, call).await;

        if !result.silent && !result.for_user.is_empty() && inv.send_response {
            self.bus
                .publish(OutboundMessage::reply(inv.channel, inv.chat_id, result.for_user.clone()))
                .await;
        }

        let mut content = result.llm_content();
        for (idx, media) in result.media.iter().enumerate() {
            match persist_media(&self.media_dir, media, idx).await {
                Ok(path) => {
                    content.push_str(&format!("\n[Image: {}]", path.display()));
                }
                Err(err) => {
                    content.push_str(&format!("\n[media save failed: {err}]"));
                }
            }
        }

        Message::tool_result(call.id.clone(), content)
    }
}

fn extension_for_data_url(data_url: &str) -> &'static str {
    if data_url.starts_with("data:image/png") {
        "png"
    } else if data_url.starts_with("data:image/webp") {
        "webp"
    } else if data_url.starts_with("data:image/gif") {
        "gif"
    } else {
        "jpg"
    }
}

async fn persist_media(
    dir: &Path,
    media: &ember_tools::MediaOutput,
    idx: usize,
) -> Result<PathBuf, String> {
    let (_, b64) = media
        .data_url
        .split_once(',')
        .ok_or_else(|| "malformed data url".to_string())?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| e.to_string())?;
    tokio::fs::create_dir_all(dir).await.map_err(|e| e.to_string())?;
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let ext = extension_for_data_url(&media.data_url);
    let path = dir.join(format!("{stamp}_{idx}.{ext}"));
    tokio::fs::write(&path, bytes).await.map_err(|e| e.to_string())?;
    Ok(path)
}

/// Deletes every `[Image: <path>]` file referenced by `messages`, tolerating
/// already-missing files (per the documented "races must be tolerated" rule).
pub async fn cleanup_media_for_messages(messages: &[Message]) {
    for msg in messages {
        for path in extract_image_markers(&msg.content) {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ember_tools::{ParallelPolicy, Tool};

    struct NotFoundRegistryTool;

    #[async_trait]
    impl Tool for NotFoundRegistryTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        fn parallel_policy(&self) -> ParallelPolicy {
            ParallelPolicy::ReadOnlyParallel
        }
        async fn execute(&self, _ctx: &ToolContext, call: &ToolCall) -> ToolResult {
            ToolResult::ok_with_user(format!("ran {}", call.name), "done")
        }
    }

    fn executor(registry: ToolRegistry, media_dir: &Path) -> ToolExecutor {
        ToolExecutor::new(
            registry,
            Arc::new(RateLimiter::new(0, 0)),
            media_dir.to_path_buf(),
            Arc::new(crate::bus::InMemoryBus::new(8)),
        )
    }

    #[tokio::test]
    async fn missing_tool_produces_not_found_tool_message() {
        let dir = tempfile::tempdir().unwrap();
        let ex = executor(ToolRegistry::new(), dir.path());
        let call = ToolCall { id: "1".into(), name: "ghost".into(), args: serde_json::json!({}) };
        let msg = ex
            .execute(&Invocation { channel: "cli", chat_id: "1", send_response: false }, &call)
            .await;
        assert!(msg.content.contains("ghost"));
        assert!(msg.content.contains("not found"));
        assert_eq!(msg.tool_call_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn registered_tool_returns_llm_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NotFoundRegistryTool));
        let ex = executor(registry, dir.path());
        let call = ToolCall { id: "1".into(), name: "noop".into(), args: serde_json::json!({}) };
        let msg = ex
            .execute(&Invocation { channel: "cli", chat_id: "1", send_response: false }, &call)
            .await;
        assert_eq!(msg.content, "ran noop");
    }

    #[tokio::test]
    async fn rate_limited_tool_call_synthesizes_message_without_invoking_tool() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NotFoundRegistryTool));
        let ex = ToolExecutor::new(
            registry,
            Arc::new(RateLimiter::new(0, 1)),
            dir.path().to_path_buf(),
            Arc::new(crate::bus::InMemoryBus::new(8)),
        );
        let call = ToolCall { id: "1".into(), name: "noop".into(), args: serde_json::json!({}) };
        let inv = Invocation { channel: "cli", chat_id: "1", send_response: false };
        let first = ex.execute(&inv, &call).await;
        assert_eq!(first.content, "ran noop");
        let second = ex.execute(&inv, &call).await;
        assert!(second.content.starts_with("Rate limited"));
    }

    #[test]
    fn extension_guessing_defaults_to_jpg() {
        assert_eq!(extension_for_data_url("data:image/png;base64,"), "png");
        assert_eq!(extension_for_data_url("data:image/jpeg;base64,"), "jpg");
    }

    #[tokio::test]
    async fn cleanup_ignores_missing_files() {
        let msg = Message::tool_result("1", "see\n[Image: /nonexistent/path/x.png]");
        cleanup_media_for_messages(&[msg]).await;
    }
}
