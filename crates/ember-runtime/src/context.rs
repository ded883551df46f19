// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Context builder facade: assembles the exact message list sent to the
//! provider — one synthesized system message, the sanitized history, and
//! the current user turn.

use chrono::Utc;
use ember_model::{sanitize, Message};

/// Optional contextual blocks folded into the system prompt, in a fixed
/// order. Each field is skipped entirely when `None` or empty, so a minimal
/// instance still gets a well-formed prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub identity: String,
    pub tool_summary: Option<String>,
    pub bootstrap_files: Vec<String>,
    pub skill_summary: Option<String>,
    pub mcp_summary: Option<String>,
    pub memory_context: Option<String>,
    pub session_info: Option<String>,
    pub voice_mode_addendum: Option<String>,
    pub retrieved_memory: Option<String>,
    pub previous_summary: Option<String>,
}

impl PromptContext {
    pub fn new(agent_name: &str, workspace: &str, runtime: &str) -> Self {
        Self {
            identity: format!(
                "You are {agent_name}, a personal AI assistant.\nTime: {}\nWorkspace: {workspace}\nRuntime: {runtime}",
                Utc::now().to_rfc3339()
            ),
            ..Default::default()
        }
    }

    pub fn with_tool_summary(mut self, summary: impl Into<String>) -> Self {
        self.tool_summary = Some(summary.into());
        self
    }

    pub fn with_previous_summary(mut self, summary: impl Into<String>) -> Self {
        let s = summary.into();
        if !s.is_empty() {
            self.previous_summary = Some(s);
        }
        self
    }

    /// Appends the voice-mode addendum block when `input_mode` is `"voice"`,
    /// reminding the model to keep replies terse and speakable.
    pub fn with_input_mode(mut self, input_mode: Option<&str>) -> Self {
        if input_mode == Some("voice") {
            self.voice_mode_addendum = Some(
                "You are responding to a voice message. Keep replies short, \
                 conversational, and free of markdown or code blocks."
                    .to_string(),
            );
        }
        self
    }

    /// Concatenate every present block with the documented `\n\n---\n\n`
    /// separator, in the fixed section order.
    pub fn render(&self) -> String {
        let mut blocks = vec![self.identity.clone()];
        if let Some(s) = &self.tool_summary {
            blocks.push(s.clone());
        }
        for f in &self.bootstrap_files {
            if !f.is_empty() {
                blocks.push(f.clone());
            }
        }
        if let Some(s) = &self.skill_summary {
            blocks.push(s.clone());
        }
        if let Some(s) = &self.mcp_summary {
            blocks.push(s.clone());
        }
        if let Some(s) = &self.memory_context {
            blocks.push(s.clone());
        }
        if let Some(s) = &self.session_info {
            blocks.push(s.clone());
        }
        if let Some(s) = &self.voice_mode_addendum {
            blocks.push(s.clone());
        }
        if let Some(s) = &self.retrieved_memory {
            blocks.push(s.clone());
        }
        if let Some(s) = &self.previous_summary {
            blocks.push(format!("Previous session summary:\n{s}"));
        }
        blocks.join("\n\n---\n\n")
    }
}

/// Build the full provider message list: `[system, ...sanitized history,
/// current_turn?]`. `current_turn` is `None` when rebuilding after force
/// compression, since the trigger message is already the history's tail.
pub fn build_messages(ctx: &PromptContext, history: &[Message], current_turn: Option<Message>) -> Vec<Message> {
    let system = Message::system(ctx.render());
    let mut combined: Vec<Message> = history.to_vec();
    if let Some(turn) = current_turn {
        combined.push(turn);
    }
    let mut messages = vec![system];
    messages.extend(sanitize(&combined));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_joins_present_blocks_with_separator() {
        let ctx = PromptContext {
            identity: "id".into(),
            tool_summary: Some("tools".into()),
            ..Default::default()
        };
        assert_eq!(ctx.render(), "id\n\n---\n\ntools");
    }

    #[test]
    fn render_skips_absent_blocks() {
        let ctx = PromptContext { identity: "id".into(), ..Default::default() };
        assert_eq!(ctx.render(), "id");
    }

    #[test]
    fn voice_input_mode_adds_addendum() {
        let ctx = PromptContext::new("ember", "/tmp/ws", "tokio").with_input_mode(Some("voice"));
        assert!(ctx.voice_mode_addendum.is_some());
        assert!(ctx.render().contains("voice message"));
    }

    #[test]
    fn other_input_modes_leave_addendum_absent() {
        let ctx = PromptContext::new("ember", "/tmp/ws", "tokio").with_input_mode(Some("text"));
        assert!(ctx.voice_mode_addendum.is_none());
        let ctx2 = PromptContext::new("ember", "/tmp/ws", "tokio").with_input_mode(None);
        assert!(ctx2.voice_mode_addendum.is_none());
    }

    #[test]
    fn build_messages_has_exactly_one_leading_system() {
        let ctx = PromptContext::new("ember", "/tmp/ws", "tokio");
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let out = build_messages(&ctx, &history, Some(Message::user("there")));
        assert_eq!(out[0].role, ember_model::Role::System);
        assert_eq!(out.iter().filter(|m| m.role == ember_model::Role::System).count(), 1);
    }

    #[test]
    fn build_messages_coalesces_consecutive_users_via_sanitize() {
        let ctx = PromptContext::new("ember", "/tmp/ws", "tokio");
        let history = vec![Message::user("first")];
        let out = build_messages(&ctx, &history, Some(Message::user("second")));
        let users: Vec<_> = out.iter().filter(|m| m.role == ember_model::Role::User).collect();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].content, "first\n\nsecond");
    }

    #[test]
    fn build_messages_with_no_current_turn_rebuilds_from_history_only() {
        let ctx = PromptContext::new("ember", "/tmp/ws", "tokio");
        let history = vec![Message::user("already there")];
        let out = build_messages(&ctx, &history, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].content, "already there");
    }
}
