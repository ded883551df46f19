// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The atomic conversation unit and the wire types built around it.

use serde::{Deserialize, Serialize};

/// A reference to media attached to a message: either an inline `data:` URL
/// or a path to an already-persisted file on disk.
pub type MediaRef = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of an assistant message's `tool_calls` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The atomic conversation unit.
///
/// `tool_calls` is only meaningful on `Role::Assistant` messages; `tool_call_id`
/// is only meaningful on `Role::Tool` messages. Both default to empty/`None`
/// so that plain text messages need not populate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            media: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            media: Vec::new(),
        }
    }

    pub fn user_with_media(content: impl Into<String>, media: Vec<MediaRef>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            media,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            media: Vec::new(),
        }
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            media: Vec::new(),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            media: Vec::new(),
        }
    }

    pub fn is_tool_call_assistant(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }

    /// Heuristic token estimate: 2.5 characters per token, i.e. `rune_count * 2 / 5`.
    /// Counts `content` only — arguments/ids of tool_calls are not counted,
    /// matching the source's summed-content-only estimator.
    pub fn approx_tokens(&self) -> usize {
        approx_tokens(&self.content)
    }

    /// Extract `[Image: <path>]` markers appended to tool/assistant content
    /// by the tool executor, for compaction-time media cleanup.
    pub fn image_marker_paths(&self) -> Vec<String> {
        extract_image_markers(&self.content)
    }
}

/// Heuristic token estimate shared by every component that needs to budget
/// history against a context window: 2.5 characters per token.
pub fn approx_tokens(text: &str) -> usize {
    text.chars().count() * 2 / 5
}

/// Pull every `[Image: <path>]` marker out of a block of text, in order.
pub fn extract_image_markers(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("[Image: ") {
        let after = &rest[start + "[Image: ".len()..];
        if let Some(end) = after.find(']') {
            out.push(after[..end].to_string());
            rest = &after[end + 1..];
        } else {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_tokens_is_two_point_five_chars_per_token() {
        assert_eq!(approx_tokens("aaaaaaaaaa"), 4); // 10 * 2 / 5 = 4
        assert_eq!(approx_tokens(""), 0);
        assert_eq!(approx_tokens("ab"), 0); // 2 * 2 / 5 = 0 (integer division)
    }

    #[test]
    fn constructors_set_expected_roles() {
        assert_eq!(Message::system("x").role, Role::System);
        assert_eq!(Message::user("x").role, Role::User);
        assert_eq!(Message::assistant("x").role, Role::Assistant);
        assert_eq!(Message::tool_result("a", "x").role, Role::Tool);
    }

    #[test]
    fn tool_result_carries_tool_call_id() {
        let m = Message::tool_result("call-1", "result");
        assert_eq!(m.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn is_tool_call_assistant_requires_nonempty_list() {
        let plain = Message::assistant("hi");
        assert!(!plain.is_tool_call_assistant());

        let call = Message::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest {
                id: "a".into(),
                name: "shell".into(),
                arguments: serde_json::json!({}),
            }],
        );
        assert!(call.is_tool_call_assistant());
    }

    #[test]
    fn extract_image_markers_finds_all_in_order() {
        let text = "saw two things\n[Image: /tmp/a.png]\nand\n[Image: /tmp/b.png]";
        assert_eq!(
            extract_image_markers(text),
            vec!["/tmp/a.png".to_string(), "/tmp/b.png".to_string()]
        );
    }

    #[test]
    fn extract_image_markers_empty_when_none_present() {
        assert!(extract_image_markers("no media here").is_empty());
    }

    #[test]
    fn message_round_trips_through_json() {
        let m = Message::assistant_with_tool_calls(
            "thinking",
            vec![ToolCallRequest {
                id: "1".into(),
                name: "read_file".into(),
                arguments: serde_json::json!({"path": "a.rs"}),
            }],
        );
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn plain_message_serializes_without_tool_call_fields() {
        let m = Message::user("hi");
        let json = serde_json::to_string(&m).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }
}
