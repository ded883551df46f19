// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod openai;
mod provider;
pub mod sanitize;
mod types;

pub use openai::{AuthStyle, OpenAiCompatProvider};
pub use provider::{
    ChatResponse, CompletionOptions, CompletionRequest, ModelProvider, ProviderError,
    ProviderErrorKind, ToolDefinition, Usage, classify_by_keywords,
};
pub use sanitize::sanitize;
pub use types::{approx_tokens, extract_image_markers, MediaRef, Message, Role, ToolCallRequest};
