// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A concrete OpenAI-compatible chat completions driver.
//!
//! The provider driver is the one external-service integration point; this
//! module exists purely so the `ember` binary has one real implementation to
//! plug into the catalog instead of shipping with nothing runnable. It speaks
//! the `/chat/completions` wire format shared by OpenAI, Groq, OpenRouter,
//! and most local servers (Ollama, vLLM, llama.cpp), mirroring it without the
//! streaming/model-catalog machinery a full driver registry would need.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::provider::{ChatResponse, CompletionRequest, ModelProvider, ProviderError, ProviderErrorKind, Usage};
use crate::types::{Message, Role, ToolCallRequest};

/// How the API key is attached to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` — OpenAI, Groq, OpenRouter, most others.
    Bearer,
    /// `api-key: <key>` — Azure OpenAI.
    ApiKeyHeader,
    /// No auth header — local servers.
    None,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn to_wire_message(m: &Message) -> Value {
    let mut v = json!({
        "role": role_str(m.role),
        "content": m.content,
    });
    if !m.tool_calls.is_empty() {
        let calls: Vec<Value> = m
            .tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        v["tool_calls"] = json!(calls);
    }
    if let Some(id) = &m.tool_call_id {
        v["tool_call_id"] = json!(id);
    }
    v
}

fn status_to_kind(status: u16) -> ProviderErrorKind {
    match status {
        401 | 403 => ProviderErrorKind::AuthFailed,
        402 => ProviderErrorKind::Billing,
        408 => ProviderErrorKind::Timeout,
        429 => ProviderErrorKind::RateLimited,
        400 | 422 => ProviderErrorKind::Unknown, // let the keyword heuristic look at the body
        500..=599 => ProviderErrorKind::Overloaded,
        _ => ProviderErrorKind::Unknown,
    }
}

/// Chat-completions driver for any OpenAI-compatible endpoint.
pub struct OpenAiCompatProvider {
    driver_name: String,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    auth_style: AuthStyle,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// `base_url` is the API root, without a trailing `/chat/completions`
    /// (e.g. `https://api.openai.com/v1`).
    pub fn new(driver_name: impl Into<String>, model: impl Into<String>, api_key: Option<String>, base_url: &str, auth_style: AuthStyle) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            driver_name: driver_name.into(),
            model: model.into(),
            api_key,
            chat_url: format!("{base}/chat/completions"),
            auth_style,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: CompletionRequest) -> Result<ChatResponse, ProviderError> {
        let messages: Vec<Value> = req.messages.iter().map(to_wire_message).collect();
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": req.options.max_tokens,
            "temperature": req.options.temperature,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(driver = %self.driver_name, model = %self.model, message_count = messages.len(), "sending completion request");

        let mut http_req = self.client.post(&self.chat_url).json(&body);
        http_req = match self.auth_style {
            AuthStyle::Bearer => {
                let key = self
                    .api_key
                    .as_deref()
                    .ok_or_else(|| ProviderError::new(ProviderErrorKind::AuthFailed, "no API key configured"))?;
                http_req.bearer_auth(key)
            }
            AuthStyle::ApiKeyHeader => {
                let key = self
                    .api_key
                    .as_deref()
                    .ok_or_else(|| ProviderError::new(ProviderErrorKind::AuthFailed, "no API key configured"))?;
                http_req.header("api-key", key)
            }
            AuthStyle::None => http_req,
        };

        let resp = http_req.send().await.map_err(|e| {
            let kind = if e.is_timeout() { ProviderErrorKind::Timeout } else { ProviderErrorKind::Unknown };
            ProviderError::new(kind, format!("{} request failed: {e}", self.driver_name))
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let kind = status_to_kind(status);
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::new(kind, format!("{} error {status}: {text}", self.driver_name)));
        }

        let parsed: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::new(ProviderErrorKind::BadFormat, format!("invalid response body: {e}")))?;

        parse_chat_completion(&parsed)
    }
}

fn parse_chat_completion(body: &Value) -> Result<ChatResponse, ProviderError> {
    let choice = body["choices"].get(0).ok_or_else(|| {
        ProviderError::new(ProviderErrorKind::BadFormat, "response has no choices")
    })?;
    let message = &choice["message"];
    let content = message["content"].as_str().unwrap_or("").to_string();
    let finish_reason = choice["finish_reason"].as_str().unwrap_or("").to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let id = call["id"].as_str().unwrap_or_default().to_string();
            let name = call["function"]["name"].as_str().unwrap_or_default().to_string();
            let args_str = call["function"]["arguments"].as_str().unwrap_or("{}");
            let arguments: Value = serde_json::from_str(args_str).unwrap_or(json!({}));
            tool_calls.push(ToolCallRequest { id, name, arguments });
        }
    }

    let usage = Usage {
        input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    };

    Ok(ChatResponse { content, tool_calls, finish_reason, usage })
}
