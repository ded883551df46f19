// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Internal error currency. Never expose raw provider/tool error strings to
//! the user — `user_message()` is the only sanctioned text path.

use ember_model::ProviderErrorKind;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("auth failed: {0}")]
    AuthFailed(String),
    #[error("rate limited")]
    RateLimited,
    #[error("billing issue: {0}")]
    Billing(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("provider overloaded: {0}")]
    Overloaded(String),
    #[error("bad request format: {0}")]
    BadFormat(String),
    #[error("context overflow")]
    ContextOverflow,
    #[error("cancelled")]
    Cancelled,
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl AgentError {
    pub fn from_provider_kind(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ProviderErrorKind::AuthFailed => AgentError::AuthFailed(message),
            ProviderErrorKind::RateLimited => AgentError::RateLimited,
            ProviderErrorKind::Billing => AgentError::Billing(message),
            ProviderErrorKind::Timeout => AgentError::Timeout(message),
            ProviderErrorKind::Overloaded => AgentError::Overloaded(message),
            ProviderErrorKind::BadFormat => AgentError::BadFormat(message),
            ProviderErrorKind::ContextOverflow => AgentError::ContextOverflow,
            ProviderErrorKind::Cancelled => AgentError::Cancelled,
            ProviderErrorKind::Unknown => AgentError::Unknown(message),
        }
    }

    /// User-facing text. Never includes the raw error string for kinds that
    /// might carry keys, paths, or stack traces.
    pub fn user_message(&self) -> String {
        match self {
            AgentError::AuthFailed(_) => {
                "Authentication with the model provider failed. Check your API key.".to_string()
            }
            AgentError::RateLimited => {
                "I'm being rate limited right now — please try again in a moment.".to_string()
            }
            AgentError::Billing(_) => {
                "There's a billing issue with the model provider account.".to_string()
            }
            AgentError::Timeout(_) => {
                "The request timed out. Please try again.".to_string()
            }
            AgentError::Overloaded(_) => {
                "The model provider is currently overloaded. Please try again shortly.".to_string()
            }
            AgentError::BadFormat(_) => {
                "The request was rejected as malformed. This may be a bug — please report it."
                    .to_string()
            }
            AgentError::ContextOverflow => {
                "History could not be compressed enough to fit the context window.".to_string()
            }
            AgentError::Cancelled => String::new(), // never surfaced
            AgentError::Unknown(_) => {
                "Something went wrong processing your message. Run diagnostics to investigate."
                    .to_string()
            }
        }
    }
}
