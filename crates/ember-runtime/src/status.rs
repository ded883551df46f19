// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Status/heartbeat emitter: thinking -> tool-specific status -> status_end.

use std::sync::Arc;
use std::time::Duration;

use ember_core::{is_internal_channel, OutboundBus, OutboundMessage};
use ember_tools::ToolCall;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Derive a short, human-readable status label for a tool invocation.
/// e.g. `web_search{query="foo"}` -> "searching... (foo)".
pub fn tool_status_label(call: &ToolCall) -> String {
    let arg = |key: &str| call.args.get(key).and_then(|v| v.as_str()).map(str::to_string);

    match call.name.as_str() {
        "web_search" => match arg("query") {
            Some(q) => format!("searching... ({q})"),
            None => "searching...".to_string(),
        },
        "read_file" => match arg("path") {
            Some(p) => format!("reading file... ({})", basename(&p)),
            None => "reading file...".to_string(),
        },
        "write" | "edit_file" => match arg("path") {
            Some(p) => format!("writing file... ({})", basename(&p)),
            None => "writing file...".to_string(),
        },
        "run_terminal_command" => "running command...".to_string(),
        "grep" | "find_file" => "searching files...".to_string(),
        other => format!("running {other}..."),
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Emits `status` and `status_end` outbound messages and re-publishes the
/// current status every 10s for as long as it's alive, so slow clients keep
/// a spinner going between provider calls.
pub struct StatusEmitter {
    bus: Arc<dyn OutboundBus>,
    channel: String,
    chat_id: String,
    current: Arc<Mutex<String>>,
    ticker: Option<JoinHandle<()>>,
}

impl StatusEmitter {
    /// Starts the background heartbeat immediately. No-op publishes for
    /// internal channels (system/cli/subagent).
    pub fn start(bus: Arc<dyn OutboundBus>, channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        let channel = channel.into();
        let chat_id = chat_id.into();
        let current = Arc::new(Mutex::new("thinking".to_string()));

        let ticker = if is_internal_channel(&channel) {
            None
        } else {
            let bus2 = bus.clone();
            let channel2 = channel.clone();
            let chat_id2 = chat_id.clone();
            let current2 = current.clone();
            Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
                interval.tick().await; // first tick fires immediately, skip it
                loop {
                    interval.tick().await;
                    let label = current2.lock().await.clone();
                    bus2.publish(OutboundMessage::status(&channel2, &chat_id2, label)).await;
                }
            }))
        };

        let emitter = Self { bus, channel, chat_id, current, ticker };
        emitter.publish_now_sync("thinking");
        emitter
    }

    fn publish_now_sync(&self, label: &str) {
        if is_internal_channel(&self.channel) {
            return;
        }
        let bus = self.bus.clone();
        let channel = self.channel.clone();
        let chat_id = self.chat_id.clone();
        let msg = OutboundMessage::status(channel, chat_id, label.to_string());
        tokio::spawn(async move { bus.publish(msg).await });
    }

    /// Update the status label (e.g. before running a tool). Publishes
    /// immediately and updates what the heartbeat re-sends.
    pub async fn set_status(&self, label: impl Into<String>) {
        let label = label.into();
        *self.current.lock().await = label.clone();
        self.publish_now_sync(&label);
    }

    /// Emit a single `status_end`, stop the heartbeat, and optionally emit a
    /// typed `error` message on the failure path.
    pub async fn finish(self, error: Option<&str>) {
        if let Some(t) = &self.ticker {
            t.abort();
        }
        if is_internal_channel(&self.channel) {
            return;
        }
        self.bus
            .publish(OutboundMessage::status_end(&self.channel, &self.chat_id))
            .await;
        if let Some(err) = error {
            self.bus
                .publish(OutboundMessage::error(&self.channel, &self.chat_id, err))
                .await;
        }
    }
}
