// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! History sanitizer: enforces tool-call/tool-response pairing and message-
//! ordering rules on a mixed sequence of user / assistant(with-tool-calls) /
//! tool / assistant messages before it is handed to a provider.
//!
//! Pure function, zero I/O. This is what makes it safe for the compactor and
//! the context builder to both call it without any shared mutable state.

use std::collections::HashSet;

use crate::types::{Message, Role};

struct PendingAssistant {
    /// Index into the output vec of the tool-call assistant message.
    idx: usize,
    declared: Vec<String>,
    delivered: HashSet<String>,
}

/// Truncate the pending assistant's `tool_calls` down to only the ids that
/// were actually answered, preserving declaration order. Never removes the
/// message itself — an assistant with zero answered calls is kept with an
/// empty `tool_calls` list and its original text content.
fn finalize(out: &mut [Message], pending: PendingAssistant) {
    let PendingAssistant {
        idx,
        declared,
        delivered,
    } = pending;
    if delivered.len() == declared.len() {
        return; // every declared id was answered; nothing to strip
    }
    let msg = &mut out[idx];
    msg.tool_calls.retain(|tc| delivered.contains(&tc.id));
}

/// Sanitize a candidate message list so tool calls and tool responses stay
/// correctly paired, assistant messages never follow another assistant
/// message, and consecutive user messages are coalesced.
///
/// Idempotent: `sanitize(sanitize(h)) == sanitize(h)`. Stable: relative order
/// of kept items is preserved.
pub fn sanitize(history: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(history.len());
    let mut pending: Option<PendingAssistant> = None;

    for msg in history {
        match msg.role {
            Role::Tool => {
                let Some(ref mut p) = pending else {
                    continue; // no active tool-call assistant: drop
                };
                let Some(ref id) = msg.tool_call_id else {
                    continue; // empty tool_call_id: drop
                };
                if id.is_empty() || !p.declared.contains(id) || p.delivered.contains(id) {
                    continue;
                }
                p.delivered.insert(id.clone());
                out.push(msg.clone());
            }
            Role::Assistant if !msg.tool_calls.is_empty() => {
                let predecessor_ok = matches!(
                    out.last().map(|m| m.role),
                    Some(Role::User) | Some(Role::Tool)
                );
                if !predecessor_ok {
                    continue; // drop: predecessor must be user or tool
                }
                if let Some(p) = pending.take() {
                    finalize(&mut out, p);
                }
                let declared = msg.tool_calls.iter().map(|tc| tc.id.clone()).collect();
                out.push(msg.clone());
                pending = Some(PendingAssistant {
                    idx: out.len() - 1,
                    declared,
                    delivered: HashSet::new(),
                });
            }
            Role::Assistant => {
                if let Some(p) = pending.take() {
                    finalize(&mut out, p);
                }
                out.push(msg.clone());
            }
            Role::User => {
                if let Some(p) = pending.take() {
                    finalize(&mut out, p);
                }
                if let Some(last) = out.last_mut() {
                    if last.role == Role::User {
                        last.content = format!("{}\n\n{}", last.content, msg.content);
                        last.media.extend(msg.media.iter().cloned());
                        continue;
                    }
                }
                out.push(msg.clone());
            }
            Role::System => {
                // The context builder is the sole source of system messages;
                // the sanitizer passes them through unmodified but does not
                // itself enforce the single-leading-system-message rule —
                // that falls out of how the builder assembles its input.
                if let Some(p) = pending.take() {
                    finalize(&mut out, p);
                }
                out.push(msg.clone());
            }
        }
    }

    if let Some(p) = pending.take() {
        finalize(&mut out, p);
    }

    out
}
