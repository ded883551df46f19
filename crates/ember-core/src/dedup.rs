// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Duplicate tool-call batch detector: breaks infinite think/call loops.

use ember_model::ToolCallRequest;

const ABORT_MESSAGE: &str = "I appear to be repeating myself. Stopping.";

fn same_batch(a: &[ToolCallRequest], b: &[ToolCallRequest]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .all(|(x, y)| x.name == y.name && x.arguments == y.arguments)
}

/// Tracks consecutive identical tool-call batches per session and aborts the
/// iteration loop once `threshold` identical batches have been seen in a row.
pub struct DuplicateDetector {
    threshold: u32,
    last_batch: Option<Vec<ToolCallRequest>>,
    consecutive_count: u32,
}

impl DuplicateDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            last_batch: None,
            consecutive_count: 0,
        }
    }

    /// Feed the next tool-call batch. Returns `true` if the loop should abort.
    pub fn observe(&mut self, batch: &[ToolCallRequest]) -> bool {
        let repeats = self
            .last_batch
            .as_ref()
            .map(|last| same_batch(last, batch))
            .unwrap_or(false);
        if repeats {
            self.consecutive_count += 1;
        } else {
            self.consecutive_count = 1;
            self.last_batch = Some(batch.to_vec());
        }
        self.consecutive_count >= self.threshold
    }

    pub fn abort_message(&self) -> &'static str {
        ABORT_MESSAGE
    }
}
