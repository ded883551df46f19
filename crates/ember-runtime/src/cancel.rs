// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-session cancellation registry: at most one active processor per
//! session_key, with prompt cancellation of a superseded entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct ActiveProcess {
    id: u64,
    token: CancellationToken,
    done_rx: oneshot::Receiver<()>,
}

/// A handle returned by [`CancellationRegistry::begin`]. Holding this is how
/// a running turn observes cancellation and signals its own completion.
pub struct ProcessHandle {
    pub token: CancellationToken,
    id: u64,
    done_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    /// The generation id this handle was issued for, to be passed to `end`.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Must be called exactly once when the turn finishes, successfully or not.
    pub fn finish(mut self) {
        if let Some(tx) = self.done_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.done_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Process-wide `session_key -> ActiveProcess` table.
pub struct CancellationRegistry {
    active: Mutex<HashMap<String, ActiveProcess>>,
    next_id: AtomicU64,
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically swap in a new entry for `session_key`. If a previous entry
    /// existed, cancel it and wait (bounded by 5s) for its done signal before
    /// returning, so callers never observe two live processors for the same key.
    pub async fn begin(self: &Arc<Self>, session_key: &str) -> ProcessHandle {
        let previous = {
            let mut guard = self.active.lock().await;
            guard.remove(session_key)
        };
        if let Some(prev) = previous {
            prev.token.cancel();
            if tokio::time::timeout(DRAIN_TIMEOUT, prev.done_rx).await.is_err() {
                warn!(session_key, "previous processor did not drain within timeout");
            }
        }

        let token = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (done_tx, done_rx) = oneshot::channel();
        let mut guard = self.active.lock().await;
        guard.insert(session_key.to_string(), ActiveProcess { id, token: token.clone(), done_rx });
        ProcessHandle { token, id, done_tx: Some(done_tx) }
    }

    /// Remove the registry entry for `session_key`, but only if it is still
    /// the entry issued as `id` — a superseding `begin` may already have
    /// installed a fresh one.
    pub async fn end(&self, session_key: &str, id: u64) {
        let mut guard = self.active.lock().await;
        if guard.get(session_key).map(|e| e.id) == Some(id) {
            guard.remove(session_key);
        }
    }
}
