// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Rate limiter: two independent 60-second sliding-window counters.
//! No token-bucket smoothing — strict window admission.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Request,
    ToolCall,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("rate limited: scope={scope:?} limit={limit}")]
pub struct RateLimited {
    pub limit: i64,
    pub scope: RateLimitScope,
}

/// A single sliding-window counter. A `limit <= 0` means unlimited.
struct Window {
    timestamps: VecDeque<Instant>,
    limit: i64,
}

impl Window {
    fn new(limit: i64) -> Self {
        Self {
            timestamps: VecDeque::new(),
            limit,
        }
    }

    /// Prune entries older than `now - WINDOW`, then admit if under the
    /// limit, pushing `now` on success.
    fn admit(&mut self, now: Instant) -> bool {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) > WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        if self.limit <= 0 {
            self.timestamps.push_back(now);
            return true;
        }
        if (self.timestamps.len() as i64) < self.limit {
            self.timestamps.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Thread-safe sliding-window rate limiter gating provider calls and tool
/// calls independently.
pub struct RateLimiter {
    requests: Mutex<Window>,
    tool_calls: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(max_requests_per_minute: i64, max_tool_calls_per_minute: i64) -> Self {
        Self {
            requests: Mutex::new(Window::new(max_requests_per_minute)),
            tool_calls: Mutex::new(Window::new(max_tool_calls_per_minute)),
        }
    }

    pub fn check_request(&self) -> Result<(), RateLimited> {
        let mut w = self.requests.lock().unwrap();
        if w.admit(Instant::now()) {
            Ok(())
        } else {
            Err(RateLimited {
                limit: w.limit,
                scope: RateLimitScope::Request,
            })
        }
    }

    pub fn check_tool_call(&self) -> Result<(), RateLimited> {
        let mut w = self.tool_calls.lock().unwrap();
        if w.admit(Instant::now()) {
            Ok(())
        } else {
            Err(RateLimited {
                limit: w.limit,
                scope: RateLimitScope::ToolCall,
            })
        }
    }
}
