// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::RedlockSettings;
use crate::error::{RedlockError, Result};
use crate::locking::clock;
use crate::locking::quorum::{PendingStats, QuorumExecutor, Vote};
use crate::node::Script;
use log::{debug, warn};
use rand::Rng;
use retry::{OperationResult, retry_with_index};
use std::sync::Arc;
use std::time::Duration;

/// Fixed delay with uniform jitter in both directions, never below zero.
#[derive(Debug, Clone)]
pub struct JitteredBackoff {
    delay_ms: u64,
    jitter_ms: u64,
}

impl JitteredBackoff {
    pub fn new(delay_ms: u64, jitter_ms: u64) -> Self {
        Self {
            delay_ms,
            jitter_ms,
        }
    }

    pub fn from_settings(settings: &RedlockSettings) -> Self {
        Self::new(settings.retry_delay_ms, settings.retry_jitter_ms)
    }

    /// Draws the next delay.
    pub fn next_delay(&self) -> Duration {
        let jitter = self.jitter_ms.min(i64::MAX as u64) as i64;
        let offset = if jitter == 0 {
            0
        } else {
            rand::thread_rng().gen_range(-jitter..=jitter)
        };
        let delay = (self.delay_ms as i64).saturating_add(offset).max(0);
        Duration::from_millis(delay as u64)
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.delay_ms.saturating_sub(self.jitter_ms)),
            Duration::from_millis(self.delay_ms.saturating_add(self.jitter_ms)),
        )
    }
}

impl Iterator for JitteredBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Successful outcome of a retried quorum operation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub attempts: Vec<PendingStats>,
    /// Epoch milliseconds at which the successful attempt started.
    pub start: i64,
}

/// Repeats quorum attempts until one is decided in favour or the budget runs out.
pub struct RetryCoordinator<'a> {
    executor: &'a QuorumExecutor,
    settings: &'a RedlockSettings,
    deadline: Option<i64>,
}

impl<'a> RetryCoordinator<'a> {
    pub fn new(executor: &'a QuorumExecutor, settings: &'a RedlockSettings) -> Self {
        Self {
            executor,
            settings,
            deadline: None,
        }
    }

    /// Stops retrying at `deadline` (epoch milliseconds), whatever budget is
    /// left. No attempt starts at or after the deadline, sleeps between
    /// attempts are cut short at it, and node timeouts never reach past it.
    pub fn until(mut self, deadline: i64) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn time_left(&self) -> Option<Duration> {
        self.deadline.map(|deadline| {
            Duration::from_millis((deadline - clock::now_millis()).max(0) as u64)
        })
    }

    pub fn execute(
        &self,
        script: &Arc<Script>,
        keys: &Arc<[String]>,
        args: &Arc<[String]>,
    ) -> Result<ExecutionResult> {
        let backoff = JitteredBackoff::from_settings(self.settings);
        // The first attempt is free; the iterator only yields the sleeps between retries.
        let delays: Box<dyn Iterator<Item = Duration>> = match self.settings.max_attempts() {
            Some(max_attempts) => Box::new(backoff.take(max_attempts.saturating_sub(1) as usize)),
            None => Box::new(backoff),
        };
        let delays = delays.map(|delay| match self.time_left() {
            Some(left) => delay.min(left),
            None => delay,
        });

        let mut attempts: Vec<PendingStats> = Vec::new();

        let result = retry_with_index(delays, |current_try| {
            let node_timeout = match self.time_left() {
                Some(left) if left.is_zero() => {
                    debug!(
                        "{} deadline passed before attempt {current_try}; giving up",
                        script.kind()
                    );
                    return OperationResult::Err(None);
                }
                Some(left) => Some(self.settings.node_timeout().map_or(left, |t| t.min(left))),
                None => self.settings.node_timeout(),
            };
            match self.executor.attempt(script, keys, args, node_timeout) {
                Ok(outcome) => {
                    attempts.push(outcome.stats);
                    match outcome.vote {
                        Vote::For => OperationResult::Ok(outcome.start),
                        Vote::Against => {
                            debug!(
                                "{} attempt {current_try} did not reach quorum; retrying",
                                script.kind()
                            );
                            OperationResult::Retry(None)
                        }
                    }
                }
                Err(fatal) => OperationResult::Err(Some(fatal)),
            }
        });

        match result {
            Ok(start) => Ok(ExecutionResult { attempts, start }),
            Err(retry_error) => match retry_error.error {
                Some(fatal) => Err(fatal),
                None => {
                    warn!(
                        "{} operation failed to reach quorum after {} attempt(s)",
                        script.kind(),
                        attempts.len()
                    );
                    Err(RedlockError::quorum_failure(attempts))
                }
            },
        }
    }
}
