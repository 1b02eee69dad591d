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

use crate::error::Result;
use crate::locking::clock;
use crate::locking::coordinator::Redlock;
use crate::locking::quorum::PendingStats;
use crate::locking::retry::ExecutionResult;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// A lease on one or more resources held across a quorum of nodes.
///
/// Dropping a `Lock` does not release it; the lease simply runs out on the
/// nodes. Call [`release`](Self::release) to free the resources early.
pub struct Lock {
    coordinator: Redlock,
    resources: Vec<String>,
    value: String,
    attempts: Vec<PendingStats>,
    expiration: i64,
}

impl Lock {
    pub(crate) fn new(
        coordinator: Redlock,
        resources: Vec<String>,
        value: String,
        attempts: Vec<PendingStats>,
        expiration: i64,
    ) -> Self {
        Self {
            coordinator,
            resources,
            value,
            attempts,
            expiration,
        }
    }

    /// Namespaced keys, in the order they were requested.
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// Owner token stored on every node.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn attempts(&self) -> &[PendingStats] {
        &self.attempts
    }

    /// Epoch milliseconds after which the lease must be presumed lost. Zero
    /// once the lock has been released or superseded by an extension.
    pub fn expiration(&self) -> i64 {
        self.expiration
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        clock::to_datetime(self.expiration)
    }

    pub fn is_expired(&self) -> bool {
        self.expiration < clock::now_millis()
    }

    /// Time left before expiration, zero if already expired.
    pub fn remaining(&self) -> Duration {
        let left = self.expiration.saturating_sub(clock::now_millis());
        Duration::from_millis(left.max(0) as u64)
    }

    pub(crate) fn expire(&mut self) {
        self.expiration = 0;
    }

    pub fn extend(&mut self, duration: Duration) -> Result<Lock> {
        let coordinator = self.coordinator.clone();
        coordinator.extend(self, duration, None)
    }

    pub fn release(&mut self) -> Result<ExecutionResult> {
        let coordinator = self.coordinator.clone();
        coordinator.release(self, None)
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("resources", &self.resources)
            .field("value", &self.value)
            .field("attempts", &self.attempts.len())
            .field("expiration", &self.expiration)
            .finish()
    }
}
