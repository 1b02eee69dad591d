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

//! Observer interface for per-node failures.
//!
//! A minority of nodes failing never changes the outcome of a lock operation,
//! so these failures are not returned to callers. Observers let operators
//! monitor them without coupling application logic to individual nodes.

use crate::error::VoteError;
use log::{debug, warn};

/// Receives every per-node failure seen by a coordinator.
pub trait NodeErrorObserver: Send + Sync {
    fn on_node_error(&self, _node: &str, _error: &VoteError) {}
}

/// Observer implementation that performs no work.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl NodeErrorObserver for NoopObserver {}

/// Default observer: contention is logged at debug, everything else at warn.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl NodeErrorObserver for LoggingObserver {
    fn on_node_error(&self, node: &str, error: &VoteError) {
        if error.is_resource_locked() {
            debug!("Node '{node}' reported the resource as locked: {error}");
        } else {
            warn!("Node '{node}' failed a lock operation: {error}");
        }
    }
}

impl<F> NodeErrorObserver for F
where
    F: Fn(&str, &VoteError) + Send + Sync,
{
    fn on_node_error(&self, node: &str, error: &VoteError) {
        self(node, error)
    }
}
