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

//! Shared fixtures for building in-process clusters

use quorum_lock::node::{AtomicStoreClient, MemoryNode, NodeError, Script, ScriptReply};
use quorum_lock::{Redlock, RedlockSettings, VoteError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Settings with short, deterministic retry timing.
#[allow(dead_code)]
pub fn fast_settings() -> RedlockSettings {
    RedlockSettings {
        retry_count: 3,
        retry_delay_ms: 5,
        retry_jitter_ms: 0,
        node_timeout_ms: 1_000,
        ..RedlockSettings::default()
    }
}

pub struct TestCluster {
    pub nodes: Vec<Arc<MemoryNode>>,
    pub redlock: Redlock,
}

impl TestCluster {
    #[allow(dead_code)]
    pub fn new(size: usize) -> Self {
        Self::with_settings(size, fast_settings())
    }

    pub fn with_settings(size: usize, settings: RedlockSettings) -> Self {
        let nodes: Vec<Arc<MemoryNode>> = (0..size)
            .map(|index| Arc::new(MemoryNode::new(format!("node-{index}"))))
            .collect();
        let redlock = Redlock::builder(clients(&nodes))
            .settings(settings)
            .build()
            .unwrap();
        Self { nodes, redlock }
    }

    #[allow(dead_code)]
    pub fn total_calls(&self) -> usize {
        self.nodes.iter().map(|node| node.calls()).sum()
    }

    /// Number of nodes on which `key` is currently held by `token`.
    #[allow(dead_code)]
    pub fn holders_of(&self, key: &str, token: &str) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.holder(key).as_deref() == Some(token))
            .count()
    }
}

pub fn clients(nodes: &[Arc<MemoryNode>]) -> Vec<Arc<dyn AtomicStoreClient>> {
    nodes
        .iter()
        .map(|node| Arc::clone(node) as Arc<dyn AtomicStoreClient>)
        .collect()
}

/// Node client that panics on every evaluation.
#[derive(Debug, Default)]
pub struct PanickingNode {
    pub calls: AtomicUsize,
}

#[allow(dead_code)]
impl PanickingNode {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AtomicStoreClient for PanickingNode {
    fn name(&self) -> &str {
        "broken"
    }

    fn eval_cached(
        &self,
        _script: &Script,
        _keys: &[String],
        _args: &[String],
    ) -> Result<ScriptReply, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("client state corrupted");
    }

    fn eval(
        &self,
        _script: &Script,
        _keys: &[String],
        _args: &[String],
    ) -> Result<ScriptReply, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("client state corrupted");
    }
}

/// Observer that records every per-node error it is told about.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    pub seen: Arc<Mutex<Vec<(String, VoteError)>>>,
}

#[allow(dead_code)]
impl RecordingObserver {
    pub fn nodes(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(node, _)| node.clone())
            .collect()
    }
}

impl quorum_lock::locking::NodeErrorObserver for RecordingObserver {
    fn on_node_error(&self, node: &str, error: &VoteError) {
        self.seen
            .lock()
            .unwrap()
            .push((node.to_string(), error.clone()));
    }
}

/// Polls `condition` until it holds or `timeout` passes.
#[allow(dead_code)]
pub fn eventually(timeout: std::time::Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    condition()
}

/// Blocks until every node has answered each attempt.
#[allow(dead_code)]
pub fn settle(attempts: &[quorum_lock::locking::PendingStats]) {
    for attempt in attempts {
        let stats = attempt.wait_timeout(std::time::Duration::from_secs(5));
        assert!(stats.is_some(), "attempt stats never finalized");
    }
}
