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

//! Parallel fan-out of one script to every node, decided by majority vote.

use crate::error::{RedlockError, Result, VoteError};
use crate::locking::clock;
use crate::locking::observer::NodeErrorObserver;
use crate::node::{AtomicStoreClient, NodeError, Script, ScriptReply};
use log::{debug, error};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Majority needed for a decision among `membership_size` nodes.
pub fn quorum_size(membership_size: usize) -> usize {
    membership_size / 2 + 1
}

/// Outcome of one attempt, or of one node within an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    For,
    Against,
}

/// Per-attempt tally of node votes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStats {
    pub membership_size: usize,
    pub quorum_size: usize,
    pub votes_for: BTreeSet<String>,
    pub votes_against: BTreeMap<String, VoteError>,
}

impl ExecutionStats {
    fn new(membership_size: usize) -> Self {
        Self {
            membership_size,
            quorum_size: quorum_size(membership_size),
            votes_for: BTreeSet::new(),
            votes_against: BTreeMap::new(),
        }
    }

    pub fn responded(&self) -> usize {
        self.votes_for.len() + self.votes_against.len()
    }

    /// The decision these votes support so far, if any.
    pub fn decision(&self) -> Option<Vote> {
        if self.votes_for.len() >= self.quorum_size {
            Some(Vote::For)
        } else if self.votes_against.len() >= self.quorum_size
            || self.responded() == self.membership_size
        {
            Some(Vote::Against)
        } else {
            None
        }
    }

    /// Flattened view for logs and JSON diagnostics.
    pub fn report(&self) -> StatsReport {
        StatsReport {
            membership_size: self.membership_size,
            quorum_size: self.quorum_size,
            votes_for: self.votes_for.iter().cloned().collect(),
            votes_against: self
                .votes_against
                .iter()
                .map(|(node, err)| (node.clone(), err.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub membership_size: usize,
    pub quorum_size: usize,
    pub votes_for: Vec<String>,
    pub votes_against: BTreeMap<String, String>,
}

#[derive(Debug)]
struct StatsState {
    stats: ExecutionStats,
    finalized: bool,
}

/// Shared handle to one attempt's stats.
///
/// The attempt is decided as soon as a quorum is reached, but nodes that have
/// not answered yet keep being recorded here until every node thread is done.
#[derive(Clone)]
pub struct PendingStats {
    inner: Arc<(Mutex<StatsState>, Condvar)>,
}

impl PendingStats {
    fn new(membership_size: usize) -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(StatsState {
                    stats: ExecutionStats::new(membership_size),
                    finalized: false,
                }),
                Condvar::new(),
            )),
        }
    }

    fn state(&self) -> MutexGuard<'_, StatsState> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut ExecutionStats) -> R) -> R {
        f(&mut self.state().stats)
    }

    fn finalize(&self) {
        self.state().finalized = true;
        self.inner.1.notify_all();
    }

    /// Stats as currently known, which may still be missing stragglers.
    pub fn snapshot(&self) -> ExecutionStats {
        self.state().stats.clone()
    }

    pub fn is_final(&self) -> bool {
        self.state().finalized
    }

    /// Blocks until every node has answered (or its thread has exited).
    pub fn wait(&self) -> ExecutionStats {
        let guard = self
            .inner
            .1
            .wait_while(self.state(), |state| !state.finalized)
            .unwrap_or_else(PoisonError::into_inner);
        guard.stats.clone()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning
    /// `None` if the stats were still incomplete.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExecutionStats> {
        let (guard, _) = self
            .inner
            .1
            .wait_timeout_while(self.state(), timeout, |state| !state.finalized)
            .unwrap_or_else(PoisonError::into_inner);
        guard.finalized.then(|| guard.stats.clone())
    }
}

impl fmt::Debug for PendingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("PendingStats")
            .field("stats", &state.stats)
            .field("finalized", &state.finalized)
            .finish()
    }
}

/// What a node thread sends back.
enum NodeOutcome {
    Voted(std::result::Result<i64, VoteError>),
    Crashed(String),
}

struct NodeReport {
    index: usize,
    outcome: NodeOutcome,
}

/// Result of a decided attempt.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub vote: Vote,
    pub stats: PendingStats,
    /// Epoch milliseconds at which the attempt started.
    pub start: i64,
}

/// Runs scripts against every node in parallel and decides by majority.
#[derive(Clone)]
pub struct QuorumExecutor {
    nodes: Arc<[Arc<dyn AtomicStoreClient>]>,
    observer: Arc<dyn NodeErrorObserver>,
}

impl QuorumExecutor {
    pub fn new(
        nodes: Arc<[Arc<dyn AtomicStoreClient>]>,
        observer: Arc<dyn NodeErrorObserver>,
    ) -> Self {
        Self { nodes, observer }
    }

    pub fn membership_size(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[Arc<dyn AtomicStoreClient>] {
        &self.nodes
    }

    /// Runs one attempt of `script` on every node.
    ///
    /// Returns as soon as the vote is decided; the returned stats keep filling
    /// in as the remaining nodes answer. Nodes still silent after
    /// `node_timeout` count as against. A node client panic before the decision
    /// fails the attempt with [`RedlockError::UnexpectedNode`].
    pub fn attempt(
        &self,
        script: &Arc<Script>,
        keys: &Arc<[String]>,
        args: &Arc<[String]>,
        node_timeout: Option<Duration>,
    ) -> Result<AttemptOutcome> {
        let start = clock::now_millis();
        let started_at = Instant::now();
        let stats = PendingStats::new(self.nodes.len());
        let (tx, rx) = mpsc::channel::<NodeReport>();

        for (index, node) in self.nodes.iter().enumerate() {
            let node = Arc::clone(node);
            let script = Arc::clone(script);
            let keys = Arc::clone(keys);
            let args = Arc::clone(args);
            let reply_tx = tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("redlock-node-{index}"))
                .spawn(move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        run_on_node(node.as_ref(), &script, &keys, &args)
                    }))
                    .map(NodeOutcome::Voted)
                    .unwrap_or_else(|payload| NodeOutcome::Crashed(panic_message(&*payload)));
                    let _ = reply_tx.send(NodeReport { index, outcome });
                });
            if let Err(err) = spawned {
                drop(tx);
                self.abandon(index, rx, stats, &err);
                return Err(err.into());
            }
        }
        drop(tx);

        let mut tally = Tally::new(self.nodes.len());
        let deadline = node_timeout.map(|timeout| started_at + timeout);

        let vote = loop {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    rx.recv_timeout(remaining)
                }
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(report) => {
                    if let NodeOutcome::Crashed(details) = report.outcome {
                        let node = self.nodes[report.index].name().to_string();
                        self.collect_stragglers(rx, stats.clone(), tally);
                        return Err(RedlockError::UnexpectedNode { node, details });
                    }
                    self.record(&stats, &mut tally, report);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let timeout = node_timeout.unwrap_or_default();
                    for index in tally.silent() {
                        tally.responded[index] = true;
                        self.record_vote(&stats, index, Err(VoteError::TimedOut(timeout)));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Every node thread is gone; any silent node vanished without
                    // reporting, which only happens if its thread was torn down.
                    for index in tally.silent() {
                        tally.responded[index] = true;
                        self.record_vote(
                            &stats,
                            index,
                            Err(VoteError::Store(NodeError::Connection(
                                "node worker exited without a reply".to_string(),
                            ))),
                        );
                    }
                }
            }

            if let Some(vote) = stats.update(|stats| stats.decision()) {
                break vote;
            }
        };

        debug!(
            "Quorum attempt decided {vote:?} after {:.3}s ({} of {} nodes answered)",
            started_at.elapsed().as_secs_f64(),
            tally.answered(),
            self.nodes.len()
        );

        self.collect_stragglers(rx, stats.clone(), tally);
        Ok(AttemptOutcome { vote, stats, start })
    }

    /// Gives up on an attempt whose fan-out stopped at node `unstarted`.
    ///
    /// Nodes before it were already contacted and may apply the script; their
    /// replies are still collected. Nodes from `unstarted` on are recorded as
    /// never contacted so the stats can finalize.
    fn abandon(
        &self,
        unstarted: usize,
        rx: Receiver<NodeReport>,
        stats: PendingStats,
        cause: &std::io::Error,
    ) {
        let contacted: Vec<&str> = self.nodes[..unstarted]
            .iter()
            .map(|node| node.name())
            .collect();
        error!(
            "Failed to start a worker for node '{}' ({cause}); already contacted: {contacted:?}",
            self.nodes[unstarted].name()
        );

        let mut tally = Tally::new(self.nodes.len());
        for index in unstarted..self.nodes.len() {
            tally.responded[index] = true;
            let node = self.nodes[index].name().to_string();
            let never_sent = VoteError::Store(NodeError::Connection(
                "attempt abandoned before this node was contacted".to_string(),
            ));
            stats.update(|stats| stats.votes_against.insert(node, never_sent));
        }
        self.collect_stragglers(rx, stats, tally);
    }

    fn record(&self, stats: &PendingStats, tally: &mut Tally, report: NodeReport) {
        if tally.responded[report.index] {
            // Already counted as timed out.
            return;
        }
        tally.responded[report.index] = true;
        if let NodeOutcome::Voted(result) = report.outcome {
            self.record_vote(stats, report.index, result);
        }
    }

    fn record_vote(
        &self,
        stats: &PendingStats,
        index: usize,
        result: std::result::Result<i64, VoteError>,
    ) {
        let node = self.nodes[index].name().to_string();
        match result {
            Ok(_) => {
                stats.update(|stats| stats.votes_for.insert(node));
            }
            Err(err) => {
                self.observer.on_node_error(&node, &err);
                stats.update(|stats| stats.votes_against.insert(node, err));
            }
        }
    }

    /// Drains late replies in the background and finalizes the stats.
    fn collect_stragglers(&self, rx: Receiver<NodeReport>, stats: PendingStats, mut tally: Tally) {
        if tally.answered() == self.nodes.len() {
            stats.finalize();
            return;
        }

        let executor = self.clone();
        let finalizer = stats.clone();
        let spawned = thread::Builder::new()
            .name("redlock-stragglers".to_string())
            .spawn(move || {
                for report in rx {
                    if let NodeOutcome::Crashed(details) = &report.outcome {
                        error!(
                            "Node '{}' crashed after the quorum was decided: {details}",
                            executor.nodes[report.index].name()
                        );
                        tally.responded[report.index] = true;
                        continue;
                    }
                    executor.record(&stats, &mut tally, report);
                }
                stats.finalize();
            });

        if let Err(err) = spawned {
            error!("Failed to spawn straggler collector: {err}");
            finalizer.finalize();
        }
    }
}

struct Tally {
    responded: Vec<bool>,
}

impl Tally {
    fn new(size: usize) -> Self {
        Self {
            responded: vec![false; size],
        }
    }

    fn answered(&self) -> usize {
        self.responded.iter().filter(|done| **done).count()
    }

    fn silent(&self) -> Vec<usize> {
        self.responded
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(index, _)| index)
            .collect()
    }
}

/// Evaluates by digest first and falls back to the full body on `NOSCRIPT`.
fn run_on_node(
    node: &dyn AtomicStoreClient,
    script: &Script,
    keys: &[String],
    args: &[String],
) -> std::result::Result<i64, VoteError> {
    let reply = match node.eval_cached(script, keys, args) {
        Err(NodeError::NoScript(_)) => {
            debug!(
                "Node '{}' has no cached {} script; sending full body",
                node.name(),
                script.kind()
            );
            node.eval(script, keys, args)?
        }
        other => other?,
    };

    let applied = match reply {
        ScriptReply::Integer(applied) => applied,
        ScriptReply::Other(raw) => return Err(VoteError::UnexpectedReply(raw)),
    };

    if applied != keys.len() as i64 {
        return Err(VoteError::ResourceLocked {
            applied,
            requested: keys.len(),
        });
    }
    Ok(applied)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "node client panicked".to_string()
    }
}
