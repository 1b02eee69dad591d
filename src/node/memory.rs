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

//! In-process storage node.
//!
//! `MemoryNode` implements the three lock primitives directly instead of
//! interpreting script bodies, but it keeps the digest-cache contract of a real
//! node: a script must be sent in full once before `eval_cached` succeeds.
//! Fault injection hooks make it suitable for exercising quorum behaviour.

use crate::node::{AtomicStoreClient, NodeError, Script, ScriptKind, ScriptReply};
use log::trace;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, Entry>,
    scripts: HashSet<String>,
}

impl Store {
    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn holds(&self, key: &str, token: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.value == token)
    }
}

#[derive(Debug)]
pub struct MemoryNode {
    name: String,
    store: Mutex<Store>,
    available: AtomicBool,
    latency: Mutex<Duration>,
    forced_reply: Mutex<Option<i64>>,
    calls: AtomicUsize,
}

impl MemoryNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: Mutex::new(Store::default()),
            available: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            forced_reply: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Simulates the node going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay applied before every script evaluation.
    pub fn set_latency(&self, latency: Duration) {
        *lock_unpoisoned(&self.latency) = latency;
    }

    /// Makes every evaluation return `reply` without touching the store.
    pub fn force_reply(&self, reply: Option<i64>) {
        *lock_unpoisoned(&self.forced_reply) = reply;
    }

    /// Forgets every cached script digest.
    pub fn flush_scripts(&self) {
        lock_unpoisoned(&self.store).scripts.clear();
    }

    /// Number of `eval_cached` and `eval` calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current owner token of `key`, if the key exists and has not expired.
    pub fn holder(&self, key: &str) -> Option<String> {
        let mut store = lock_unpoisoned(&self.store);
        store.purge_expired(Instant::now());
        store.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn is_script_cached(&self, digest: &str) -> bool {
        lock_unpoisoned(&self.store).scripts.contains(digest)
    }

    fn begin_call(&self) -> Result<(), NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *lock_unpoisoned(&self.latency);
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(NodeError::Connection(format!(
                "node {} is unavailable",
                self.name
            )));
        }
        Ok(())
    }

    fn run(
        &self,
        store: &mut Store,
        script: &Script,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, NodeError> {
        if let Some(reply) = *lock_unpoisoned(&self.forced_reply) {
            return Ok(ScriptReply::Integer(reply));
        }

        let token = args
            .first()
            .ok_or_else(|| NodeError::Response("missing lock value argument".to_string()))?;
        let now = Instant::now();
        store.purge_expired(now);

        let applied = match script.kind() {
            ScriptKind::Acquire => {
                if keys.iter().any(|key| store.entries.contains_key(key)) {
                    0
                } else {
                    let expires_at = now + parse_ttl(args)?;
                    for key in keys {
                        store.entries.insert(
                            key.clone(),
                            Entry {
                                value: token.clone(),
                                expires_at,
                            },
                        );
                    }
                    keys.len()
                }
            }
            ScriptKind::Extend => {
                if !keys.iter().all(|key| store.holds(key, token)) {
                    0
                } else {
                    let expires_at = now + parse_ttl(args)?;
                    for key in keys {
                        if let Some(entry) = store.entries.get_mut(key) {
                            entry.expires_at = expires_at;
                        }
                    }
                    keys.len()
                }
            }
            ScriptKind::Release => {
                let owned: Vec<&String> =
                    keys.iter().filter(|key| store.holds(key, token)).collect();
                for key in &owned {
                    store.entries.remove(key.as_str());
                }
                owned.len()
            }
        };

        trace!(
            "{} {} applied to {applied} of {} keys",
            self.name,
            script.kind(),
            keys.len()
        );
        Ok(ScriptReply::Integer(applied as i64))
    }
}

impl AtomicStoreClient for MemoryNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn eval_cached(
        &self,
        script: &Script,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, NodeError> {
        self.begin_call()?;
        let mut store = lock_unpoisoned(&self.store);
        if !store.scripts.contains(script.digest()) {
            return Err(NodeError::NoScript(
                "No matching script. Please use EVAL.".to_string(),
            ));
        }
        self.run(&mut store, script, keys, args)
    }

    fn eval(
        &self,
        script: &Script,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, NodeError> {
        self.begin_call()?;
        let mut store = lock_unpoisoned(&self.store);
        store.scripts.insert(script.digest().to_string());
        self.run(&mut store, script, keys, args)
    }
}

fn parse_ttl(args: &[String]) -> Result<Duration, NodeError> {
    let raw = args
        .get(1)
        .ok_or_else(|| NodeError::Response("missing TTL argument".to_string()))?;
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|err| NodeError::Response(format!("invalid TTL '{raw}': {err}")))
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ScriptSet;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn args(token: &str, ttl: Option<u64>) -> Vec<String> {
        let mut args = vec![token.to_string()];
        if let Some(ttl) = ttl {
            args.push(ttl.to_string());
        }
        args
    }

    #[test]
    fn cached_eval_requires_full_script_first() {
        let node = MemoryNode::new("n1");
        let scripts = ScriptSet::default();
        let acquire = scripts.get(ScriptKind::Acquire);

        let err = node
            .eval_cached(acquire, &keys(&["a"]), &args("t1", Some(1000)))
            .unwrap_err();
        assert!(matches!(err, NodeError::NoScript(_)));
        assert!(err.to_string().starts_with("NOSCRIPT"));

        node.eval(acquire, &keys(&["a"]), &args("t1", Some(1000)))
            .unwrap();
        assert!(node.is_script_cached(acquire.digest()));
        assert_eq!(node.calls(), 2);
    }

    #[test]
    fn acquire_is_all_or_nothing() {
        let node = MemoryNode::new("n1");
        let scripts = ScriptSet::default();
        let acquire = scripts.get(ScriptKind::Acquire);

        let reply = node
            .eval(acquire, &keys(&["a", "b"]), &args("t1", Some(1000)))
            .unwrap();
        assert_eq!(reply, ScriptReply::Integer(2));

        let reply = node
            .eval(acquire, &keys(&["b", "c"]), &args("t2", Some(1000)))
            .unwrap();
        assert_eq!(reply, ScriptReply::Integer(0));
        assert_eq!(node.holder("c"), None);
        assert_eq!(node.holder("b").as_deref(), Some("t1"));
    }

    #[test]
    fn extend_and_release_check_owner() {
        let node = MemoryNode::new("n1");
        let scripts = ScriptSet::default();
        node.eval(
            scripts.get(ScriptKind::Acquire),
            &keys(&["a"]),
            &args("t1", Some(1000)),
        )
        .unwrap();

        let extend = scripts.get(ScriptKind::Extend);
        assert_eq!(
            node.eval(extend, &keys(&["a"]), &args("other", Some(1000)))
                .unwrap(),
            ScriptReply::Integer(0)
        );
        assert_eq!(
            node.eval(extend, &keys(&["a"]), &args("t1", Some(1000)))
                .unwrap(),
            ScriptReply::Integer(1)
        );

        let release = scripts.get(ScriptKind::Release);
        assert_eq!(
            node.eval(release, &keys(&["a", "b"]), &args("other", None))
                .unwrap(),
            ScriptReply::Integer(0)
        );
        assert_eq!(
            node.eval(release, &keys(&["a", "b"]), &args("t1", None))
                .unwrap(),
            ScriptReply::Integer(1)
        );
        assert_eq!(node.holder("a"), None);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let node = MemoryNode::new("n1");
        let scripts = ScriptSet::default();
        node.eval(
            scripts.get(ScriptKind::Acquire),
            &keys(&["a"]),
            &args("t1", Some(20)),
        )
        .unwrap();
        assert!(node.holder("a").is_some());
        thread::sleep(Duration::from_millis(40));
        assert_eq!(node.holder("a"), None);
    }

    #[test]
    fn fault_injection() {
        let node = MemoryNode::new("n1");
        let scripts = ScriptSet::default();
        let acquire = scripts.get(ScriptKind::Acquire);

        node.set_available(false);
        let err = node
            .eval(acquire, &keys(&["a"]), &args("t1", Some(1000)))
            .unwrap_err();
        assert!(matches!(err, NodeError::Connection(_)));

        node.set_available(true);
        node.force_reply(Some(7));
        assert_eq!(
            node.eval(acquire, &keys(&["a"]), &args("t1", Some(1000)))
                .unwrap(),
            ScriptReply::Integer(7)
        );
        assert_eq!(node.holder("a"), None);
    }

    #[test]
    fn invalid_ttl_is_a_response_error() {
        let node = MemoryNode::new("n1");
        let scripts = ScriptSet::default();
        let err = node
            .eval(
                scripts.get(ScriptKind::Acquire),
                &keys(&["a"]),
                &["t1".to_string(), "soon".to_string()],
            )
            .unwrap_err();
        assert!(matches!(err, NodeError::Response(_)));
    }
}
