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

use crate::config::{RedlockSettings, SettingsOverride};
use crate::error::{RedlockError, Result};
use crate::locking::lock::Lock;
use crate::locking::observer::{LoggingObserver, NodeErrorObserver};
use crate::locking::quorum::{QuorumExecutor, quorum_size};
use crate::locking::retry::{ExecutionResult, RetryCoordinator};
use crate::locking::signal::RedlockAbortSignal;
use crate::locking::supervisor::LeaseSupervisor;
use crate::node::{AtomicStoreClient, NodeError, ScriptKind, ScriptSet};
use log::{debug, warn};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const TOKEN_BYTES: usize = 16;

struct Inner {
    executor: QuorumExecutor,
    settings: RedlockSettings,
    scripts: ScriptSet,
}

/// Coordinator for leases held across a fixed set of independent nodes.
///
/// Cloning is cheap; every clone shares the same nodes and settings.
#[derive(Clone)]
pub struct Redlock {
    inner: Arc<Inner>,
}

impl Redlock {
    pub fn builder(nodes: Vec<Arc<dyn AtomicStoreClient>>) -> RedlockBuilder {
        RedlockBuilder::new(nodes)
    }

    pub fn settings(&self) -> &RedlockSettings {
        &self.inner.settings
    }

    pub fn membership_size(&self) -> usize {
        self.inner.executor.membership_size()
    }

    pub fn quorum_size(&self) -> usize {
        quorum_size(self.membership_size())
    }

    /// Acquires `resources` for `duration` (the configured default when `None`).
    ///
    /// On failure a single best-effort release is sent for the same keys, so
    /// that nodes which did grant the lease do not keep it until it expires.
    pub fn acquire<S: AsRef<str>>(
        &self,
        resources: &[S],
        duration: Option<Duration>,
        overrides: Option<&SettingsOverride>,
    ) -> Result<Lock> {
        let settings = self.resolve(overrides)?;
        let duration_ms = match duration {
            Some(duration) => whole_millis(duration)?,
            None => settings.duration_ms,
        };
        if resources.is_empty() {
            return Err(RedlockError::Validation(
                "At least one resource is required".to_string(),
            ));
        }

        let keys: Arc<[String]> = resources
            .iter()
            .map(|resource| settings.resource_key(resource.as_ref()))
            .collect();
        let value = generate_token();
        let args: Arc<[String]> = vec![value.clone(), duration_ms.to_string()].into();

        debug!("Acquiring {keys:?} for {duration_ms}ms");
        let executed = RetryCoordinator::new(&self.inner.executor, &settings).execute(
            self.inner.scripts.get(ScriptKind::Acquire),
            &keys,
            &args,
        );

        match executed {
            Ok(result) => {
                let expiration = expiration_for(&settings, result.start, duration_ms);
                debug!("Acquired {keys:?} until {expiration}");
                Ok(Lock::new(
                    self.clone(),
                    keys.to_vec(),
                    value,
                    result.attempts,
                    expiration,
                ))
            }
            Err(err) => {
                self.release_partial(&settings, &keys, &value);
                Err(err)
            }
        }
    }

    /// Extends `lock` by `duration` from now, returning the replacement lock.
    ///
    /// The superseded lock is marked expired on success and left untouched on
    /// failure.
    pub fn extend(
        &self,
        lock: &mut Lock,
        duration: Duration,
        overrides: Option<&SettingsOverride>,
    ) -> Result<Lock> {
        self.extend_until(lock, duration, overrides, None)
    }

    /// [`extend`](Self::extend) that stops retrying at `deadline` (epoch
    /// milliseconds) even if retry budget remains.
    pub(crate) fn extend_until(
        &self,
        lock: &mut Lock,
        duration: Duration,
        overrides: Option<&SettingsOverride>,
        deadline: Option<i64>,
    ) -> Result<Lock> {
        let settings = self.resolve(overrides)?;
        let duration_ms = whole_millis(duration)?;
        if lock.is_expired() {
            return Err(RedlockError::AlreadyExpired);
        }

        let keys: Arc<[String]> = lock.resources().into();
        let args: Arc<[String]> = vec![lock.value().to_string(), duration_ms.to_string()].into();

        let mut retry = RetryCoordinator::new(&self.inner.executor, &settings);
        if let Some(deadline) = deadline {
            retry = retry.until(deadline);
        }
        let result = retry.execute(self.inner.scripts.get(ScriptKind::Extend), &keys, &args)?;

        let expiration = expiration_for(&settings, result.start, duration_ms);
        debug!("Extended {keys:?} until {expiration}");
        lock.expire();
        Ok(Lock::new(
            self.clone(),
            keys.to_vec(),
            lock.value().to_string(),
            result.attempts,
            expiration,
        ))
    }

    /// Releases `lock` on every node that still holds it.
    ///
    /// The lock is marked expired before any node is contacted. A quorum
    /// failure here is advisory: the lease still runs out on its own.
    pub fn release(
        &self,
        lock: &mut Lock,
        overrides: Option<&SettingsOverride>,
    ) -> Result<ExecutionResult> {
        let settings = self.resolve(overrides)?;
        lock.expire();

        let keys: Arc<[String]> = lock.resources().into();
        let args: Arc<[String]> = vec![lock.value().to_string()].into();
        debug!("Releasing {keys:?}");

        RetryCoordinator::new(&self.inner.executor, &settings).execute(
            self.inner.scripts.get(ScriptKind::Release),
            &keys,
            &args,
        )
    }

    /// Runs `routine` while holding `resources`, renewing the lease in the
    /// background until the routine returns. See [`LeaseSupervisor`].
    pub fn using<S, T, E, F>(
        &self,
        resources: &[S],
        duration: Duration,
        overrides: Option<&SettingsOverride>,
        routine: F,
    ) -> std::result::Result<T, E>
    where
        S: AsRef<str>,
        E: From<RedlockError>,
        F: FnOnce(&RedlockAbortSignal) -> std::result::Result<T, E>,
    {
        let supervisor = LeaseSupervisor::new(self, duration, overrides)?;
        supervisor.run(resources, routine)
    }

    /// Closes every node connection. All nodes are attempted; the first
    /// failure is returned.
    pub fn quit(&self) -> Result<()> {
        let mut first_error: Option<NodeError> = None;
        for node in self.inner.executor.nodes() {
            if let Err(err) = node.quit() {
                warn!("Failed to close node '{}': {err}", node.name());
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    pub(crate) fn resolve(&self, overrides: Option<&SettingsOverride>) -> Result<RedlockSettings> {
        match overrides {
            Some(overrides) => self.inner.settings.layered(overrides),
            None => Ok(self.inner.settings.clone()),
        }
    }

    fn release_partial(&self, settings: &RedlockSettings, keys: &Arc<[String]>, value: &str) {
        let once = RedlockSettings {
            retry_count: 0,
            ..settings.clone()
        };
        let args: Arc<[String]> = vec![value.to_string()].into();
        if let Err(err) = RetryCoordinator::new(&self.inner.executor, &once).execute(
            self.inner.scripts.get(ScriptKind::Release),
            keys,
            &args,
        ) {
            debug!("Cleanup release after failed acquire did not succeed: {err}");
        }
    }
}

impl fmt::Debug for Redlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<&str> = self
            .inner
            .executor
            .nodes()
            .iter()
            .map(|node| node.name())
            .collect();
        f.debug_struct("Redlock")
            .field("nodes", &nodes)
            .field("settings", &self.inner.settings)
            .finish()
    }
}

pub struct RedlockBuilder {
    nodes: Vec<Arc<dyn AtomicStoreClient>>,
    settings: RedlockSettings,
    observer: Arc<dyn NodeErrorObserver>,
    scripts: ScriptSet,
}

impl RedlockBuilder {
    fn new(nodes: Vec<Arc<dyn AtomicStoreClient>>) -> Self {
        Self {
            nodes,
            settings: RedlockSettings::default(),
            observer: Arc::new(LoggingObserver),
            scripts: ScriptSet::default(),
        }
    }

    pub fn settings(mut self, settings: RedlockSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn observer(mut self, observer: impl NodeErrorObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn scripts(mut self, scripts: ScriptSet) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn build(self) -> Result<Redlock> {
        if self.nodes.is_empty() {
            return Err(RedlockError::Validation(
                "A coordinator needs at least one node".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name()) {
                return Err(RedlockError::Validation(format!(
                    "Duplicate node name '{}'",
                    node.name()
                )));
            }
        }
        self.settings.validate()?;

        Ok(Redlock {
            inner: Arc::new(Inner {
                executor: QuorumExecutor::new(self.nodes.into(), self.observer),
                settings: self.settings,
                scripts: self.scripts,
            }),
        })
    }
}

/// Converts a lease duration to whole milliseconds, rejecting zero and
/// anything finer than a millisecond.
pub(crate) fn whole_millis(duration: Duration) -> Result<u64> {
    if duration.is_zero() {
        return Err(RedlockError::Validation(
            "Duration must be greater than zero".to_string(),
        ));
    }
    if duration.subsec_nanos() % 1_000_000 != 0 {
        return Err(RedlockError::Validation(format!(
            "Duration must be a whole number of milliseconds, got {duration:?}"
        )));
    }
    u64::try_from(duration.as_millis())
        .ok()
        .filter(|millis| *millis <= i64::MAX as u64)
        .ok_or_else(|| RedlockError::Validation(format!("Duration {duration:?} is too large")))
}

fn expiration_for(settings: &RedlockSettings, start: i64, duration_ms: u64) -> i64 {
    start
        .saturating_add(duration_ms as i64)
        .saturating_sub(settings.drift_ms(duration_ms))
}

fn generate_token() -> String {
    hex::encode(rand::random::<[u8; TOKEN_BYTES]>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MemoryNode;

    fn nodes(names: &[&str]) -> Vec<Arc<dyn AtomicStoreClient>> {
        names
            .iter()
            .map(|name| Arc::new(MemoryNode::new(*name)) as Arc<dyn AtomicStoreClient>)
            .collect()
    }

    #[test]
    fn builder_rejects_empty_membership() {
        let err = Redlock::builder(Vec::new()).build().unwrap_err();
        assert!(matches!(err, RedlockError::Validation(_)));
    }

    #[test]
    fn builder_rejects_duplicate_names() {
        let err = Redlock::builder(nodes(&["a", "b", "a"])).build().unwrap_err();
        assert!(err.to_string().contains("Duplicate node name 'a'"));
    }

    #[test]
    fn builder_validates_settings() {
        let settings = RedlockSettings {
            drift_factor: 1.5,
            ..RedlockSettings::default()
        };
        let err = Redlock::builder(nodes(&["a"]))
            .settings(settings)
            .build()
            .unwrap_err();
        assert!(matches!(err, RedlockError::Validation(_)));
    }

    #[test]
    fn membership_and_quorum() {
        let redlock = Redlock::builder(nodes(&["a", "b", "c", "d", "e"]))
            .build()
            .unwrap();
        assert_eq!(redlock.membership_size(), 5);
        assert_eq!(redlock.quorum_size(), 3);
    }

    #[test]
    fn whole_millis_rejects_fractions_and_zero() {
        assert_eq!(whole_millis(Duration::from_millis(1500)).unwrap(), 1500);
        assert!(whole_millis(Duration::from_micros(1_000_500)).is_err());
        assert!(whole_millis(Duration::ZERO).is_err());
        assert!(whole_millis(Duration::MAX).is_err());
    }

    #[test]
    fn tokens_are_random_hex() {
        let first = generate_token();
        let second = generate_token();
        assert_eq!(first.len(), TOKEN_BYTES * 2);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(first, second);
    }

    #[test]
    fn expiration_subtracts_drift() {
        let settings = RedlockSettings::default();
        assert_eq!(expiration_for(&settings, 10_000, 1000), 10_988);
    }
}
