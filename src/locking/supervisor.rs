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

//! Automatic lease renewal around a caller-supplied routine.
//!
//! The routine runs on the calling thread. A scoped renewal thread sleeps
//! until the lease is `automatic_extension_threshold_ms` away from expiring,
//! extends it, and goes back to sleep. Finishing the routine drops the stop
//! channel, which wakes the renewal thread and ends it. Extension retries are
//! bounded by the current lock's expiration rather than by the retry budget
//! alone, so if renewal keeps failing the abort signal is raised as soon as
//! the lease has run out locally, while the nodes' own TTL is still running.

use crate::config::{RedlockSettings, SettingsOverride};
use crate::error::{RedlockError, Result};
use crate::locking::clock;
use crate::locking::coordinator::{Redlock, whole_millis};
use crate::locking::lock::Lock;
use crate::locking::signal::RedlockAbortSignal;
use log::{debug, error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Slack required between the renewal threshold and the lease duration.
const MIN_RENEWAL_WINDOW_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Acquiring,
    Running,
    Extending,
    Aborted,
    Releasing,
    Done,
}

pub struct LeaseSupervisor<'a> {
    coordinator: &'a Redlock,
    overrides: Option<&'a SettingsOverride>,
    settings: RedlockSettings,
    duration: Duration,
    phase: Mutex<SupervisorPhase>,
}

impl<'a> LeaseSupervisor<'a> {
    /// Validates the lease parameters without contacting any node.
    pub fn new(
        coordinator: &'a Redlock,
        duration: Duration,
        overrides: Option<&'a SettingsOverride>,
    ) -> Result<Self> {
        let settings = coordinator.resolve(overrides)?;
        let duration_ms = whole_millis(duration)?;
        let threshold = settings.automatic_extension_threshold_ms;
        if threshold.saturating_add(MIN_RENEWAL_WINDOW_MS) > duration_ms {
            return Err(RedlockError::Validation(format!(
                "A lock duration of {duration_ms}ms is too short for an automatic \
                 extension threshold of {threshold}ms; it must exceed the threshold \
                 by at least {MIN_RENEWAL_WINDOW_MS}ms"
            )));
        }

        Ok(Self {
            coordinator,
            overrides,
            settings,
            duration,
            phase: Mutex::new(SupervisorPhase::Acquiring),
        })
    }

    pub fn phase(&self) -> SupervisorPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, next: SupervisorPhase) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Lease supervisor: {:?} -> {next:?}", *phase);
        *phase = next;
    }

    /// Acquires `resources`, runs `routine` under renewal and releases the
    /// lock afterwards, whatever the routine's outcome.
    ///
    /// Release failures are logged and never replace the routine's result. A
    /// panic in the routine is resumed once the lock has been released.
    pub fn run<S, T, E, F>(&self, resources: &[S], routine: F) -> std::result::Result<T, E>
    where
        S: AsRef<str>,
        E: From<RedlockError>,
        F: FnOnce(&RedlockAbortSignal) -> std::result::Result<T, E>,
    {
        self.enter(SupervisorPhase::Acquiring);
        let lock = self
            .coordinator
            .acquire(resources, Some(self.duration), self.overrides)?;
        self.enter(SupervisorPhase::Running);

        let signal = RedlockAbortSignal::new();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let (outcome, renewed) = thread::scope(|scope| {
            let signal_ref = &signal;
            let renewal = thread::Builder::new()
                .name("redlock-renewal".to_string())
                .spawn_scoped(scope, move || self.renew(lock, stop_rx, signal_ref));

            let renewal = match renewal {
                Ok(handle) => handle,
                Err(err) => {
                    // `lock` moved into the failed closure and is gone with it;
                    // the lease is left to expire.
                    error!("Failed to start lease renewal: {err}");
                    return (Err(RedlockError::from(err)), None);
                }
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| routine(signal_ref)));
            drop(stop_tx);

            let renewed = match renewal.join() {
                Ok(lock) => Some(lock),
                Err(_) => {
                    error!("Lease renewal thread panicked; the lease is left to expire");
                    None
                }
            };
            (Ok(outcome), renewed)
        });

        self.enter(SupervisorPhase::Releasing);
        if let Some(mut lock) = renewed {
            if let Err(err) = self.coordinator.release(&mut lock, self.overrides) {
                warn!("Failed to release {:?} after use: {err}", lock.resources());
            }
        }
        self.enter(SupervisorPhase::Done);

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(err) => Err(err.into()),
        }
    }

    fn renew(&self, mut lock: Lock, stop: Receiver<()>, signal: &RedlockAbortSignal) -> Lock {
        let threshold = self.settings.automatic_extension_threshold_ms as i64;
        loop {
            let wait_ms = (lock.expiration() - clock::now_millis() - threshold).max(0);
            match stop.recv_timeout(Duration::from_millis(wait_ms as u64)) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return lock,
            }

            self.enter(SupervisorPhase::Extending);
            loop {
                // Retries never outlive the lease they are trying to save.
                let deadline = lock.expiration();
                match self.coordinator.extend_until(
                    &mut lock,
                    self.duration,
                    self.overrides,
                    Some(deadline),
                ) {
                    Ok(next) => {
                        lock = next;
                        self.enter(SupervisorPhase::Running);
                        break;
                    }
                    Err(err) if lock.remaining().is_zero() => {
                        warn!(
                            "Lease on {:?} expired before it could be extended: {err}",
                            lock.resources()
                        );
                        signal.abort(err);
                        self.enter(SupervisorPhase::Aborted);
                        return lock;
                    }
                    Err(err) => {
                        if matches!(stop.try_recv(), Err(TryRecvError::Disconnected)) {
                            debug!("Routine finished while extension was failing: {err}");
                            return lock;
                        }
                        debug!("Extension failed, retrying while the lease is valid: {err}");
                    }
                }
            }
        }
    }
}
