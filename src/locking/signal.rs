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

use crate::error::{RedlockError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Token telling a supervised routine that its lease could not be renewed.
///
/// The supervisor cannot interrupt a routine; the routine is expected to call
/// [`check`](Self::check) (or [`is_aborted`](Self::is_aborted)) before any
/// step that relies on exclusive access.
#[derive(Debug, Clone)]
pub struct RedlockAbortSignal {
    flag: Arc<AtomicBool>,
    error: Arc<OnceLock<Arc<RedlockError>>>,
}

impl RedlockAbortSignal {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            error: Arc::new(OnceLock::new()),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// The extension error that caused the abort.
    pub fn error(&self) -> Option<Arc<RedlockError>> {
        if self.is_aborted() {
            self.error.get().cloned()
        } else {
            None
        }
    }

    /// Returns [`RedlockError::LeaseLost`] once the signal has been aborted.
    pub fn check(&self) -> Result<()> {
        match self.error() {
            Some(error) => Err(RedlockError::LeaseLost(error)),
            None => Ok(()),
        }
    }

    /// Records `error` and marks the signal aborted. Only the first call wins.
    pub(crate) fn abort(&self, error: RedlockError) {
        let _ = self.error.set(Arc::new(error));
        self.flag.store(true, Ordering::Release);
    }
}

impl Default for RedlockAbortSignal {
    fn default() -> Self {
        Self::new()
    }
}
