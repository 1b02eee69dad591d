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

//! Quorum-based distributed locking.
//!
//! A lock is held when a majority of independent nodes have granted it. Each
//! operation fans out to every node ([`quorum`]), is retried with jittered
//! backoff ([`retry`]) and produces a [`Lock`] whose expiration accounts for
//! clock drift. [`Redlock::using`] adds automatic renewal around a routine.

pub mod clock;
pub mod coordinator;
pub mod lock;
pub mod observer;
pub mod quorum;
pub mod retry;
pub mod signal;
pub mod supervisor;

pub use coordinator::{Redlock, RedlockBuilder};
pub use lock::Lock;
pub use observer::{LoggingObserver, NodeErrorObserver, NoopObserver};
pub use quorum::{
    AttemptOutcome, ExecutionStats, PendingStats, QuorumExecutor, StatsReport, Vote, quorum_size,
};
pub use retry::{ExecutionResult, JitteredBackoff, RetryCoordinator};
pub use signal::RedlockAbortSignal;
pub use supervisor::{LeaseSupervisor, SupervisorPhase};
