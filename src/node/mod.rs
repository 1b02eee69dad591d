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

//! Storage node abstraction.
//!
//! Each node is an independent key-value replica that can run the three lock
//! scripts atomically. The coordinator never assumes nodes talk to each other.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod script;

pub use memory::MemoryNode;
pub use script::{Script, ScriptKind, ScriptSet};

use thiserror::Error;

/// Raw reply of a script evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    Integer(i64),
    /// Anything that is not an integer, rendered for diagnostics.
    Other(String),
}

/// Errors a node client reports through its normal error channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The node does not have the script cached under its digest.
    #[error("NOSCRIPT {0}")]
    NoScript(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Response error: {0}")]
    Response(String),
}

/// Handle to one storage node.
///
/// Implementations must run each script atomically with respect to other
/// callers of the same node. A panic inside any of these methods is treated as
/// a broken client and aborts the operation that triggered it.
pub trait AtomicStoreClient: Send + Sync {
    /// Stable, unique name used in stats and logs.
    fn name(&self) -> &str;

    /// Evaluate a script the node has (hopefully) cached under `script.digest()`.
    fn eval_cached(
        &self,
        script: &Script,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, NodeError>;

    /// Evaluate the full script body, caching it on the node for later calls.
    fn eval(
        &self,
        script: &Script,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, NodeError>;

    /// Close the connection to the node.
    fn quit(&self) -> Result<(), NodeError> {
        Ok(())
    }
}
