mod context;
mod exit_codes;
mod format;

pub use context::ErrorContext;
pub use exit_codes::get_exit_code;
pub use format::{format_error_chain, format_error_with_color};

use crate::locking::quorum::PendingStats;
use crate::node::NodeError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedlockError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{message}")]
    QuorumFailure {
        message: String,
        attempts: Vec<PendingStats>,
    },

    #[error("Cannot extend an already-expired lock.")]
    AlreadyExpired,

    #[error("Node '{node}' failed unexpectedly: {details}")]
    UnexpectedNode { node: String, details: String },

    #[error("Lock extension failed; exclusivity is no longer guaranteed: {0}")]
    LeaseLost(Arc<RedlockError>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RedlockError {
    pub(crate) fn quorum_failure(attempts: Vec<PendingStats>) -> Self {
        RedlockError::QuorumFailure {
            message: "The operation was unable to achieve a quorum during its retry window."
                .to_string(),
            attempts,
        }
    }

    /// Attempt stats carried by a quorum failure, empty for every other error.
    pub fn attempts(&self) -> &[PendingStats] {
        match self {
            RedlockError::QuorumFailure { attempts, .. } => attempts,
            _ => &[],
        }
    }

    pub fn is_quorum_failure(&self) -> bool {
        matches!(self, RedlockError::QuorumFailure { .. })
    }
}

/// Why a single node voted against an operation.
///
/// These never reach callers directly; they are recorded in attempt stats and
/// handed to the coordinator's error observer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("The operation was applied to: {applied} of the {requested} requested resources.")]
    ResourceLocked { applied: i64, requested: usize },

    #[error(transparent)]
    Store(#[from] NodeError),

    #[error("Unexpected result returned from node: {0}")]
    UnexpectedReply(String),

    #[error("Node did not respond within {0:?}")]
    TimedOut(std::time::Duration),
}

impl VoteError {
    pub fn is_resource_locked(&self) -> bool {
        matches!(self, VoteError::ResourceLocked { .. })
    }
}

pub type Result<T> = std::result::Result<T, RedlockError>;
