use crate::error::RedlockError;

pub fn get_exit_code(error: &RedlockError) -> i32 {
    match error {
        RedlockError::Validation(_) | RedlockError::Config(_) => 2,

        RedlockError::QuorumFailure { .. } => 3,

        RedlockError::AlreadyExpired | RedlockError::LeaseLost(_) => 4,

        RedlockError::UnexpectedNode { .. } | RedlockError::Node(_) => 20,

        _ => 1,
    }
}
