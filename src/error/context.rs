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

use crate::error::RedlockError;
use std::fmt;

pub struct ErrorContext<'a> {
    pub error: &'a RedlockError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(error: &'a RedlockError) -> Self {
        let (suggestion, details) = match error {
            RedlockError::Validation(msg) => {
                let suggestion = Some(
                    "Lock durations must be whole milliseconds and at least 100ms longer than \
                     the automatic extension threshold."
                        .to_string(),
                );
                let details = Some(format!("Rejected input: {msg}"));
                (suggestion, details)
            }
            RedlockError::QuorumFailure { attempts, .. } => {
                let suggestion = Some(
                    "Another holder may own the resource. Retry later, or raise --retry-count \
                     if contention is expected."
                        .to_string(),
                );
                let details = if attempts.is_empty() {
                    None
                } else {
                    Some(format!(
                        "Attempts:\n{}",
                        attempts
                            .iter()
                            .enumerate()
                            .map(|(index, pending)| {
                                let stats = pending.snapshot();
                                format!(
                                    "  - #{}: {} for, {} against (quorum {} of {})",
                                    index + 1,
                                    stats.votes_for.len(),
                                    stats.votes_against.len(),
                                    stats.quorum_size,
                                    stats.membership_size
                                )
                            })
                            .collect::<Vec<_>>()
                            .join("\n")
                    ))
                };
                (suggestion, details)
            }
            RedlockError::AlreadyExpired => {
                let suggestion =
                    Some("Acquire a fresh lock instead of extending an expired one.".to_string());
                (suggestion, None)
            }
            RedlockError::UnexpectedNode { node, .. } => {
                let suggestion = Some(format!(
                    "The client for node '{node}' is misbehaving. Check its connection and \
                     protocol version."
                ));
                (suggestion, None)
            }
            RedlockError::LeaseLost(source) => {
                let suggestion = Some(
                    "Abort any side effects that depend on exclusive access; the lease could not \
                     be renewed before it expired."
                        .to_string(),
                );
                let details = Some(format!("Last extension error: {source}"));
                (suggestion, details)
            }
            RedlockError::Config(msg) => {
                let suggestion = Some(
                    "Check the settings file and REDLOCK_* environment variables.".to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            RedlockError::Io(io_err) => {
                let details = Some(format!("I/O error: {io_err}"));
                (None, details)
            }
            _ => (None, None),
        };

        ErrorContext {
            error,
            suggestion,
            details,
        }
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

impl<'a> fmt::Display for ErrorContext<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\n\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}
