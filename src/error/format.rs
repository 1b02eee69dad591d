//! User-facing rendering of lock errors.
//!
//! Quorum failures are rendered with the per-node votes of their last attempt,
//! so the reader can see which nodes refused and why instead of only a count.

use crate::error::{ErrorContext, RedlockError};
use crate::locking::{PendingStats, StatsReport};

struct Palette {
    error: &'static str,
    granted: &'static str,
    refused: &'static str,
    hint: &'static str,
    bold: &'static str,
    reset: &'static str,
}

impl Palette {
    fn new(use_color: bool) -> Self {
        if use_color {
            Self {
                error: "\x1b[31m",
                granted: "\x1b[32m",
                refused: "\x1b[33m",
                hint: "\x1b[36m",
                bold: "\x1b[1m",
                reset: "\x1b[0m",
            }
        } else {
            Self {
                error: "",
                granted: "",
                refused: "",
                hint: "",
                bold: "",
                reset: "",
            }
        }
    }
}

pub fn format_error_chain(error: &RedlockError) -> String {
    ErrorContext::new(error).to_string()
}

/// Renders `error` for a terminal, optionally with ANSI colors.
pub fn format_error_with_color(error: &RedlockError, use_color: bool) -> String {
    let palette = Palette::new(use_color);
    let context = ErrorContext::new(error);
    let mut output = format!(
        "{}{}Error:{} {error}\n",
        palette.error, palette.bold, palette.reset
    );

    let attempts = quorum_attempts(error);
    match attempts.last() {
        Some(last) => {
            output.push_str(&render_votes(attempts.len(), &last.snapshot().report(), &palette));
        }
        None => {
            if let Some(details) = &context.details {
                output.push_str(&format!("\n{details}\n"));
            }
        }
    }

    if let Some(suggestion) = &context.suggestion {
        output.push_str(&format!(
            "\n{}{}Suggestions:{}\n",
            palette.hint, palette.bold, palette.reset
        ));
        for line in suggestion.lines().filter(|line| !line.trim().is_empty()) {
            output.push_str(&format!("{}• {line}{}\n", palette.hint, palette.reset));
        }
    }

    if use_color {
        output.push_str(palette.reset);
    }
    output
}

/// Attempt stats behind `error`, looking through a lost lease to the
/// extension that ended it.
fn quorum_attempts(error: &RedlockError) -> &[PendingStats] {
    match error {
        RedlockError::LeaseLost(source) => quorum_attempts(source),
        other => other.attempts(),
    }
}

fn render_votes(attempts: usize, last: &StatsReport, palette: &Palette) -> String {
    let mut output = format!(
        "\nLast of {attempts} attempt(s): {} for, {} against, {} needed of {} nodes\n",
        last.votes_for.len(),
        last.votes_against.len(),
        last.quorum_size,
        last.membership_size
    );
    for node in &last.votes_for {
        output.push_str(&format!(
            "  {}+{} {node}: granted\n",
            palette.granted, palette.reset
        ));
    }
    for (node, reason) in &last.votes_against {
        output.push_str(&format!(
            "  {}-{} {node}: {reason}\n",
            palette.refused, palette.reset
        ));
    }
    let silent = last
        .membership_size
        .saturating_sub(last.votes_for.len() + last.votes_against.len());
    if silent > 0 {
        output.push_str(&format!("  ({silent} node(s) had not answered yet)\n"));
    }
    output
}
