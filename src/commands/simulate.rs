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

use crate::config::RedlockSettings;
use crate::error::{RedlockError, Result};
use crate::locking::{PendingStats, Redlock, StatsReport};
use crate::node::{AtomicStoreClient, MemoryNode};
use colored::*;
use comfy_table::{Cell, CellAlignment, Color, Table};
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub nodes: usize,
    pub down: usize,
    pub slow: usize,
    pub slow_ms: u64,
    pub workers: usize,
    pub resource: String,
    pub duration_ms: Option<u64>,
    pub hold_ms: u64,
    pub retry_count: Option<i64>,
    pub supervised: bool,
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Held,
    Contended,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub worker: usize,
    pub status: WorkerStatus,
    /// Attempts of the acquire call, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<usize>,
    /// For-votes of the last acquire attempt, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes_for: Option<usize>,
    /// How every node voted on the last acquire attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<StatsReport>,
    pub elapsed_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub membership_size: usize,
    pub quorum_size: usize,
    pub nodes_down: usize,
    pub nodes_slow: usize,
    pub supervised: bool,
    pub workers: Vec<WorkerReport>,
}

pub struct SimulateCommand<'a> {
    settings: &'a RedlockSettings,
}

impl<'a> SimulateCommand<'a> {
    pub fn new(settings: &'a RedlockSettings) -> Result<Self> {
        Ok(Self { settings })
    }

    pub fn execute(&self, options: &SimulateOptions) -> Result<()> {
        let report = self.run(options)?;
        if options.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
        Ok(())
    }

    /// Runs contending workers against an in-process cluster.
    pub fn run(&self, options: &SimulateOptions) -> Result<SimulationReport> {
        if options.nodes == 0 || options.workers == 0 {
            return Err(RedlockError::Validation(
                "--nodes and --workers must be at least 1".to_string(),
            ));
        }
        if options.down + options.slow > options.nodes {
            return Err(RedlockError::Validation(format!(
                "Cannot mark {} nodes down and {} slow in a cluster of {}",
                options.down, options.slow, options.nodes
            )));
        }

        let mut settings = self.settings.clone();
        if let Some(retry_count) = options.retry_count {
            settings.retry_count = retry_count;
        }
        if let Some(duration_ms) = options.duration_ms {
            settings.duration_ms = duration_ms;
        }

        let nodes: Vec<Arc<MemoryNode>> = (0..options.nodes)
            .map(|index| Arc::new(MemoryNode::new(format!("node-{index}"))))
            .collect();
        for node in nodes.iter().take(options.down) {
            node.set_available(false);
        }
        for node in nodes.iter().skip(options.down).take(options.slow) {
            node.set_latency(Duration::from_millis(options.slow_ms));
        }

        let clients = nodes
            .iter()
            .map(|node| Arc::clone(node) as Arc<dyn AtomicStoreClient>)
            .collect();
        let redlock = Redlock::builder(clients).settings(settings).build()?;
        info!(
            "Simulating {} workers on {} nodes (quorum {})",
            options.workers,
            redlock.membership_size(),
            redlock.quorum_size()
        );

        let workers = thread::scope(|scope| {
            let handles: Vec<_> = (0..options.workers)
                .map(|worker| {
                    let redlock = &redlock;
                    scope.spawn(move || run_worker(redlock, worker, options))
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| {
                    handle.join().unwrap_or_else(|_| WorkerReport {
                        worker,
                        status: WorkerStatus::Failed,
                        attempts: None,
                        votes_for: None,
                        last_attempt: None,
                        elapsed_ms: 0,
                        error: Some("worker panicked".to_string()),
                    })
                })
                .collect::<Vec<_>>()
        });

        redlock.quit()?;

        Ok(SimulationReport {
            membership_size: redlock.membership_size(),
            quorum_size: redlock.quorum_size(),
            nodes_down: options.down,
            nodes_slow: options.slow,
            supervised: options.supervised,
            workers,
        })
    }
}

fn run_worker(redlock: &Redlock, worker: usize, options: &SimulateOptions) -> WorkerReport {
    let started = Instant::now();
    let resources = [options.resource.as_str()];
    let hold = Duration::from_millis(options.hold_ms);

    let outcome = if options.supervised {
        let duration = Duration::from_millis(redlock.settings().duration_ms);
        redlock
            .using(&resources, duration, None, |signal| {
                thread::sleep(hold);
                Ok::<_, RedlockError>(signal.is_aborted())
            })
            .map(|aborted| (aborted, None))
    } else {
        redlock.acquire(&resources, None, None).map(|mut lock| {
            let attempts = (lock.attempts().len(), last_report(lock.attempts()));
            thread::sleep(hold);
            if let Err(err) = lock.release() {
                debug!("Worker {worker} could not release cleanly: {err}");
            }
            (false, Some(attempts))
        })
    };

    let elapsed_ms = started.elapsed().as_millis();
    match outcome {
        Ok((aborted, counts)) => WorkerReport {
            worker,
            status: if aborted {
                WorkerStatus::Aborted
            } else {
                WorkerStatus::Held
            },
            attempts: counts.as_ref().map(|(attempts, _)| *attempts),
            votes_for: counts
                .as_ref()
                .and_then(|(_, last)| last.as_ref())
                .map(|last| last.votes_for.len()),
            last_attempt: counts.and_then(|(_, last)| last),
            elapsed_ms,
            error: None,
        },
        Err(err) if err.is_quorum_failure() => {
            let last = last_report(err.attempts());
            WorkerReport {
                worker,
                status: WorkerStatus::Contended,
                attempts: Some(err.attempts().len()),
                votes_for: last.as_ref().map(|last| last.votes_for.len()),
                last_attempt: last,
                elapsed_ms,
                error: Some(err.to_string()),
            }
        }
        Err(err) => WorkerReport {
            worker,
            status: WorkerStatus::Failed,
            attempts: None,
            votes_for: None,
            last_attempt: None,
            elapsed_ms,
            error: Some(err.to_string()),
        },
    }
}

fn print_report(report: &SimulationReport) {
    println!(
        "{} nodes ({} down, {} slow), quorum {}{}",
        report.membership_size,
        report.nodes_down,
        report.nodes_slow,
        report.quorum_size,
        if report.supervised { ", supervised" } else { "" }
    );

    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_BORDERS_ONLY);
    table.set_header(vec![
        Cell::new("Worker"),
        Cell::new("Outcome"),
        Cell::new("Attempts"),
        Cell::new("Votes for"),
        Cell::new("Elapsed"),
    ]);

    for worker in &report.workers {
        let outcome = match worker.status {
            WorkerStatus::Held => Cell::new("held").fg(Color::Green),
            WorkerStatus::Contended => Cell::new("no quorum").fg(Color::Yellow),
            WorkerStatus::Aborted => Cell::new("aborted").fg(Color::Red),
            WorkerStatus::Failed => Cell::new("failed").fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(worker.worker).set_alignment(CellAlignment::Right),
            outcome,
            Cell::new(display_count(worker.attempts)).set_alignment(CellAlignment::Right),
            Cell::new(display_count(worker.votes_for)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{}ms", worker.elapsed_ms)).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{table}");

    let held = report
        .workers
        .iter()
        .filter(|worker| matches!(worker.status, WorkerStatus::Held))
        .count();
    if held == report.workers.len() {
        println!("{} Every worker held the lock", "✓".green().bold());
    } else {
        println!(
            "{} {held} of {} workers held the lock",
            "✗".red(),
            report.workers.len()
        );
    }
}

/// Final tally of the last attempt in `attempts`.
fn last_report(attempts: &[PendingStats]) -> Option<StatsReport> {
    attempts.last().map(|stats| stats.wait().report())
}

fn display_count(count: Option<usize>) -> String {
    count.map_or_else(|| "-".to_string(), |count| count.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SimulateOptions {
        SimulateOptions {
            nodes: 3,
            down: 0,
            slow: 0,
            slow_ms: 0,
            workers: 2,
            resource: "printer".to_string(),
            duration_ms: Some(5_000),
            hold_ms: 10,
            retry_count: None,
            supervised: false,
            json: true,
        }
    }

    fn settings() -> RedlockSettings {
        RedlockSettings {
            retry_delay_ms: 20,
            retry_jitter_ms: 5,
            retry_count: 50,
            ..RedlockSettings::default()
        }
    }

    #[test]
    fn contending_workers_take_turns() {
        let settings = settings();
        let report = SimulateCommand::new(&settings)
            .unwrap()
            .run(&options())
            .unwrap();

        assert_eq!(report.quorum_size, 2);
        assert_eq!(report.workers.len(), 2);
        assert!(
            report
                .workers
                .iter()
                .all(|worker| matches!(worker.status, WorkerStatus::Held))
        );
    }

    #[test]
    fn majority_down_means_no_quorum() {
        let settings = settings();
        let options = SimulateOptions {
            down: 2,
            workers: 1,
            retry_count: Some(1),
            ..options()
        };
        let report = SimulateCommand::new(&settings)
            .unwrap()
            .run(&options)
            .unwrap();

        let worker = &report.workers[0];
        assert!(matches!(worker.status, WorkerStatus::Contended));
        assert_eq!(worker.attempts, Some(2));
        // node-2 granted the first attempt, so it refuses the retry.
        assert_eq!(worker.votes_for, Some(0));
        let last = worker.last_attempt.as_ref().unwrap();
        assert_eq!(last.votes_against.len(), 3);
        assert!(last.votes_against["node-0"].contains("unavailable"));
    }

    #[test]
    fn rejects_impossible_fault_layout() {
        let settings = settings();
        let options = SimulateOptions {
            down: 2,
            slow: 2,
            ..options()
        };
        let err = SimulateCommand::new(&settings)
            .unwrap()
            .run(&options)
            .unwrap_err();
        assert!(matches!(err, RedlockError::Validation(_)));
    }
}
