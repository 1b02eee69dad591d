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

use clap::{Parser, Subcommand};
use quorum_lock::commands::settings::SettingsCommand;
use quorum_lock::commands::simulate::{SimulateCommand, SimulateOptions};
use quorum_lock::config::RedlockSettings;
use quorum_lock::error::{Result, format_error_with_color, get_exit_code};
use quorum_lock::logging;
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quorum-lock")]
#[command(author, version, about = "Quorum-based distributed locking toolkit", long_about = None)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file (defaults to ./redlock.toml when present)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run contending workers against an in-process cluster
    #[command(visible_alias = "sim")]
    Simulate {
        /// Number of nodes in the cluster
        #[arg(long, default_value_t = 5)]
        nodes: usize,

        /// Nodes that refuse every connection
        #[arg(long, default_value_t = 0)]
        down: usize,

        /// Nodes that answer slowly
        #[arg(long, default_value_t = 0)]
        slow: usize,

        /// Latency of slow nodes in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 100)]
        slow_ms: u64,

        /// Number of concurrent workers
        #[arg(short, long, default_value_t = 3)]
        workers: usize,

        /// Resource the workers contend for
        #[arg(long, default_value = "shared-resource")]
        resource: String,

        /// Lease duration in milliseconds (defaults to the configured duration)
        #[arg(long, value_name = "MS")]
        duration: Option<u64>,

        /// How long each worker holds the lock, in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 50)]
        hold_ms: u64,

        /// Retries after the first attempt (-1 retries forever)
        #[arg(long, allow_negative_numbers = true)]
        retry_count: Option<i64>,

        /// Hold the lock through automatic renewal
        #[arg(long)]
        supervised: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved lock settings
    Settings {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn setup_logger(cli: &Cli) {
    logging::setup_logger(cli.verbose);
}

fn main() {
    let cli = Cli::parse();

    // Initialize logger based on CLI flags and environment
    setup_logger(&cli);

    // Load settings once at startup
    let settings = match RedlockSettings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprint!("{}", format_error_with_color(&e, std::io::stderr().is_terminal()));
            std::process::exit(get_exit_code(&e));
        }
    };

    let result: Result<()> = (|| match cli.command {
        Commands::Simulate {
            nodes,
            down,
            slow,
            slow_ms,
            workers,
            resource,
            duration,
            hold_ms,
            retry_count,
            supervised,
            json,
        } => {
            let command = SimulateCommand::new(&settings)?;
            command.execute(&SimulateOptions {
                nodes,
                down,
                slow,
                slow_ms,
                workers,
                resource,
                duration_ms: duration,
                hold_ms,
                retry_count,
                supervised,
                json,
            })
        }
        Commands::Settings { json } => {
            let command = SettingsCommand::new(&settings)?;
            command.execute(json)
        }
    })();

    if let Err(e) = result {
        eprint!("{}", format_error_with_color(&e, std::io::stderr().is_terminal()));
        std::process::exit(get_exit_code(&e));
    }
}
