// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Every rank takes the group mutex and writes one line per round to the
// shared console.
//
// Usage:
//   mutex_demo [--np N] [--rounds R]
//
// Started without RMALOCK_RANK in the environment, the binary acts as the
// launcher and re-executes itself once per rank.

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rmalock::config::ENV_RANK;
use rmalock::launch::{fresh_group_name, spawn_group, wait_group};
use rmalock::{Group, GroupConfig, Mutex};

#[derive(Debug, Parser)]
#[command(about = "Serialise console output of a process group with rmalock::Mutex")]
struct Args {
    /// Number of ranks to launch.
    #[arg(short = 'n', long = "np", default_value_t = 4)]
    np: usize,

    /// Lock/unlock rounds per rank.
    #[arg(short = 'r', long = "rounds", default_value_t = 1)]
    rounds: usize,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn launch(args: &Args) -> rmalock::Result<bool> {
    let exe = std::env::current_exe()?;
    let forwarded = [
        "--np".to_string(),
        args.np.to_string(),
        "--rounds".to_string(),
        args.rounds.to_string(),
    ];
    let group = fresh_group_name("mutex_demo");
    tracing::info!(%group, np = args.np, "launching ranks");
    let ranks = spawn_group(&exe, &forwarded, args.np, &group)?;
    wait_group(ranks)
}

fn run_rank(args: &Args) -> rmalock::Result<()> {
    let config = GroupConfig::from_env()?;
    let mut world = Group::join(&config)?;
    let mut mutex = Mutex::new(&mut world)?;

    for round in 0..args.rounds {
        let held = mutex.guard()?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{} is the best rank! (round {round})", config.rank)?;
        out.flush()?;
        drop(out);
        held.unlock()?;
    }

    tracing::debug!(stats = ?mutex.stats(), "rank finished");
    mutex.free()?;
    world.free()
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let outcome = if std::env::var_os(ENV_RANK).is_some() {
        run_rank(&args).map(|()| true)
    } else {
        launch(&args)
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "mutex demo failed");
            ExitCode::FAILURE
        }
    }
}
