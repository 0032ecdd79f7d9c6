// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Rank 0 hands out single-value tasks; every other rank pulls tasks and
// prints each one while holding the group mutex.
//
// Usage:
//   dispatch_demo [--np N] [--tasks T]

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rmalock::config::ENV_RANK;
use rmalock::launch::{fresh_group_name, spawn_group, wait_group};
use rmalock::{Dispatcher, Group, GroupConfig, Mutex, Worker, DISPATCHER_RANK};

#[derive(Debug, Parser)]
#[command(about = "Pull-based task queue over a process group")]
struct Args {
    /// Number of ranks to launch (at least 2).
    #[arg(short = 'n', long = "np", default_value_t = 4)]
    np: usize,

    /// Tasks handed out by the dispatcher.
    #[arg(short = 't', long = "tasks", default_value_t = 100)]
    tasks: usize,
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
        "--tasks".to_string(),
        args.tasks.to_string(),
    ];
    let group = fresh_group_name("dispatch_demo");
    tracing::info!(%group, np = args.np, tasks = args.tasks, "launching ranks");
    let ranks = spawn_group(&exe, &forwarded, args.np, &group)?;
    wait_group(ranks)
}

fn dispatch(world: &mut Group, tasks: usize) -> rmalock::Result<()> {
    let mut dispatcher = Dispatcher::new(world)?;
    let sent = dispatcher.dispatch_all((0..tasks).map(|n| vec![n as f64]))?;
    tracing::info!(sent, "all tasks dispatched");
    Ok(())
}

fn work(world: &mut Group, mutex: &mut Mutex) -> rmalock::Result<()> {
    let rank = world.rank();
    let mut worker = Worker::new(world)?;
    loop {
        worker.notify_ready()?;
        let Some(task) = worker.recv_task()? else {
            break;
        };

        let held = mutex.guard()?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{rank} got task data {}!", task.first().copied().unwrap_or_default())?;
        out.flush()?;
        drop(out);
        held.unlock()?;
    }
    Ok(())
}

fn run_rank(args: &Args) -> rmalock::Result<()> {
    let config = GroupConfig::from_env()?;
    let mut world = Group::join(&config)?;
    let mut mutex = Mutex::new(&mut world)?;

    if world.size() == 1 {
        println!("This demo requires more than one process");
    } else if world.rank() == DISPATCHER_RANK {
        dispatch(&mut world, args.tasks)?;
    } else {
        work(&mut world, &mut mutex)?;
    }

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
            tracing::error!(error = %e, "dispatch demo failed");
            ExitCode::FAILURE
        }
    }
}
