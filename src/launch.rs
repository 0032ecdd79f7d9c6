// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Local process launcher: starts one copy of a program per rank, each with
// its group identity in the environment, and reaps them.

use std::ffi::OsStr;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::GroupConfig;
use crate::error::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One spawned member of a group.
#[derive(Debug)]
pub struct RankProcess {
    pub rank: usize,
    child: Child,
}

impl RankProcess {
    /// Forcefully terminate the rank.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            tracing::debug!(rank = self.rank, error = %e, "kill failed");
        }
        // Reap so no zombie is left behind.
        let _ = self.child.wait();
    }

    /// Exit status if the rank has exited, without blocking.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }
}

// ---------------------------------------------------------------------------
// spawn
// ---------------------------------------------------------------------------

/// Start `size` copies of `program` forming group `group`.
///
/// Rank `r` gets `RMALOCK_GROUP=group`, `RMALOCK_RANK=r` and
/// `RMALOCK_SIZE=size`. If any rank fails to start, the ranks already running
/// are killed: they would block forever in the first collective call.
pub fn spawn_group<P, A>(program: P, args: &[A], size: usize, group: &str) -> Result<Vec<RankProcess>>
where
    P: AsRef<OsStr>,
    A: AsRef<OsStr>,
{
    GroupConfig::new(group, 0, size).validate()?;

    let mut ranks: Vec<RankProcess> = Vec::with_capacity(size);
    for rank in 0..size {
        let config = GroupConfig::new(group, rank, size);
        let spawned = Command::new(program.as_ref())
            .args(args)
            .envs(config.to_env())
            .spawn();
        match spawned {
            Ok(child) => {
                tracing::debug!(rank, pid = child.id(), "spawned rank");
                ranks.push(RankProcess { rank, child });
            }
            Err(e) => {
                tracing::error!(rank, error = %e, "failed to spawn rank, killing the others");
                for r in &mut ranks {
                    r.kill();
                }
                return Err(e.into());
            }
        }
    }
    Ok(ranks)
}

// ---------------------------------------------------------------------------
// wait
// ---------------------------------------------------------------------------

/// Wait for every rank. Returns `true` if all of them exited successfully.
///
/// A failed rank leaves its peers blocked, so the first failure of any rank
/// kills every rank still running (fail-stop).
pub fn wait_group(mut running: Vec<RankProcess>) -> Result<bool> {
    while !running.is_empty() {
        let mut i = 0;
        while i < running.len() {
            let Some(status) = running[i].try_wait()? else {
                i += 1;
                continue;
            };
            let done = running.swap_remove(i);
            if !status.success() {
                tracing::error!(rank = done.rank, %status, "rank failed, killing the others");
                for other in &mut running {
                    other.kill();
                }
                return Ok(false);
            }
            tracing::debug!(rank = done.rank, "rank exited");
        }
        if !running.is_empty() {
            thread::sleep(POLL_INTERVAL);
        }
    }
    Ok(true)
}

/// A group name unlikely to collide with any other run on this host.
pub fn fresh_group_name(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{prefix}-{}-{nanos:x}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names_are_valid_group_names() {
        let name = fresh_group_name("demo");
        assert!(name.starts_with("demo-"));
        GroupConfig::new(name, 0, 1).validate().expect("valid");
    }

    #[test]
    fn spawn_rejects_empty_group() {
        assert!(spawn_group("true", &[] as &[&str], 0, "g").is_err());
    }

    #[test]
    fn spawn_and_wait_reports_success_and_failure() {
        let ok = spawn_group("true", &[] as &[&str], 3, "launch_ok").expect("spawn");
        assert_eq!(ok.len(), 3);
        assert!(wait_group(ok).expect("wait"));

        let bad = spawn_group("false", &[] as &[&str], 2, "launch_bad").expect("spawn");
        assert!(!wait_group(bad).expect("wait"));
    }

    #[test]
    fn failed_rank_stops_the_group_promptly() {
        let script = r#"if [ "$RMALOCK_RANK" = 0 ]; then sleep 30; else exit 1; fi"#;
        let ranks = spawn_group("sh", &["-c", script], 2, "launch_failfast").expect("spawn");

        let start = std::time::Instant::now();
        assert!(!wait_group(ranks).expect("wait"));
        assert!(start.elapsed() < Duration::from_secs(10), "took {:?}", start.elapsed());
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let err = spawn_group("/nonexistent/rmalock-rank", &[] as &[&str], 2, "launch_missing");
        assert!(err.is_err());
    }
}
