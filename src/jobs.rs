// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Pull-based task queue: one dispatcher, any number of workers.
//
// Workers announce readiness, the dispatcher answers each announcement with
// exactly one task, and once the tasks run out it unicasts AllDone to every
// member. All traffic runs on a private duplicate of the caller's context.

use crate::error::{Error, Result};
use crate::group::{Group, Source, Tag, TagFilter};

/// Rank that hands out tasks.
pub const DISPATCHER_RANK: usize = 0;

const F64_BYTES: usize = std::mem::size_of::<f64>();

/// Message kinds of the job protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum JobTag {
    /// Worker is ready for another task. No payload.
    Ready = 0,
    /// Payload is a task: a sequence of little-endian `f64`.
    Task = 1,
    /// No more tasks. No payload.
    AllDone = 2,
}

impl JobTag {
    pub fn from_tag(tag: Tag) -> Option<Self> {
        match tag {
            0 => Some(Self::Ready),
            1 => Some(Self::Task),
            2 => Some(Self::AllDone),
            _ => None,
        }
    }

    pub fn tag(self) -> Tag {
        self as Tag
    }
}

fn encode_task(task: &[f64]) -> Vec<u8> {
    task.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_task(payload: &[u8]) -> Result<Vec<f64>> {
    if payload.len() % F64_BYTES != 0 {
        return Err(Error::MalformedTask(payload.len()));
    }
    Ok(payload
        .chunks_exact(F64_BYTES)
        .map(|b| {
            let mut raw = [0u8; F64_BYTES];
            raw.copy_from_slice(b);
            f64::from_le_bytes(raw)
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Dispatcher side, run on [`DISPATCHER_RANK`].
pub struct Dispatcher {
    group: Group,
}

impl Dispatcher {
    /// Collective with [`Worker::new`] on the other ranks: both duplicate
    /// `base`.
    pub fn new(base: &mut Group) -> Result<Self> {
        Ok(Self { group: base.dup()? })
    }

    /// Block until some worker is ready; returns its rank.
    pub fn wait_for_ready(&mut self) -> Result<usize> {
        let env = self
            .group
            .recv(Source::Any, TagFilter::Exact(JobTag::Ready.tag()))?;
        Ok(env.source)
    }

    pub fn send_task(&mut self, task: &[f64], dest: usize) -> Result<()> {
        self.group
            .send(dest, JobTag::Task.tag(), &encode_task(task))
    }

    /// Tell every member, in rank order, that no tasks remain.
    pub fn done(&mut self) -> Result<()> {
        for rank in 0..self.group.size() {
            self.group.send(rank, JobTag::AllDone.tag(), &[])?;
        }
        tracing::debug!(members = self.group.size(), "sent all-done");
        Ok(())
    }

    /// Hand out every task to the next ready worker, then send AllDone.
    /// Returns the number of tasks sent.
    pub fn dispatch_all<I>(&mut self, tasks: I) -> Result<usize>
    where
        I: IntoIterator<Item = Vec<f64>>,
    {
        let mut sent = 0;
        for task in tasks {
            let dest = self.wait_for_ready()?;
            self.send_task(&task, dest)?;
            sent += 1;
        }
        self.done()?;
        Ok(sent)
    }

    /// The private context the protocol runs on.
    pub fn group(&mut self) -> &mut Group {
        &mut self.group
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Worker side, run on every rank but [`DISPATCHER_RANK`].
pub struct Worker {
    group: Group,
}

impl Worker {
    pub fn new(base: &mut Group) -> Result<Self> {
        Ok(Self { group: base.dup()? })
    }

    pub fn notify_ready(&mut self) -> Result<()> {
        self.group
            .send(DISPATCHER_RANK, JobTag::Ready.tag(), &[])
    }

    /// Next task, or `None` once the dispatcher has sent AllDone.
    pub fn recv_task(&mut self) -> Result<Option<Vec<f64>>> {
        let from = Source::Rank(DISPATCHER_RANK);
        let status = self.group.probe(from, TagFilter::Any)?;
        match JobTag::from_tag(status.tag) {
            Some(JobTag::Task) => {
                let env = self.group.recv(from, TagFilter::Exact(status.tag))?;
                decode_task(&env.payload).map(Some)
            }
            Some(JobTag::AllDone) => {
                self.group.recv(from, TagFilter::Exact(status.tag))?;
                Ok(None)
            }
            _ => Err(Error::UnexpectedTag {
                tag: status.tag,
                from: status.source,
            }),
        }
    }

    pub fn group(&mut self) -> &mut Group {
        &mut self.group
    }
}
