// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Group context: a fixed set of ranks plus a private message channel.
//
// Each rank of a context owns one inbox; every member maps every inbox of
// the context at construction. Receives are selective: envelopes that do
// not match the requested (source, tag) are parked in a local queue and
// matched first on later receives, which keeps per-pair FIFO order.

use std::collections::VecDeque;

use crate::config::GroupConfig;
use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::shm_name;

pub use crate::mailbox::{Envelope, Tag, MAX_MESSAGE_LEN};

/// Reserved for barrier traffic; never delivered to user receives.
pub(crate) const BARRIER_TAG: Tag = Tag::MAX;
const BARRIER_ROOT: usize = 0;

/// Which sender a receive accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Any,
    Rank(usize),
}

/// Which tags a receive accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFilter {
    Any,
    Exact(Tag),
}

/// Metadata of a message found by [`Group::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub source: usize,
    pub tag: Tag,
    /// Payload length in bytes.
    pub len: usize,
}

/// Messages this member has sent and taken from its inbox on one context,
/// internal barrier traffic included.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrafficStats {
    pub sent: u64,
    pub received: u64,
}

fn matches(env: &Envelope, source: Source, tag: TagFilter) -> bool {
    let source_ok = match source {
        Source::Any => true,
        Source::Rank(r) => env.source == r,
    };
    let tag_ok = match tag {
        TagFilter::Any => env.tag != BARRIER_TAG,
        TagFilter::Exact(t) => env.tag == t,
    };
    source_ok && tag_ok
}

/// One member's handle on a group context.
///
/// Construction ([`Group::join`], [`Group::dup`]) and [`Group::free`] are
/// collective: every member must make the same calls in the same order.
/// Dropping a handle only releases this member's mappings; shared segments
/// disappear once the last member lets go of them.
pub struct Group {
    id: String,
    rank: usize,
    size: usize,
    inboxes: Vec<Mailbox>,
    parked: VecDeque<Envelope>,
    next_child: u32,
    next_window: u32,
    stats: TrafficStats,
}

impl Group {
    /// Join the group described by `config`. Collective over all members.
    pub fn join(config: &GroupConfig) -> Result<Self> {
        config.validate()?;
        Self::open(config.name.clone(), config.rank, config.size)
    }

    fn open(id: String, rank: usize, size: usize) -> Result<Self> {
        let inboxes = (0..size)
            .map(|r| Mailbox::open(&shm_name::mailbox(&id, r)))
            .collect::<Result<Vec<_>>>()?;

        let mut group = Self {
            id,
            rank,
            size,
            inboxes,
            parked: VecDeque::new(),
            next_child: 0,
            next_window: 0,
            stats: TrafficStats::default(),
        };
        // Nobody sends before every owner holds its inbox open.
        group.barrier()?;
        tracing::debug!(context = %group.id, rank, size, "joined group context");
        Ok(group)
    }

    /// Create a private duplicate of this context: same members and ranks,
    /// disjoint traffic. Collective; members must duplicate in the same order.
    pub fn dup(&mut self) -> Result<Group> {
        let id = shm_name::child_context(&self.id, self.next_child);
        self.next_child += 1;
        Self::open(id, self.rank, self.size)
    }

    /// Collective teardown: waits for every member, then releases.
    pub fn free(mut self) -> Result<()> {
        self.barrier()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Context id; shared resources of the context are named after it.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    /// Send `payload` to `dest` with `tag`. Blocks only while the
    /// destination's inbox is full.
    pub fn send(&mut self, dest: usize, tag: Tag, payload: &[u8]) -> Result<()> {
        if tag == BARRIER_TAG {
            return Err(Error::ReservedTag(tag));
        }
        self.post(dest, tag, payload)
    }

    /// Block until a message matching `source` and `tag` arrives, and
    /// remove it.
    pub fn recv(&mut self, source: Source, tag: TagFilter) -> Result<Envelope> {
        self.check_filters(source, tag)?;
        self.take_matching(source, tag)
    }

    /// Block until a message matching `source` and `tag` is available and
    /// describe it without removing it.
    pub fn probe(&mut self, source: Source, tag: TagFilter) -> Result<Status> {
        self.check_filters(source, tag)?;
        let status = |env: &Envelope| Status {
            source: env.source,
            tag: env.tag,
            len: env.payload.len(),
        };
        if let Some(env) = self.parked.iter().find(|e| matches(e, source, tag)) {
            return Ok(status(env));
        }
        loop {
            let env = self.pull()?;
            let found = matches(&env, source, tag).then(|| status(&env));
            self.parked.push_back(env);
            if let Some(found) = found {
                return Ok(found);
            }
        }
    }

    /// Block until every member has entered the barrier.
    pub fn barrier(&mut self) -> Result<()> {
        if self.size == 1 {
            return Ok(());
        }
        let filter = TagFilter::Exact(BARRIER_TAG);
        if self.rank == BARRIER_ROOT {
            for _ in 1..self.size {
                self.take_matching(Source::Any, filter)?;
            }
            for r in (0..self.size).filter(|&r| r != BARRIER_ROOT) {
                self.post(r, BARRIER_TAG, &[])?;
            }
        } else {
            self.post(BARRIER_ROOT, BARRIER_TAG, &[])?;
            self.take_matching(Source::Rank(BARRIER_ROOT), filter)?;
        }
        Ok(())
    }

    /// Id for the next window created on this context.
    pub(crate) fn next_window_id(&mut self) -> String {
        let id = shm_name::window(&self.id, self.next_window);
        self.next_window += 1;
        id
    }

    fn check_rank(&self, rank: usize) -> Result<()> {
        if rank >= self.size {
            return Err(Error::RankOutOfRange {
                rank,
                size: self.size,
            });
        }
        Ok(())
    }

    fn check_filters(&self, source: Source, tag: TagFilter) -> Result<()> {
        if let Source::Rank(r) = source {
            self.check_rank(r)?;
        }
        if tag == TagFilter::Exact(BARRIER_TAG) {
            return Err(Error::ReservedTag(BARRIER_TAG));
        }
        Ok(())
    }

    fn post(&mut self, dest: usize, tag: Tag, payload: &[u8]) -> Result<()> {
        self.check_rank(dest)?;
        self.inboxes[dest].post(self.rank, tag, payload)?;
        self.stats.sent += 1;
        Ok(())
    }

    fn pull(&mut self) -> Result<Envelope> {
        let env = self.inboxes[self.rank].take()?;
        self.stats.received += 1;
        Ok(env)
    }

    fn take_matching(&mut self, source: Source, tag: TagFilter) -> Result<Envelope> {
        let parked = self.parked.iter().position(|e| matches(e, source, tag));
        if let Some(env) = parked.and_then(|pos| self.parked.remove(pos)) {
            return Ok(env);
        }
        loop {
            let env = self.pull()?;
            if matches(&env, source, tag) {
                return Ok(env);
            }
            self.parked.push_back(env);
        }
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        if !self.parked.is_empty() {
            tracing::debug!(
                context = %self.id,
                rank = self.rank,
                unreceived = self.parked.len(),
                "dropping group context with unreceived messages"
            );
        }
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("parked", &self.parked.len())
            .finish()
    }
}
