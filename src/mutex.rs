// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fair distributed mutex over a group context.
//
// The home rank exposes one byte per member (the waitlist). A caller sets or
// clears its own byte inside an exclusive epoch and, in the same epoch, reads
// the whole list as it was before the change. Both lock and unlock scan that
// snapshot circularly from `rank + 1`:
//
//   lock    any other byte set  -> wait for one wake message
//   unlock  first byte set      -> send that rank one wake message
//
// Because every exchange happens in a totally ordered epoch, a locker either
// sees the holder's byte (and waits) or the holder sees the locker's byte on
// release (and wakes it). Nothing else is shared.

use crate::error::{Error, Result};
use crate::group::{Group, Source, Tag, TagFilter, TrafficStats};
use crate::window::Window;

/// Rank that stores the waitlist.
pub const HOME_RANK: usize = 0;

/// Tag of the zero-payload wake message on the mutex's private context.
const WAKE_TAG: Tag = 0;

/// Per-rank lock activity counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MutexStats {
    /// Completed `lock` calls.
    pub acquisitions: u64,
    /// `lock` calls that had to wait for a wake.
    pub contended: u64,
    pub wakes_sent: u64,
    pub wakes_received: u64,
    /// Sender of the most recent wake this rank received.
    pub last_woken_by: Option<usize>,
    /// Recipient of the most recent wake this rank sent.
    pub last_woke: Option<usize>,
}

/// First rank after `rank`, wrapping, whose waitlist byte is set.
/// The caller's own byte is never considered.
fn successor(waitlist: &[u8], rank: usize) -> Option<usize> {
    let n = waitlist.len();
    (1..n).map(|k| (rank + k) % n).find(|&r| waitlist[r] != 0)
}

struct Inner {
    group: Group,
    window: Window,
    snapshot: Vec<u8>,
    held: bool,
    stats: MutexStats,
}

impl Inner {
    /// Store `value` in this rank's byte; leaves the previous list in
    /// `snapshot`.
    fn exchange(&mut self, value: u8) -> Result<()> {
        let rank = self.group.rank();
        let epoch = self.window.lock_exclusive(HOME_RANK)?;
        epoch.get(0, &mut self.snapshot)?;
        epoch.put(rank, &[value])?;
        Ok(())
    }
}

/// A fair mutex shared by every member of a group.
///
/// Construction and [`Mutex::free`] are collective. `lock`/`unlock` may be
/// called by any member at any time. Waiters are served in circular rank order
/// starting after the releasing rank.
///
/// The handle can be moved but not cloned. [`Mutex::default`] and the value
/// left behind by `std::mem::take` are empty: every operation on them fails
/// with [`Error::Invalid`] and dropping them releases nothing.
#[derive(Default)]
pub struct Mutex {
    inner: Option<Inner>,
}

impl Mutex {
    /// Build the mutex on a private duplicate of `base`. Collective.
    pub fn new(base: &mut Group) -> Result<Self> {
        let mut group = base.dup()?;
        let size = group.size();
        let exposed = if group.rank() == HOME_RANK { size } else { 0 };
        let window = Window::create(&mut group, exposed)?;

        Ok(Self {
            inner: Some(Inner {
                group,
                window,
                snapshot: vec![0; size],
                held: false,
                stats: MutexStats::default(),
            }),
        })
    }

    fn inner(&mut self) -> Result<&mut Inner> {
        self.inner.as_mut().ok_or(Error::Invalid)
    }

    /// Block until this rank holds the mutex.
    pub fn lock(&mut self) -> Result<()> {
        let inner = self.inner()?;
        if inner.held {
            return Err(Error::AlreadyHeld);
        }
        inner.exchange(1)?;

        let rank = inner.group.rank();
        if successor(&inner.snapshot, rank).is_some() {
            inner.stats.contended += 1;
            tracing::debug!(rank, "mutex busy, waiting for wake");
            let wake = inner.group.recv(Source::Any, TagFilter::Exact(WAKE_TAG))?;
            inner.stats.wakes_received += 1;
            inner.stats.last_woken_by = Some(wake.source);
            tracing::debug!(rank, from = wake.source, "woken");
        }

        inner.held = true;
        inner.stats.acquisitions += 1;
        Ok(())
    }

    /// Release the mutex and hand it to the next waiter, if any.
    pub fn unlock(&mut self) -> Result<()> {
        let inner = self.inner()?;
        if !inner.held {
            return Err(Error::NotHeld);
        }
        inner.exchange(0)?;
        inner.held = false;

        let rank = inner.group.rank();
        if let Some(next) = successor(&inner.snapshot, rank) {
            inner.group.send(next, WAKE_TAG, &[])?;
            inner.stats.wakes_sent += 1;
            inner.stats.last_woke = Some(next);
            tracing::debug!(rank, to = next, "sent wake");
        }
        Ok(())
    }

    /// Lock and return a guard that unlocks on drop.
    pub fn guard(&mut self) -> Result<MutexGuard<'_>> {
        self.lock()?;
        Ok(MutexGuard { mutex: self })
    }

    /// Read the current waitlist (one byte per rank, 1 = holding or waiting)
    /// inside an epoch. Diagnostic; the answer may be stale on return.
    pub fn waitlist(&self) -> Result<Vec<u8>> {
        let inner = self.inner.as_ref().ok_or(Error::Invalid)?;
        let mut list = vec![0; inner.group.size()];
        inner.window.lock_exclusive(HOME_RANK)?.get(0, &mut list)?;
        Ok(list)
    }

    /// Collective teardown. A no-op on an empty mutex.
    pub fn free(mut self) -> Result<()> {
        match self.inner.take() {
            Some(inner) => {
                if inner.held {
                    tracing::warn!(rank = inner.group.rank(), "freeing a held mutex");
                }
                let Inner { group, window, .. } = inner;
                drop(window);
                group.free()
            }
            None => Ok(()),
        }
    }

    /// Whether this handle owns a mutex (not default or moved from).
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    pub fn is_held(&self) -> bool {
        self.inner.as_ref().is_some_and(|i| i.held)
    }

    pub fn rank(&self) -> Option<usize> {
        self.inner.as_ref().map(|i| i.group.rank())
    }

    pub fn size(&self) -> Option<usize> {
        self.inner.as_ref().map(|i| i.group.size())
    }

    pub fn stats(&self) -> MutexStats {
        self.inner.as_ref().map(|i| i.stats).unwrap_or_default()
    }

    /// Message counts on the mutex's private context.
    pub fn traffic(&self) -> TrafficStats {
        self.inner
            .as_ref()
            .map(|i| i.group.stats())
            .unwrap_or_default()
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            if inner.held {
                tracing::warn!(
                    rank = inner.group.rank(),
                    "dropping a held mutex; waiters will never be woken"
                );
            }
        }
    }
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(i) => f
                .debug_struct("Mutex")
                .field("rank", &i.group.rank())
                .field("size", &i.group.size())
                .field("held", &i.held)
                .finish(),
            None => f.write_str("Mutex(empty)"),
        }
    }
}

/// Holds a [`Mutex`] until dropped.
pub struct MutexGuard<'a> {
    mutex: &'a mut Mutex,
}

impl MutexGuard<'_> {
    /// Unlock now and report failures instead of logging them.
    pub fn unlock(self) -> Result<()> {
        let mut this = std::mem::ManuallyDrop::new(self);
        this.mutex.unlock()
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.unlock() {
            tracing::error!(error = %e, "failed to release mutex");
        }
    }
}
