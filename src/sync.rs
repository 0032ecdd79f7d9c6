// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named inter-process mutex and condition variable, with an RAII guard.

use std::io;

use crate::platform::{PlatformCondvar, PlatformMutex};

/// A named, inter-process mutex.
///
/// A `pthread_mutex_t` stored in shared memory with `PTHREAD_PROCESS_SHARED`
/// and (except on macOS) `PTHREAD_MUTEX_ROBUST`, so a holder that dies does
/// not wedge every later locker.
pub struct SharedMutex {
    inner: PlatformMutex,
}

impl SharedMutex {
    /// Open (or create) a named mutex.
    pub fn open(name: &str) -> io::Result<Self> {
        Ok(Self {
            inner: PlatformMutex::open(name)?,
        })
    }

    /// Block until the mutex is held. Released when the guard drops.
    pub fn lock(&self) -> io::Result<SharedMutexGuard<'_>> {
        self.inner.lock()?;
        Ok(SharedMutexGuard { mutex: self })
    }
}

/// Holds a [`SharedMutex`] until dropped.
pub struct SharedMutexGuard<'a> {
    mutex: &'a SharedMutex,
}

impl Drop for SharedMutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.inner.unlock() {
            tracing::error!(error = %e, "failed to release shared mutex");
        }
    }
}

/// A named, inter-process condition variable (`pthread_cond_t` with
/// `PTHREAD_PROCESS_SHARED`).
pub struct SharedCondvar {
    inner: PlatformCondvar,
}

impl SharedCondvar {
    /// Open (or create) a named condition variable.
    pub fn open(name: &str) -> io::Result<Self> {
        Ok(Self {
            inner: PlatformCondvar::open(name)?,
        })
    }

    /// Release the guarded mutex, sleep until woken, re-acquire it.
    /// Spurious wake-ups happen; re-check the predicate in a loop.
    pub fn wait(&self, guard: &mut SharedMutexGuard<'_>) -> io::Result<()> {
        self.inner.wait(&guard.mutex.inner)
    }

    /// Wake every waiter.
    pub fn broadcast(&self) -> io::Result<()> {
        self.inner.broadcast()
    }
}
