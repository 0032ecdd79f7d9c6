// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// One-sided remote-memory window over a group context.
//
// Every rank exposes a region of its own length (possibly empty). A region
// lives in a named segment created by its owner and mapped by every other
// member; remote reads and writes are plain copies into that mapping. An
// exclusive access epoch on a target is the span during which one rank holds
// that target's epoch lock. Epochs on the same target are therefore totally
// ordered, and the owner reaches its own region only through an epoch too.

use crate::error::{Error, Result};
use crate::group::Group;
use crate::segment::{Segment, SegmentMode};
use crate::shm_name;
use crate::sync::{SharedMutex, SharedMutexGuard};

const LEN_BYTES: usize = std::mem::size_of::<u64>();

/// A collectively created window: one exposed region per rank.
pub struct Window {
    id: String,
    rank: usize,
    lens: Vec<usize>,
    /// `None` for ranks exposing nothing.
    regions: Vec<Option<Segment>>,
    epoch_locks: Vec<SharedMutex>,
    _directory: Segment,
}

impl Window {
    /// Expose `local_len` bytes of zero-filled memory to the group.
    ///
    /// Collective: every member of `group` must call this at the same point,
    /// each with its own length (0 exposes nothing).
    pub fn create(group: &mut Group, local_len: usize) -> Result<Self> {
        let id = group.next_window_id();
        let rank = group.rank();
        let size = group.size();

        let directory = Segment::acquire(
            &shm_name::window_directory(&id),
            size * LEN_BYTES,
            SegmentMode::CreateOrOpen,
        )?;
        directory.write(rank * LEN_BYTES, &(local_len as u64).to_le_bytes())?;

        let epoch_locks = (0..size)
            .map(|r| SharedMutex::open(&shm_name::window_epoch_lock(&id, r)))
            .collect::<std::io::Result<Vec<_>>>()?;

        let mut own = if local_len > 0 {
            let region = Segment::acquire(
                &shm_name::window_region(&id, rank),
                local_len,
                SegmentMode::CreateOrOpen,
            )?;
            region.fill(0);
            Some(region)
        } else {
            None
        };

        // Every length is published and every non-empty region exists.
        group.barrier()?;

        let mut lens = Vec::with_capacity(size);
        let mut regions = Vec::with_capacity(size);
        for r in 0..size {
            let mut raw = [0u8; LEN_BYTES];
            directory.read(r * LEN_BYTES, &mut raw)?;
            let len = u64::from_le_bytes(raw) as usize;
            lens.push(len);

            let region = if r == rank {
                own.take()
            } else if len > 0 {
                Some(Segment::acquire(
                    &shm_name::window_region(&id, r),
                    len,
                    SegmentMode::Open,
                )?)
            } else {
                None
            };
            regions.push(region);
        }

        // No rank starts an epoch before every rank holds every mapping.
        group.barrier()?;
        tracing::debug!(window = %id, rank, local_len, "created window");

        Ok(Self {
            id,
            rank,
            lens,
            regions,
            epoch_locks,
            _directory: directory,
        })
    }

    /// Number of bytes exposed by `rank`.
    pub fn target_len(&self, rank: usize) -> Result<usize> {
        self.lens
            .get(rank)
            .copied()
            .ok_or(Error::RankOutOfRange {
                rank,
                size: self.lens.len(),
            })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Open an exclusive access epoch on `target`. Blocks while any other
    /// member (or another handle in this process) has one open on the same
    /// target. The epoch closes when the returned value drops.
    pub fn lock_exclusive(&self, target: usize) -> Result<Epoch<'_>> {
        let len = self.target_len(target)?;
        let guard = self.epoch_locks[target].lock()?;
        Ok(Epoch {
            target,
            len,
            region: self.regions[target].as_ref(),
            _guard: guard,
        })
    }
}

/// An open exclusive access epoch on one target region.
pub struct Epoch<'a> {
    target: usize,
    len: usize,
    region: Option<&'a Segment>,
    _guard: SharedMutexGuard<'a>,
}

impl Epoch<'_> {
    /// Copy `buf.len()` bytes from the target region at `offset`.
    pub fn get(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        match self.region(offset, buf.len())? {
            Some(region) => Ok(region.read(offset, buf)?),
            None => Ok(()),
        }
    }

    /// Copy `data` into the target region at `offset`.
    pub fn put(&self, offset: usize, data: &[u8]) -> Result<()> {
        match self.region(offset, data.len())? {
            Some(region) => Ok(region.write(offset, data)?),
            None => Ok(()),
        }
    }

    // An empty target accepts only zero-length accesses, which touch nothing.
    fn region(&self, offset: usize, len: usize) -> Result<Option<&Segment>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(self.region.filter(|_| len > 0)),
            _ => Err(Error::OutOfBounds {
                target: self.target,
                offset,
                len,
                size: self.len,
            }),
        }
    }
}
