// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared-memory segment. Backs mailboxes, window regions and the
// window directory.

use std::io;

use crate::platform::{PlatformShm, ShmMode};

/// Open mode for shared memory segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMode {
    /// Create exclusively; fail if the name already exists.
    Create,
    /// Open an existing segment; fail if it does not exist.
    Open,
    /// Create if missing, open if it already exists.
    CreateOrOpen,
}

/// A named, inter-process shared memory segment.
///
/// A trailing counter shared by every mapping tracks how many handles are
/// alive across all processes; the last one to drop unlinks the name.
///
/// `read`, `write` and `fill` perform plain copies. Concurrent writers must
/// be serialised by the caller (window epochs and mailbox locks do this).
pub struct Segment {
    inner: PlatformShm,
}

impl Segment {
    /// Acquire a segment of `len` usable bytes.
    pub fn acquire(name: &str, len: usize, mode: SegmentMode) -> io::Result<Self> {
        let mode = match mode {
            SegmentMode::Create => ShmMode::Create,
            SegmentMode::Open => ShmMode::Open,
            SegmentMode::CreateOrOpen => ShmMode::CreateOrOpen,
        };
        let inner = PlatformShm::acquire(name, len, mode)?;
        Ok(Self { inner })
    }

    /// Usable length in bytes.
    pub fn len(&self) -> usize {
        self.inner.user_size()
    }

    /// Always `false`: zero-length segments cannot be acquired.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this handle created the backing object (a fresh object is
    /// zero-filled).
    pub fn was_created(&self) -> bool {
        self.inner.created()
    }

    /// Number of live handles mapping this segment, across all processes.
    pub fn ref_count(&self) -> i32 {
        self.inner.ref_count()
    }

    /// The platform name used to open the segment.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> io::Result<()> {
        self.check_range(offset, buf.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.inner.as_mut_ptr().add(offset),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    /// Copy `data` into the segment starting at `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) -> io::Result<()> {
        self.check_range(offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.inner.as_mut_ptr().add(offset),
                data.len(),
            );
        }
        Ok(())
    }

    /// Set every usable byte to `byte`.
    pub fn fill(&self, byte: u8) {
        unsafe { std::ptr::write_bytes(self.inner.as_mut_ptr(), byte, self.len()) };
    }

    /// Base of the usable region.
    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    /// Force-remove the name. Existing mappings stay valid.
    pub fn unlink(&self) {
        self.inner.unlink();
    }

    fn check_range(&self, offset: usize, len: usize) -> io::Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "range {offset}+{len} exceeds segment of {} bytes",
                    self.len()
                ),
            )),
        }
    }
}
