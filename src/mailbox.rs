// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-rank inbox in shared memory: any member posts, only the owner takes.
//
// The inbox is a ring of fixed-size slots. A message longer than one slot's
// payload is split over consecutive slots; the last fragment carries
// SIZE_LAST. A whole message is written under the inbox lock before the
// write counter moves, so the owner never sees a partial message.

use std::mem::size_of;
use std::ptr::{self, addr_of, addr_of_mut};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};
use crate::segment::{Segment, SegmentMode};
use crate::shm_name;
use crate::sync::{SharedCondvar, SharedMutex};

/// Payload bytes per ring slot.
const SLOT_DATA: usize = 64;
/// Slots per inbox.
const SLOT_COUNT: usize = 256;

/// Bit 31 of `Slot::size`: last fragment of a message.
const SIZE_LAST: u32 = 0x8000_0000;
/// Low bits of `Slot::size`: payload bytes in this fragment.
const SIZE_MASK: u32 = 0x0000_ffff;

/// Largest payload a single message may carry.
pub const MAX_MESSAGE_LEN: usize = SLOT_DATA * SLOT_COUNT;

/// Message tag. Values are chosen by the protocol running on a context.
pub type Tag = u32;

/// A received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Rank of the sender.
    pub source: usize,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

/// Monotonic counters; index = counter % SLOT_COUNT. Only touched under the
/// inbox lock.
#[repr(C)]
struct Header {
    read: AtomicU32,
    write: AtomicU32,
}

#[repr(C)]
struct Slot {
    source: u32,
    tag: u32,
    size: u32,
    data: [u8; SLOT_DATA],
}

const fn inbox_len() -> usize {
    size_of::<Header>() + SLOT_COUNT * size_of::<Slot>()
}

fn slots_for(len: usize) -> usize {
    len.div_ceil(SLOT_DATA).max(1)
}

pub(crate) struct Mailbox {
    ring: Segment,
    lock: SharedMutex,
    changed: SharedCondvar,
}

impl Mailbox {
    /// Open (or create) the inbox named `name`. A fresh inbox is empty: the
    /// segment is zero-filled on creation.
    pub(crate) fn open(name: &str) -> Result<Self> {
        let ring = Segment::acquire(name, inbox_len(), SegmentMode::CreateOrOpen)?;
        let lock = SharedMutex::open(&shm_name::mailbox_lock(name))?;
        let changed = SharedCondvar::open(&shm_name::mailbox_cond(name))?;
        Ok(Self {
            ring,
            lock,
            changed,
        })
    }

    fn header(&self) -> &Header {
        unsafe { &*(self.ring.as_mut_ptr() as *const Header) }
    }

    fn slot(&self, counter: u32) -> *mut Slot {
        let index = counter as usize % SLOT_COUNT;
        unsafe {
            let slots = self.ring.as_mut_ptr().add(size_of::<Header>()) as *mut Slot;
            slots.add(index)
        }
    }

    /// Append one message. Blocks while the ring lacks room for it.
    pub(crate) fn post(&self, source: usize, tag: Tag, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_MESSAGE_LEN {
            return Err(Error::MessageTooLarge {
                len: payload.len(),
                max: MAX_MESSAGE_LEN,
            });
        }
        let needed = slots_for(payload.len());

        let mut guard = self.lock.lock()?;
        let hdr = self.header();
        loop {
            let used = hdr
                .write
                .load(Ordering::Relaxed)
                .wrapping_sub(hdr.read.load(Ordering::Relaxed)) as usize;
            if SLOT_COUNT - used >= needed {
                break;
            }
            self.changed.wait(&mut guard)?;
        }

        let fragments: Vec<&[u8]> = if payload.is_empty() {
            vec![payload]
        } else {
            payload.chunks(SLOT_DATA).collect()
        };
        let mut wr = hdr.write.load(Ordering::Relaxed);
        for (i, fragment) in fragments.iter().enumerate() {
            let mut size = fragment.len() as u32;
            if i + 1 == fragments.len() {
                size |= SIZE_LAST;
            }
            let slot = self.slot(wr);
            unsafe {
                (*slot).source = source as u32;
                (*slot).tag = tag;
                (*slot).size = size;
                ptr::copy_nonoverlapping(
                    fragment.as_ptr(),
                    addr_of_mut!((*slot).data) as *mut u8,
                    fragment.len(),
                );
            }
            wr = wr.wrapping_add(1);
        }
        hdr.write.store(wr, Ordering::Release);

        self.changed.broadcast()?;
        Ok(())
    }

    /// Remove the oldest message, blocking while the inbox is empty.
    pub(crate) fn take(&self) -> Result<Envelope> {
        let mut guard = self.lock.lock()?;
        let hdr = self.header();
        while hdr.read.load(Ordering::Relaxed) == hdr.write.load(Ordering::Acquire) {
            self.changed.wait(&mut guard)?;
        }

        let mut rd = hdr.read.load(Ordering::Relaxed);
        let mut envelope = Envelope {
            source: 0,
            tag: 0,
            payload: Vec::new(),
        };
        for _ in 0..SLOT_COUNT {
            let slot = self.slot(rd);
            rd = rd.wrapping_add(1);
            let size = unsafe {
                envelope.source = (*slot).source as usize;
                envelope.tag = (*slot).tag;
                (*slot).size
            };
            let len = ((size & SIZE_MASK) as usize).min(SLOT_DATA);
            let data = unsafe { std::slice::from_raw_parts(addr_of!((*slot).data) as *const u8, len) };
            envelope.payload.extend_from_slice(data);
            if size & SIZE_LAST != 0 {
                break;
            }
        }
        hdr.read.store(rd, Ordering::Release);

        self.changed.broadcast()?;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_name(prefix: &str) -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}_{}_{n}", std::process::id())
    }

    #[test]
    fn slot_math() {
        assert_eq!(slots_for(0), 1);
        assert_eq!(slots_for(1), 1);
        assert_eq!(slots_for(SLOT_DATA), 1);
        assert_eq!(slots_for(SLOT_DATA + 1), 2);
        assert_eq!(slots_for(MAX_MESSAGE_LEN), SLOT_COUNT);
    }

    #[test]
    fn zero_length_message() {
        let mb = Mailbox::open(&unique_name("mb_zero")).expect("open");
        mb.post(3, 9, &[]).expect("post");
        let env = mb.take().expect("take");
        assert_eq!(env.source, 3);
        assert_eq!(env.tag, 9);
        assert!(env.payload.is_empty());
    }

    #[test]
    fn fragmented_message_reassembles() {
        let mb = Mailbox::open(&unique_name("mb_frag")).expect("open");
        let payload: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        mb.post(1, 2, &payload).expect("post");
        mb.post(1, 3, b"next").expect("post");

        let first = mb.take().expect("take");
        assert_eq!(first.payload, payload);
        let second = mb.take().expect("take");
        assert_eq!(second.tag, 3);
        assert_eq!(second.payload, b"next");
    }

    #[test]
    fn oversized_message_rejected() {
        let mb = Mailbox::open(&unique_name("mb_big")).expect("open");
        let payload = vec![0u8; MAX_MESSAGE_LEN + 1];
        let err = mb.post(0, 0, &payload).unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { .. }));
    }

    #[test]
    fn full_ring_blocks_sender_until_drained() {
        let name = unique_name("mb_full");
        let mb = Mailbox::open(&name).expect("open");

        let sender = thread::spawn({
            let name = name.clone();
            move || {
                let mb = Mailbox::open(&name).expect("open");
                // 2 * SLOT_COUNT single-slot messages: must wait for the reader.
                for i in 0..(2 * SLOT_COUNT) as u32 {
                    mb.post(1, i, &[]).expect("post");
                }
            }
        });

        for i in 0..(2 * SLOT_COUNT) as u32 {
            let env = mb.take().expect("take");
            assert_eq!(env.tag, i);
        }
        sender.join().unwrap();
    }
}
