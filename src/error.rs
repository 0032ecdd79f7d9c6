// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Crate-wide error type for the group transport, windows and the mutex.

use std::io;

/// Errors raised by group, window, mutex and job operations.
///
/// Every variant is fatal for the group in practice: there are no retries,
/// and a peer blocked in a collective call or in `Mutex::lock` will not be
/// released by the failing rank.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid group configuration: {0}")]
    Config(String),

    #[error("rank {rank} is out of range for a group of {size}")]
    RankOutOfRange { rank: usize, size: usize },

    #[error("message of {len} bytes exceeds the mailbox limit of {max} bytes")]
    MessageTooLarge { len: usize, max: usize },

    #[error("access of {len} bytes at offset {offset} exceeds the {size}-byte window of rank {target}")]
    OutOfBounds {
        target: usize,
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("unexpected message tag {tag} from rank {from}")]
    UnexpectedTag { tag: u32, from: usize },

    #[error("malformed task payload of {0} bytes")]
    MalformedTask(usize),

    #[error("tag {0} is reserved for internal traffic")]
    ReservedTag(u32),

    #[error("mutex is empty (default-constructed or moved from)")]
    Invalid,

    #[error("mutex is not held by this rank")]
    NotHeld,

    #[error("mutex is already held by this rank")]
    AlreadyHeld,
}

pub type Result<T> = std::result::Result<T, Error>;
