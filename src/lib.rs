// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fair distributed mutex for a fixed group of processes on one host.
//
// Layers, leaves first:
//   segment / sync   named shared memory, process-shared pthread mutex+condvar
//   group            group context: per-rank inboxes, selective receive, barrier
//   window           one-sided windows with exclusive access epochs
//   mutex            waitlist mutex on a window held by the home rank
//   jobs             pull-based dispatcher/worker queue
//   launch           spawns one process per rank

pub mod shm_name;

mod platform;

mod segment;
pub use segment::{Segment, SegmentMode};

mod sync;
pub use sync::{SharedCondvar, SharedMutex, SharedMutexGuard};

mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::GroupConfig;

mod mailbox;

pub mod group;
pub use group::{Envelope, Group, Source, Status, Tag, TagFilter, TrafficStats, MAX_MESSAGE_LEN};

mod window;
pub use window::{Epoch, Window};

mod mutex;
pub use mutex::{Mutex, MutexGuard, MutexStats, HOME_RANK};

pub mod jobs;
pub use jobs::{Dispatcher, JobTag, Worker, DISPATCHER_RANK};

pub mod launch;
