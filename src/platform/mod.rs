// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(not(unix))]
compile_error!("rmalock needs POSIX shared memory and process-shared pthread objects");

#[cfg(unix)]
pub mod posix;

#[cfg(unix)]
pub use posix::{PlatformCondvar, PlatformMutex, PlatformShm, ShmMode};
