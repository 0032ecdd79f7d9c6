// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory names: POSIX-safe mangling plus the naming scheme for the
// resources that make up a group context and its windows.
//
// A context id is the group name for a joined group and `{parent}.{k}` for
// the k-th duplicate of a context. Everything a context owns hangs off it:
//
//   {ctx}_mb{rank}            inbox of `rank`
//   {ctx}_mb{rank}_LOCK       its mutex
//   {ctx}_mb{rank}_COND       its condition variable
//   {ctx}_w{k}                k-th window created on the context
//   {win}_dir                 exposed length of every rank
//   {win}_r{rank}             region exposed by `rank`
//   {win}_r{rank}_EPOCH       exclusive-epoch lock for that region

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Maximum length for POSIX shm names, including the leading '/'.
/// 0 disables shortening.
///
/// macOS `PSHMNAMLEN` is 31; Linux allows 255, which nested duplicate
/// contexts never get close to.
#[cfg(target_os = "macos")]
pub const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const SHM_NAME_MAX: usize = 0;

/// Produce a POSIX shm name (with leading '/').
///
/// When `SHM_NAME_MAX > 0`, longer names become `/<prefix>_<16-hex-hash>`,
/// keeping as much of the original as fits for debuggability.
pub fn make_shm_name(name: &str) -> String {
    let result = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };

    if SHM_NAME_MAX == 0 || result.len() <= SHM_NAME_MAX {
        return result;
    }

    // '/' + prefix + '_' + 16 hex digits
    const HASH_SUFFIX_LEN: usize = 1 + 16;
    let prefix_len = SHM_NAME_MAX.saturating_sub(HASH_SUFFIX_LEN + 1);

    let mut shortened = String::with_capacity(SHM_NAME_MAX);
    shortened.push('/');
    // Group names are validated to ASCII, so chars == bytes here.
    shortened.extend(result[1..].chars().take(prefix_len));
    shortened.push('_');
    shortened.push_str(&format!("{:016x}", fnv1a_64(result.as_bytes())));
    shortened
}

/// Id of the `seq`-th duplicate of context `parent`.
pub fn child_context(parent: &str, seq: u32) -> String {
    format!("{parent}.{seq}")
}

/// Inbox segment of `rank` in context `ctx`.
pub fn mailbox(ctx: &str, rank: usize) -> String {
    format!("{ctx}_mb{rank}")
}

pub fn mailbox_lock(mailbox: &str) -> String {
    format!("{mailbox}_LOCK")
}

pub fn mailbox_cond(mailbox: &str) -> String {
    format!("{mailbox}_COND")
}

/// Id of the `seq`-th window created on context `ctx`.
pub fn window(ctx: &str, seq: u32) -> String {
    format!("{ctx}_w{seq}")
}

pub fn window_directory(win: &str) -> String {
    format!("{win}_dir")
}

pub fn window_region(win: &str, rank: usize) -> String {
    format!("{win}_r{rank}")
}

pub fn window_epoch_lock(win: &str, rank: usize) -> String {
    format!("{win}_r{rank}_EPOCH")
}
