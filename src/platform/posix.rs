// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX shared memory segments plus process-shared mutex and condition
// variable objects stored inside them.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::shm_name;

/// How long an opener waits for the creator of a segment to size it, or for
/// the creator of a sync object to initialise it.
const CREATOR_WAIT: Duration = Duration::from_secs(5);

/// Adaptive backoff: spin, then pause hint, then yield, then sleep 1ms.
#[inline]
pub(crate) fn backoff(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_millis(1));
        return;
    }
    *k += 1;
}

// ---------------------------------------------------------------------------
// Process-local cache of sync-object mappings.
// Every handle in one process that opens the same named mutex or condition
// variable must use the same mmap: macOS pthreads keep address-relative
// state, so a second mapping of the same page fails with EINVAL.
// ---------------------------------------------------------------------------

pub(crate) struct CachedShm {
    pub(crate) shm: PlatformShm,
    local_ref: AtomicUsize,
}

pub(crate) struct ShmCache {
    map: HashMap<String, Arc<CachedShm>>,
}

fn mutex_cache() -> &'static Mutex<ShmCache> {
    static CACHE: OnceLock<Mutex<ShmCache>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(ShmCache {
            map: HashMap::new(),
        })
    })
}

fn cond_cache() -> &'static Mutex<ShmCache> {
    static CACHE: OnceLock<Mutex<ShmCache>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(ShmCache {
            map: HashMap::new(),
        })
    })
}

fn lock_cache(cache: &Mutex<ShmCache>) -> std::sync::MutexGuard<'_, ShmCache> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Acquire or reuse a cached mapping.
///
/// On the first local open `prepare` runs with the mapped base pointer and
/// whether this process created the segment, while the cache lock is still
/// held, so no other local handle can observe a half-prepared object.
fn cached_shm_acquire<F>(
    cache: &Mutex<ShmCache>,
    name: &str,
    size: usize,
    prepare: F,
) -> io::Result<Arc<CachedShm>>
where
    F: FnOnce(*mut u8, bool) -> io::Result<()>,
{
    let mut c = lock_cache(cache);
    if let Some(entry) = c.map.get(name) {
        entry.local_ref.fetch_add(1, Ordering::Relaxed);
        return Ok(Arc::clone(entry));
    }
    let shm = PlatformShm::acquire(name, size, ShmMode::CreateOrOpen)?;
    prepare(shm.as_mut_ptr(), shm.created())?;
    let entry = Arc::new(CachedShm {
        shm,
        local_ref: AtomicUsize::new(1),
    });
    c.map.insert(name.to_string(), Arc::clone(&entry));
    Ok(entry)
}

fn cached_shm_release(cache: &Mutex<ShmCache>, name: &str) {
    let mut c = lock_cache(cache);
    if let Some(entry) = c.map.get(name) {
        if entry.local_ref.fetch_sub(1, Ordering::AcqRel) <= 1 {
            c.map.remove(name);
        }
    }
}

// ---------------------------------------------------------------------------
// Robust mutex symbols (not exported by `libc` on every target).
// macOS has no robust mutexes.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
const EOWNERDEAD: i32 = libc::EOWNERDEAD;

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

// ---------------------------------------------------------------------------
// Segment layout: user bytes, padded to 4, then a shared AtomicI32 counting
// the handles mapping the segment across all processes.
// ---------------------------------------------------------------------------

const ALIGN: usize = std::mem::align_of::<AtomicI32>();

pub(crate) fn calc_size(user_size: usize) -> usize {
    let aligned = ((user_size.wrapping_sub(1) / ALIGN) + 1) * ALIGN;
    aligned + std::mem::size_of::<AtomicI32>()
}

/// # Safety
/// `mem` must point to a live mapping of at least `total_size` bytes.
unsafe fn ref_counter<'a>(mem: *mut u8, total_size: usize) -> &'a AtomicI32 {
    let offset = total_size - std::mem::size_of::<AtomicI32>();
    &*(mem.add(offset) as *const AtomicI32)
}

// ---------------------------------------------------------------------------
// PlatformShm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    Create,
    Open,
    CreateOrOpen,
}

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,
    user_size: usize,
    name: String,
    created: bool,
}

// Safety: the mapping is shared between processes; callers serialise access
// to its contents through process-shared locks.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

const PERMS: libc::mode_t = 0o666;

fn open_exclusive(c_name: &CStr) -> io::Result<libc::c_int> {
    let fd = unsafe {
        libc::shm_open(
            c_name.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            PERMS as libc::c_uint,
        )
    };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn open_existing(c_name: &CStr) -> io::Result<libc::c_int> {
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, PERMS as libc::c_uint) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Wait until the creator has `ftruncate`d the object; mapping it earlier
/// would fault on first access.
fn wait_for_size(fd: libc::c_int, total_size: usize) -> io::Result<()> {
    let deadline = Instant::now() + CREATOR_WAIT;
    let mut k = 0u32;
    loop {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            return Err(io::Error::last_os_error());
        }
        if st.st_size as usize >= total_size {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!(
                    "segment is {} bytes, expected at least {total_size}",
                    st.st_size
                ),
            ));
        }
        backoff(&mut k);
    }
}

impl PlatformShm {
    pub fn acquire(name: &str, user_size: usize, mode: ShmMode) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if user_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let total_size = calc_size(user_size);

        // Exclusive create first, so only the creator ever truncates.
        let (fd, created) = match mode {
            ShmMode::Create => (open_exclusive(&c_name)?, true),
            ShmMode::Open => (open_existing(&c_name)?, false),
            ShmMode::CreateOrOpen => match open_exclusive(&c_name) {
                Ok(fd) => (fd, true),
                Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                    (open_existing(&c_name)?, false)
                }
                Err(e) => return Err(e),
            },
        };

        let sized = if created {
            unsafe { libc::fchmod(fd, PERMS) };
            if unsafe { libc::ftruncate(fd, total_size as libc::off_t) } != 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        } else {
            wait_for_size(fd, total_size)
        };
        if let Err(e) = sized {
            unsafe { libc::close(fd) };
            if created {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
            return Err(e);
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        unsafe { ref_counter(mem as *mut u8, total_size).fetch_add(1, Ordering::AcqRel) };

        Ok(Self {
            mem: mem as *mut u8,
            size: total_size,
            user_size,
            name: posix_name,
            created,
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn user_size(&self) -> usize {
        self.user_size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle's `shm_open` created the object.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn ref_count(&self) -> i32 {
        if self.mem.is_null() {
            return 0;
        }
        unsafe { ref_counter(self.mem, self.size).load(Ordering::Acquire) }
    }

    pub fn unlink(&self) {
        if let Ok(c_name) = CString::new(self.name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if self.mem.is_null() {
            return;
        }
        let prev = unsafe { ref_counter(self.mem, self.size).fetch_sub(1, Ordering::AcqRel) };
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        if prev <= 1 {
            self.unlink();
        }
    }
}

// ---------------------------------------------------------------------------
// Sync objects: a pthread object followed by a ready flag that the creator
// publishes once initialisation is complete.
// ---------------------------------------------------------------------------

const READY: u32 = 1;

#[repr(C)]
struct SyncCell<T> {
    value: T,
    ready: AtomicU32,
}

fn open_sync_object<T, F>(cache: &Mutex<ShmCache>, name: &str, init: F) -> io::Result<Arc<CachedShm>>
where
    F: FnOnce(*mut T) -> io::Result<()>,
{
    let size = std::mem::size_of::<SyncCell<T>>();
    cached_shm_acquire(cache, name, size, |base, created| {
        let cell = base as *mut SyncCell<T>;
        let ready = unsafe { &(*cell).ready };
        if created {
            init(unsafe { ptr::addr_of_mut!((*cell).value) })?;
            ready.store(READY, Ordering::Release);
            return Ok(());
        }
        let deadline = Instant::now() + CREATOR_WAIT;
        let mut k = 0u32;
        while ready.load(Ordering::Acquire) != READY {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("sync object {name} was never initialised"),
                ));
            }
            backoff(&mut k);
        }
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// PlatformMutex: robust, process-shared pthread mutex
// ---------------------------------------------------------------------------

pub struct PlatformMutex {
    cached: Arc<CachedShm>,
    name: String,
}

impl PlatformMutex {
    pub fn open(name: &str) -> io::Result<Self> {
        let cached = open_sync_object::<libc::pthread_mutex_t, _>(mutex_cache(), name, |mtx| unsafe {
            ptr::write_bytes(mtx, 0, 1);

            let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            let mut eno = libc::pthread_mutexattr_init(&mut attr);
            if eno != 0 {
                return Err(io::Error::from_raw_os_error(eno));
            }
            eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
            #[cfg(not(target_os = "macos"))]
            {
                if eno == 0 {
                    eno = pthread_mutexattr_setrobust(&mut attr, PTHREAD_MUTEX_ROBUST);
                }
            }
            if eno == 0 {
                eno = libc::pthread_mutex_init(mtx, &attr);
            }
            libc::pthread_mutexattr_destroy(&mut attr);
            if eno != 0 {
                return Err(io::Error::from_raw_os_error(eno));
            }
            Ok(())
        })?;

        Ok(Self {
            cached,
            name: name.to_string(),
        })
    }

    pub(crate) fn native_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.cached.shm.as_mut_ptr() as *mut libc::pthread_mutex_t
    }

    pub fn lock(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_mutex_lock(self.native_ptr()) };
        self.check_acquired(eno)
    }

    /// Maps a lock/wait return code, recovering a mutex whose previous owner
    /// died while holding it.
    pub(crate) fn check_acquired(&self, eno: libc::c_int) -> io::Result<()> {
        match eno {
            0 => Ok(()),
            #[cfg(not(target_os = "macos"))]
            EOWNERDEAD => {
                tracing::warn!(mutex = %self.name, "previous owner died; marking mutex consistent");
                let eno2 = unsafe { pthread_mutex_consistent(self.native_ptr()) };
                if eno2 != 0 {
                    return Err(io::Error::from_raw_os_error(eno2));
                }
                Ok(())
            }
            _ => Err(io::Error::from_raw_os_error(eno)),
        }
    }

    pub fn unlock(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_mutex_unlock(self.native_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }
}

impl Drop for PlatformMutex {
    fn drop(&mut self) {
        // No pthread_mutex_destroy: on macOS the address may already belong
        // to another segment after munmap. Unmapping reclaims the memory.
        cached_shm_release(mutex_cache(), &self.name);
    }
}

// ---------------------------------------------------------------------------
// PlatformCondvar: process-shared pthread condition variable
// ---------------------------------------------------------------------------

pub struct PlatformCondvar {
    cached: Arc<CachedShm>,
    name: String,
}

impl PlatformCondvar {
    pub fn open(name: &str) -> io::Result<Self> {
        let cached = open_sync_object::<libc::pthread_cond_t, _>(cond_cache(), name, |cond| unsafe {
            ptr::write_bytes(cond, 0, 1);

            let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
            let mut eno = libc::pthread_condattr_init(&mut attr);
            if eno != 0 {
                return Err(io::Error::from_raw_os_error(eno));
            }
            eno = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
            if eno == 0 {
                eno = libc::pthread_cond_init(cond, &attr);
            }
            libc::pthread_condattr_destroy(&mut attr);
            if eno != 0 {
                return Err(io::Error::from_raw_os_error(eno));
            }
            Ok(())
        })?;

        Ok(Self {
            cached,
            name: name.to_string(),
        })
    }

    fn native_ptr(&self) -> *mut libc::pthread_cond_t {
        self.cached.shm.as_mut_ptr() as *mut libc::pthread_cond_t
    }

    /// Atomically release `mtx`, sleep until signalled, re-acquire `mtx`.
    /// The caller must hold `mtx`.
    pub fn wait(&self, mtx: &PlatformMutex) -> io::Result<()> {
        let eno = unsafe { libc::pthread_cond_wait(self.native_ptr(), mtx.native_ptr()) };
        mtx.check_acquired(eno)
    }

    pub fn broadcast(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_cond_broadcast(self.native_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }
}

impl Drop for PlatformCondvar {
    fn drop(&mut self) {
        cached_shm_release(cond_cache(), &self.name);
    }
}
