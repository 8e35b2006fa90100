// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Shared buffer registry: turns a raw file descriptor into a stable
// integer handle the dispatcher can resolve to a mapped address.
// Registrations live for the logical buffer lifetime, which may span
// many requests; the mapping is done once here instead of per call.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

use log::{debug, error, warn};
use parking_lot::RwLock;

use crate::error::{IpcError, Result};

/// Opaque identifier for a registered shared/DMA memory region.
pub type BufferHandle = i32;

/// Sentinel handle for requests that carry no buffer.
pub const NO_BUFFER: BufferHandle = -1;

/// A registered mapping. Copied out of the registry on lookup; the
/// mapping itself stays owned by the registry entry.
#[derive(Clone, Copy, Debug)]
pub struct ShmInfo {
    pub fd: RawFd,
    pub addr: *mut u8,
    pub size: usize,
}

unsafe impl Send for ShmInfo {}
unsafe impl Sync for ShmInfo {}

struct Inner {
    by_handle: HashMap<BufferHandle, ShmInfo>,
    by_fd: HashMap<RawFd, BufferHandle>,
    /// Monotonically increasing handle seed; handles are unique for the
    /// process lifetime and reused only after explicit deregistration.
    seed: BufferHandle,
}

/// Thread-safe fd-to-mapping registry.
///
/// One read/write lock guards both maps: lookups during dispatch run
/// concurrently, register/deregister are exclusive. Writers always take
/// the write lock for the check-then-insert so two racing registrations
/// of the same fd cannot both succeed.
pub struct BufferRegistry {
    inner: RwLock<Inner>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_handle: HashMap::new(),
                by_fd: HashMap::new(),
                seed: 0,
            }),
        }
    }

    /// Register `fd`, mapping its whole extent read/write.
    ///
    /// Fails with `AlreadyRegistered` if the fd is already tracked and
    /// `MapFailed` if mmap rejects it. The fd stays owned by the caller
    /// until deregistration, which closes it.
    pub fn register_buffer(&self, fd: RawFd) -> Result<BufferHandle> {
        // Cheap rejection under the read lock; re-checked below.
        if self.inner.read().by_fd.contains_key(&fd) {
            warn!("register_buffer: fd {fd} already registered");
            return Err(IpcError::AlreadyRegistered(fd));
        }

        let size = fd_size(fd)?;
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            let err = IpcError::MapFailed {
                fd,
                source: io::Error::last_os_error(),
            };
            error!("register_buffer: {err}");
            return Err(err);
        }
        let addr = addr as *mut u8;

        let mut inner = self.inner.write();
        if inner.by_fd.contains_key(&fd) {
            // Lost the race to another registration of the same fd.
            unsafe { libc::munmap(addr as *mut libc::c_void, size) };
            return Err(IpcError::AlreadyRegistered(fd));
        }
        inner.seed += 1;
        let handle = inner.seed;
        inner.by_fd.insert(fd, handle);
        inner.by_handle.insert(handle, ShmInfo { fd, addr, size });
        debug!("register_buffer: fd {fd} -> handle {handle} ({size} bytes)");
        Ok(handle)
    }

    /// Resolve a handle to its mapping. Used by the dispatcher before any
    /// handler that declared a buffer requirement runs.
    pub fn lookup(&self, handle: BufferHandle) -> Result<ShmInfo> {
        self.inner
            .read()
            .by_handle
            .get(&handle)
            .copied()
            .ok_or(IpcError::InvalidHandle(handle))
    }

    /// Remove a registration, unmapping and closing the fd. A handle that
    /// is already gone is a no-op so duplicate cleanup from different call
    /// sites stays harmless.
    pub fn deregister_buffer(&self, handle: BufferHandle) {
        let mut inner = self.inner.write();
        match inner.by_handle.remove(&handle) {
            Some(info) => {
                inner.by_fd.remove(&info.fd);
                unsafe {
                    libc::munmap(info.addr as *mut libc::c_void, info.size);
                    libc::close(info.fd);
                }
                debug!("deregister_buffer: handle {handle} (fd {})", info.fd);
            }
            None => {
                debug!("deregister_buffer: handle {handle} not tracked, ignoring");
            }
        }
    }

    pub fn deregister_buffers(&self, handles: &[BufferHandle]) {
        for &h in handles {
            self.deregister_buffer(h);
        }
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.inner.read().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BufferRegistry {
    fn drop(&mut self) {
        // A missed deregistration leaks a mapping and an fd for the life
        // of the server process; sweep whatever is left and say so.
        let inner = self.inner.get_mut();
        if !inner.by_handle.is_empty() {
            warn!(
                "registry dropped with {} live registrations",
                inner.by_handle.len()
            );
        }
        for (_, info) in inner.by_handle.drain() {
            unsafe {
                libc::munmap(info.addr as *mut libc::c_void, info.size);
                libc::close(info.fd);
            }
        }
        inner.by_fd.clear();
    }
}

/// Region size of an fd via fstat.
fn fd_size(fd: RawFd) -> Result<usize> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut st) } != 0 {
        return Err(IpcError::Os(io::Error::last_os_error()));
    }
    if st.st_size <= 0 {
        return Err(IpcError::Os(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("fd {fd} has no extent"),
        )));
    }
    Ok(st.st_size as usize)
}
