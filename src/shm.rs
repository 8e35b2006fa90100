// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Named POSIX shared memory segment used as the backing store for
// per-call channels. The fd is kept open after mmap — the transport
// needs it to register the segment with the server-side buffer registry.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

use crate::shm_name::make_shm_name;

/// A named, mapped POSIX shared memory segment.
///
/// Created by the client adapter once per remote-call kind and reused for
/// the adapter's lifetime. Unlike an anonymous mapping, the open fd can be
/// handed to the transport so the server process maps the same pages.
pub struct ShmSegment {
    fd: RawFd,
    mem: *mut u8,
    size: usize,
    name: String,
}

// The segment is process-shared by design; all access to the mapped bytes
// goes through the channel locking discipline above this layer.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create (or reopen a stale leftover of) a named segment of `size`
    /// bytes and map it read/write.
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let perms: libc::mode_t = 0o666;
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT,
                perms as libc::c_uint,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        unsafe { libc::fchmod(fd, perms) };

        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        Ok(Self {
            fd,
            mem: mem as *mut u8,
            size,
            name: posix_name,
        })
    }

    /// The open descriptor backing the segment.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Pointer to the start of the mapped region.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    /// Mapped size in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The POSIX name (with leading '/').
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove a named segment without needing an open handle. Used by
    /// tests to clear leftovers from crashed runs.
    pub fn unlink_by_name(name: &str) {
        let posix_name = make_shm_name(name);
        if let Ok(c_name) = CString::new(posix_name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.mem as *mut libc::c_void, self.size);
            libc::close(self.fd);
        }
        if let Ok(c_name) = CString::new(self.name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}
