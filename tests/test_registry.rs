// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Unit tests for the shared buffer registry: handle allocation,
// duplicate rejection, deregistration round trips, and concurrent use.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use camipc::{BufferRegistry, IpcError};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// An anonymous shm-backed fd of `size` bytes. The name is unlinked
/// immediately so only the descriptor keeps it alive; the registry closes
/// it on deregistration.
fn anon_shm_fd(size: usize) -> RawFd {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = format!("/camipc_reg_test_{}_{n}", std::process::id());
    let c_name = CString::new(name).unwrap();
    unsafe {
        let fd = libc::shm_open(
            c_name.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            0o600,
        );
        assert!(fd >= 0, "shm_open failed");
        assert_eq!(libc::ftruncate(fd, size as libc::off_t), 0);
        libc::shm_unlink(c_name.as_ptr());
        fd
    }
}

fn fd_is_open(fd: RawFd) -> bool {
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

#[test]
fn handles_are_unique_and_monotonic() {
    let reg = BufferRegistry::new();
    let mut handles = Vec::new();
    for _ in 0..5 {
        let fd = anon_shm_fd(4096);
        handles.push(reg.register_buffer(fd).expect("register"));
    }
    for pair in handles.windows(2) {
        assert!(pair[0] < pair[1], "handles must be monotonic: {handles:?}");
    }
    reg.deregister_buffers(&handles);
    assert!(reg.is_empty());
}

#[test]
fn double_registration_is_rejected() {
    let reg = BufferRegistry::new();
    let fd = anon_shm_fd(4096);
    let handle = reg.register_buffer(fd).expect("first register");

    match reg.register_buffer(fd) {
        Err(IpcError::AlreadyRegistered(got)) => assert_eq!(got, fd),
        other => panic!("expected AlreadyRegistered, got {other:?}"),
    }
    // Only the first registration exists.
    assert_eq!(reg.len(), 1);
    reg.deregister_buffer(handle);
}

#[test]
fn register_deregister_round_trip() {
    let reg = BufferRegistry::new();
    let fd = anon_shm_fd(8192);
    let handle = reg.register_buffer(fd).expect("register");

    let info = reg.lookup(handle).expect("lookup");
    assert_eq!(info.size, 8192);
    assert!(!info.addr.is_null());

    reg.deregister_buffer(handle);
    assert!(matches!(reg.lookup(handle), Err(IpcError::InvalidHandle(_))));
    // The registry closed the fd exactly once.
    assert!(!fd_is_open(fd));

    // Same fd number can be registered again after the round trip.
    let fd2 = anon_shm_fd(4096);
    let handle2 = reg.register_buffer(fd2).expect("re-register");
    assert!(handle2 > handle);
    reg.deregister_buffer(handle2);
}

#[test]
fn deregister_unknown_handle_is_noop() {
    let reg = BufferRegistry::new();
    reg.deregister_buffer(12345);
    reg.deregister_buffers(&[1, 2, 3]);
    assert!(reg.is_empty());
}

#[test]
fn lookup_unknown_handle_fails() {
    let reg = BufferRegistry::new();
    assert!(matches!(reg.lookup(7), Err(IpcError::InvalidHandle(7))));
}

#[test]
fn registration_survives_while_mapped_writes_visible() {
    let reg = BufferRegistry::new();
    let fd = anon_shm_fd(4096);
    let handle = reg.register_buffer(fd).expect("register");

    let info = reg.lookup(handle).expect("lookup");
    unsafe {
        std::ptr::write_bytes(info.addr, 0xa5, 16);
        let back = std::slice::from_raw_parts(info.addr, 16);
        assert!(back.iter().all(|&b| b == 0xa5));
    }
    reg.deregister_buffer(handle);
}

#[test]
fn concurrent_registrations_get_distinct_handles() {
    let reg = Arc::new(BufferRegistry::new());
    let mut joins = Vec::new();
    for _ in 0..8 {
        let reg = Arc::clone(&reg);
        joins.push(thread::spawn(move || {
            let fd = anon_shm_fd(4096);
            reg.register_buffer(fd).expect("register")
        }));
    }
    let mut handles: Vec<i32> = joins.into_iter().map(|j| j.join().unwrap()).collect();
    handles.sort_unstable();
    handles.dedup();
    assert_eq!(handles.len(), 8, "every registration got its own handle");
    reg.deregister_buffers(&handles);
}

#[test]
fn registry_drop_sweeps_leftovers() {
    let fd = anon_shm_fd(4096);
    {
        let reg = BufferRegistry::new();
        reg.register_buffer(fd).expect("register");
        // Dropped with a live registration.
    }
    assert!(!fd_is_open(fd), "drop must close leaked fds");
}
