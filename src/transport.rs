// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// The transport seam between client adapters and the remote dispatcher.
// The real channel (process launch, fd passing, deadline handling) lives
// outside this crate; adapters only see this trait. The loopback
// implementation wires a client directly to an in-process dispatcher and
// is the reference transport used by the integration tests.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::error::{status, IpcError, Result};
use crate::proto::{RequestId, WireHeader};
use crate::registry::BufferHandle;

/// Synchronous request/buffer primitives an adapter needs from the
/// process boundary.
pub trait Transport: Send + Sync {
    /// Issue one request and block until its completion callback fires.
    /// `buffer_handle` is the channel (or `NO_BUFFER`) the server resolves.
    fn request_sync(
        &self,
        id: RequestId,
        sensor_index: usize,
        buffer_handle: BufferHandle,
    ) -> Result<()>;

    /// Register a process-local fd with the remote registry.
    fn register_buffer(&self, fd: RawFd) -> Result<BufferHandle>;

    /// Release registrations. Tolerates handles already released.
    fn deregister_buffers(&self, handles: &[BufferHandle]);
}

/// In-process transport: requests go straight into a dispatcher, buffer
/// registration dups the fd the way a real boundary would when handing it
/// to the other process.
pub struct LoopbackTransport {
    dispatcher: Arc<Dispatcher>,
}

impl LoopbackTransport {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Transport for LoopbackTransport {
    fn request_sync(
        &self,
        id: RequestId,
        sensor_index: usize,
        buffer_handle: BufferHandle,
    ) -> Result<()> {
        let header = WireHeader { sensor_index }.encode();
        let code = self.dispatcher.dispatch(id as u32, &header, buffer_handle);
        if code == status::OK {
            Ok(())
        } else {
            Err(IpcError::from_status(id as u32, code))
        }
    }

    fn register_buffer(&self, fd: RawFd) -> Result<BufferHandle> {
        // The registry takes ownership of what it maps; hand it a dup so
        // the caller's descriptor survives deregistration, exactly as a
        // cross-process transport would duplicate the handle.
        let dup = unsafe { libc::dup(fd) };
        if dup == -1 {
            return Err(IpcError::Os(io::Error::last_os_error()));
        }
        match self.dispatcher.registry().register_buffer(dup) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                unsafe { libc::close(dup) };
                Err(e)
            }
        }
    }

    fn deregister_buffers(&self, handles: &[BufferHandle]) {
        self.dispatcher.registry().deregister_buffers(handles);
    }
}
