// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Per-call shared-memory channels and the typed views into them.
//
// A channel is one named shm segment dedicated to one remote-call kind,
// created at adapter init and reused for every call of that kind. The
// channel itself enforces nothing about concurrent use — the adapter
// wraps each one in a mutex and holds it across marshal/request/unmarshal.

use std::marker::PhantomData;

use log::error;
use parking_lot::Mutex;

use crate::error::{IpcError, Result};
use crate::registry::BufferHandle;
use crate::shm::ShmSegment;
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// Typed parameter views
// ---------------------------------------------------------------------------

/// Marker for the POD parameter structs embedded in channel memory.
///
/// # Safety
/// Implementors must be `#[repr(C)]`, contain no padding-sensitive
/// invariants, and be valid for any bit pattern — the bytes come from a
/// shared mapping another process writes to.
pub unsafe trait ParamStruct: Copy + 'static {}

/// Bounds-checked typed view over a shared mapping.
///
/// Constructed only after the minimum-size assertion; the view borrows the
/// raw region and must not outlive the dispatch call (or channel lock) that
/// produced it. The mapping itself stays owned by the registry entry or
/// channel segment.
pub struct ParamView<'a, T: ParamStruct> {
    ptr: *mut T,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T: ParamStruct> ParamView<'a, T> {
    /// Mandatory first check of every handler: reject regions smaller than
    /// the expected struct before any field is read.
    pub fn new(addr: *mut u8, size: usize) -> Result<Self> {
        let need = std::mem::size_of::<T>();
        if size < need {
            return Err(IpcError::BufferTooSmall { got: size, need });
        }
        // Channel segments and registered buffers are mmap'd, so the base
        // address is page-aligned and satisfies any T.
        Ok(Self {
            ptr: addr as *mut T,
            _marker: PhantomData,
        })
    }
}

impl<'a, T: ParamStruct> std::ops::Deref for ParamView<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.ptr }
    }
}

impl<'a, T: ParamStruct> std::ops::DerefMut for ParamView<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.ptr }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Static description of one channel: shm name suffix and segment size.
#[derive(Clone, Copy, Debug)]
pub struct ChannelDesc {
    pub name: &'static str,
    pub size: usize,
}

/// A dedicated shared-memory segment for one remote-call kind, registered
/// with the transport so the server side can resolve its handle.
pub struct Channel {
    seg: ShmSegment,
    handle: BufferHandle,
}

impl Channel {
    fn allocate(transport: &dyn Transport, prefix: &str, desc: &ChannelDesc) -> Result<Self> {
        let seg = ShmSegment::create(&format!("{prefix}{}", desc.name), desc.size)?;
        let handle = transport.register_buffer(seg.fd())?;
        Ok(Self { seg, handle })
    }

    /// The transport handle the server resolves this channel by.
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Typed view over the channel memory for marshal/unmarshal.
    pub fn params<T: ParamStruct>(&mut self) -> Result<ParamView<'_, T>> {
        ParamView::new(self.seg.as_mut_ptr(), self.seg.len())
    }

    fn release(self, transport: &dyn Transport) {
        transport.deregister_buffers(&[self.handle]);
        // seg drops here: munmap + close + unlink.
    }
}

// ---------------------------------------------------------------------------
// ChannelSet
// ---------------------------------------------------------------------------

/// All channels of one adapter, allocated in a single batch.
///
/// Allocation is all-or-nothing: any failure releases the channels already
/// allocated and leaves the adapter uninitialized.
pub struct ChannelSet {
    channels: Vec<Mutex<Channel>>,
}

impl ChannelSet {
    pub fn allocate(
        transport: &dyn Transport,
        prefix: &str,
        descs: &[ChannelDesc],
    ) -> Result<Self> {
        let mut channels = Vec::with_capacity(descs.len());
        for desc in descs {
            match Channel::allocate(transport, prefix, desc) {
                Ok(ch) => channels.push(Mutex::new(ch)),
                Err(e) => {
                    error!("channel '{}' allocation failed: {e}", desc.name);
                    for ch in channels {
                        ch.into_inner().release(transport);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self { channels })
    }

    /// The channel at `idx` (an adapter-defined channel index). The caller
    /// holds the returned lock across marshal, request, and unmarshal —
    /// the single-call discipline per channel.
    pub fn channel(&self, idx: usize) -> &Mutex<Channel> {
        &self.channels[idx]
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn release(self, transport: &dyn Transport) {
        for ch in self.channels {
            ch.into_inner().release(transport);
        }
    }
}
