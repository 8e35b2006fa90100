// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Client-side adapters: synchronous, reference-counted proxies whose
// public methods marshal into a dedicated channel, issue the remote
// request, and unmarshal the rewritten struct.

mod hal3a;
mod swnr;

pub use hal3a::{Hal3aClient, Hal3aTuningBuf, LceBuf};
pub use swnr::SwnrClient;

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use crate::error::Result;
use crate::registry::BufferHandle;
use crate::transport::Transport;

/// Look up a buffer's handle in an identity cache, registering it on a
/// miss so repeated calls with the same underlying buffer register once.
pub(crate) fn cached_handle(
    cache: &mut HashMap<RawFd, BufferHandle>,
    transport: &dyn Transport,
    fd: RawFd,
) -> Result<BufferHandle> {
    if let Some(&h) = cache.get(&fd) {
        return Ok(h);
    }
    let h = transport.register_buffer(fd)?;
    cache.insert(fd, h);
    Ok(h)
}
