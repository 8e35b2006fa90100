// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Client adapter for the software noise-reduction subsystem: the compact
// second instance of the reference-counted proxy shape.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use log::{debug, error};
use parking_lot::Mutex;

use crate::channel::{Channel, ChannelDesc, ChannelSet};
use crate::client::cached_handle;
use crate::engine::SwnrConfig;
use crate::error::{IpcError, Result};
use crate::meta::Metadata;
use crate::proto::swnr::*;
use crate::proto::RequestId;
use crate::registry::BufferHandle;
use crate::transport::Transport;

#[derive(Clone, Copy)]
enum Chan {
    Init,
    Do,
    Debug,
}

const CHANNEL_DESCS: [ChannelDesc; 3] = [
    ChannelDesc { name: "swnrInit", size: std::mem::size_of::<SwnrInitParams>() },
    ChannelDesc { name: "swnrDo", size: std::mem::size_of::<SwnrDoParams>() },
    ChannelDesc { name: "swnrDebug", size: std::mem::size_of::<SwnrDebugParams>() },
];

struct State {
    users: HashMap<String, usize>,
    channels: Option<Arc<ChannelSet>>,
}

pub struct SwnrClient {
    transport: Arc<dyn Transport>,
    sensor_index: usize,
    shm_prefix: String,
    state: Mutex<State>,
    images: Mutex<HashMap<RawFd, BufferHandle>>,
}

impl SwnrClient {
    pub fn new(transport: Arc<dyn Transport>, sensor_index: usize, shm_prefix: &str) -> Self {
        Self {
            transport,
            sensor_index,
            shm_prefix: shm_prefix.to_string(),
            state: Mutex::new(State {
                users: HashMap::new(),
                channels: None,
            }),
            images: Mutex::new(HashMap::new()),
        }
    }

    pub fn init(&self, user: &str) -> Result<()> {
        let mut state = self.state.lock();
        debug!("swnr init({user}): {} users", state.users.len());

        if state.channels.is_some() {
            *state.users.entry(user.to_string()).or_insert(0) += 1;
            return Ok(());
        }

        let chans =
            ChannelSet::allocate(self.transport.as_ref(), &self.shm_prefix, &CHANNEL_DESCS)?;
        let created = {
            let mut ch = chans.channel(Chan::Init as usize).lock();
            self.marshal_init(&mut ch)
                .and_then(|()| self.send(&ch, RequestId::SwnrInit))
        };
        if let Err(e) = created {
            error!("swnr init: remote init failed: {e}");
            chans.release(self.transport.as_ref());
            return Err(e);
        }

        state.users.insert(user.to_string(), 1);
        state.channels = Some(Arc::new(chans));
        Ok(())
    }

    pub fn uninit(&self, user: &str) -> Result<()> {
        let mut state = self.state.lock();
        debug!("swnr uninit({user}): {} users", state.users.len());

        match state.users.get_mut(user) {
            None => {
                error!("swnr uninit: '{user}' never called init");
                return Err(IpcError::LifecycleMisuse(format!(
                    "uninit from '{user}' without matching init"
                )));
            }
            Some(n) => {
                *n -= 1;
                if *n == 0 {
                    state.users.remove(user);
                }
            }
        }
        if !state.users.is_empty() {
            return Ok(());
        }

        let chans = state
            .channels
            .take()
            .expect("initialized adapter has channels");
        self.teardown(chans);
        Ok(())
    }

    fn teardown(&self, chans: Arc<ChannelSet>) {
        {
            let mut ch = chans.channel(Chan::Init as usize).lock();
            let r = self
                .marshal_init(&mut ch)
                .and_then(|()| self.send(&ch, RequestId::SwnrUninit));
            if let Err(e) = r {
                error!("swnr uninit: remote uninit failed: {e}");
            }
        }

        let handles: Vec<BufferHandle> = self.images.lock().drain().map(|(_, h)| h).collect();
        self.transport.deregister_buffers(&handles);
        match Arc::try_unwrap(chans) {
            Ok(set) => set.release(self.transport.as_ref()),
            Err(_) => log::warn!("swnr uninit: channel set still referenced, leaking"),
        }
    }

    fn marshal_init(&self, ch: &mut Channel) -> Result<()> {
        let mut p = ch.params::<SwnrInitParams>()?;
        p.common.sensor_index = self.sensor_index as i32;
        Ok(())
    }

    fn send(&self, ch: &Channel, id: RequestId) -> Result<()> {
        self.transport.request_sync(id, self.sensor_index, ch.handle())
    }

    fn channels(&self) -> Result<Arc<ChannelSet>> {
        self.state
            .lock()
            .channels
            .clone()
            .ok_or_else(|| IpcError::LifecycleMisuse("swnr adapter not initialized".into()))
    }

    /// Run noise reduction in place on the image behind `fd`. The handle
    /// is registered once and cached for the adapter's lifetime.
    pub fn do_swnr(&self, cfg: &SwnrConfig, fd: RawFd) -> Result<()> {
        let handle = {
            let mut images = self.images.lock();
            cached_handle(&mut images, self.transport.as_ref(), fd)?
        };
        let chans = self.channels()?;
        let ch = &mut chans.channel(Chan::Do as usize).lock();
        {
            let mut p = ch.params::<SwnrDoParams>()?;
            p.common.sensor_index = self.sensor_index as i32;
            p.image_handle = handle;
            p.width = cfg.width;
            p.height = cfg.height;
            p.format = cfg.format;
            p.iso = cfg.iso;
            p.magic = cfg.magic;
        }
        self.send(ch, RequestId::SwnrDoSwnr)
    }

    /// EXIF-style debug metadata of the last pass.
    pub fn get_debug_info(&self) -> Result<Metadata> {
        let chans = self.channels()?;
        let ch = &mut chans.channel(Chan::Debug as usize).lock();
        {
            let mut p = ch.params::<SwnrDebugParams>()?;
            *p = SwnrDebugParams::default();
            p.common.sensor_index = self.sensor_index as i32;
        }
        self.send(ch, RequestId::SwnrGetDebugInfo)?;
        let p = ch.params::<SwnrDebugParams>()?;
        use crate::meta::Flatten;
        Metadata::unflatten(&p.exif_meta)
    }
}

impl Drop for SwnrClient {
    fn drop(&mut self) {
        let chans = {
            let mut state = self.state.lock();
            if state.channels.is_none() {
                return;
            }
            log::warn!(
                "swnr adapter dropped with {} live users, tearing down",
                state.users.len()
            );
            state.users.clear();
            state.channels.take().expect("checked above")
        };
        self.teardown(chans);
    }
}
