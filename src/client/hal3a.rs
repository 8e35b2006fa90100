// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Client adapter for the 3A subsystem. One instance per sensor, shared by
// every logical caller; the remote engine is created on the first init
// and torn down when the last caller uninits. Each public method locks
// its channel for the duration of marshal / request / unmarshal.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::channel::{Channel, ChannelDesc, ChannelSet};
use crate::client::cached_handle;
use crate::engine::{Hal3aConfig, NotifyReceiver};
use crate::error::{IpcError, Result};
use crate::meta::Flatten;
use crate::proto::hal3a::*;
use crate::proto::RequestId;
use crate::registry::BufferHandle;
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// Channel table
// ---------------------------------------------------------------------------

/// Channel indices; one per remote-call kind, matching `CHANNEL_DESCS`.
#[derive(Clone, Copy)]
enum Chan {
    Init,
    Config,
    Start,
    Stop,
    StopStt,
    Set,
    SetIsp,
    Ctrl,
    SensorParam,
    Notify,
    TuningPipe,
    SttPipe,
    StartCapture,
    StartRequestQ,
    Preset,
    AttachCb,
    DetachCb,
    Get,
    SetFdInfo,
}

const CHANNEL_DESCS: [ChannelDesc; 19] = [
    ChannelDesc { name: "3aInit", size: std::mem::size_of::<Hal3aInitParams>() },
    ChannelDesc { name: "3aConfig", size: std::mem::size_of::<Hal3aConfigParams>() },
    ChannelDesc { name: "3aStart", size: std::mem::size_of::<Hal3aStartParams>() },
    ChannelDesc { name: "3aStop", size: std::mem::size_of::<Hal3aStopParams>() },
    ChannelDesc { name: "3aStopStt", size: std::mem::size_of::<Hal3aStopSttParams>() },
    ChannelDesc { name: "3aSet", size: std::mem::size_of::<Hal3aMetaSetParams>() },
    ChannelDesc { name: "3aSetIsp", size: std::mem::size_of::<Hal3aSetIspParams>() },
    ChannelDesc { name: "3aSendCtrl", size: std::mem::size_of::<Hal3aCtrlParams>() },
    ChannelDesc { name: "3aSensorParam", size: std::mem::size_of::<Hal3aGetSensorParamParams>() },
    ChannelDesc { name: "3aNotifyCb", size: std::mem::size_of::<Hal3aNotifyParams>() },
    ChannelDesc { name: "3aTuningPipe", size: std::mem::size_of::<Hal3aTuningPipeParams>() },
    ChannelDesc { name: "3aSttPipe", size: std::mem::size_of::<Hal3aSttPipeParams>() },
    ChannelDesc { name: "3aStartCapture", size: std::mem::size_of::<Hal3aMetaSetParams>() },
    ChannelDesc { name: "3aStartRequestQ", size: std::mem::size_of::<Hal3aMetaSetParams>() },
    ChannelDesc { name: "3aPreset", size: std::mem::size_of::<Hal3aMetaSetParams>() },
    ChannelDesc { name: "3aAttachCb", size: std::mem::size_of::<Hal3aAttachCbParams>() },
    ChannelDesc { name: "3aDetachCb", size: std::mem::size_of::<Hal3aDetachCbParams>() },
    ChannelDesc { name: "3aGet", size: std::mem::size_of::<Hal3aGetParams>() },
    ChannelDesc { name: "3aSetFdInfo", size: std::mem::size_of::<Hal3aSetFdInfoParams>() },
];

// ---------------------------------------------------------------------------
// Client-side buffer descriptors
// ---------------------------------------------------------------------------

/// LCE statistics buffer accompanying a set-isp call.
#[derive(Clone, Copy, Debug)]
pub struct LceBuf {
    pub fd: RawFd,
    pub format: i32,
    pub width: i32,
    pub height: i32,
    pub plane_count: i32,
    pub strides: [i32; 3],
    pub scanlines: [i32; 3],
}

/// Tuning inputs for one set-isp call, identified by fd. Registration and
/// handle caching happen inside the adapter.
#[derive(Clone, Copy, Debug)]
pub struct Hal3aTuningBuf {
    pub p2_fd: RawFd,
    pub lce: Option<LceBuf>,
}

#[derive(Default)]
struct Caches {
    stt: HashMap<RawFd, BufferHandle>,
    p1_tuning: HashMap<RawFd, BufferHandle>,
    p2_tuning: HashMap<RawFd, BufferHandle>,
    lce: HashMap<RawFd, BufferHandle>,
}

impl Caches {
    fn drain_all(&mut self) -> Vec<BufferHandle> {
        self.stt
            .drain()
            .chain(self.p1_tuning.drain())
            .chain(self.p2_tuning.drain())
            .chain(self.lce.drain())
            .map(|(_, h)| h)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

struct State {
    users: HashMap<String, usize>,
    channels: Option<Arc<ChannelSet>>,
}

pub struct Hal3aClient {
    transport: Arc<dyn Transport>,
    sensor_index: usize,
    shm_prefix: String,
    /// Platform sensor list pushed to the server before the remote init.
    sensor_list: Vec<SensorStaticInfo>,
    state: Mutex<State>,
    /// Serializes set-isp against itself; distinct from the channel locks.
    isp_lock: Mutex<()>,
    caches: Mutex<Caches>,
    receivers: Arc<Mutex<HashMap<NotifyKind, Arc<dyn NotifyReceiver>>>>,
    notify_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Hal3aClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        sensor_index: usize,
        sensor_list: Vec<SensorStaticInfo>,
        shm_prefix: &str,
    ) -> Self {
        Self {
            transport,
            sensor_index,
            shm_prefix: shm_prefix.to_string(),
            sensor_list,
            state: Mutex::new(State {
                users: HashMap::new(),
                channels: None,
            }),
            isp_lock: Mutex::new(()),
            caches: Mutex::new(Caches::default()),
            receivers: Arc::new(Mutex::new(HashMap::new())),
            notify_thread: Mutex::new(None),
        }
    }

    /// The sensor this adapter drives.
    pub fn sensor_index(&self) -> usize {
        self.sensor_index
    }

    // -- lifecycle ---------------------------------------------------------

    /// Initialize on behalf of `user`. The first caller allocates every
    /// channel in one batch and issues the remote init; later callers only
    /// bump the reference count.
    pub fn init(&self, user: &str) -> Result<()> {
        let mut state = self.state.lock();
        debug!("hal3a init({user}): {} users", state.users.len());

        if state.channels.is_some() {
            *state.users.entry(user.to_string()).or_insert(0) += 1;
            return Ok(());
        }

        let chans =
            ChannelSet::allocate(self.transport.as_ref(), &self.shm_prefix, &CHANNEL_DESCS)?;

        // Push the platform sensor list before the engine exists; the
        // server stores it outside the engine table.
        for info in &self.sensor_list {
            if let Err(e) = self.ctrl_request(&chans, &Hal3aCtrl::SetStaticInfo(*info)) {
                error!("hal3a init: static info push failed: {e}");
                chans.release(self.transport.as_ref());
                return Err(e);
            }
        }

        let created = {
            let mut ch = chans.channel(Chan::Init as usize).lock();
            self.marshal_common::<Hal3aInitParams>(&mut ch)
                .and_then(|()| self.send(&ch, RequestId::Hal3aInit))
        };
        if let Err(e) = created {
            error!("hal3a init: remote init failed: {e}");
            chans.release(self.transport.as_ref());
            return Err(e);
        }

        state.users.insert(user.to_string(), 1);
        state.channels = Some(Arc::new(chans));
        Ok(())
    }

    /// Release `user`'s reference; the last caller tears the remote
    /// instance down and frees every channel and cached registration.
    pub fn uninit(&self, user: &str) -> Result<()> {
        let mut state = self.state.lock();
        debug!("hal3a uninit({user}): {} users", state.users.len());

        match state.users.get_mut(user) {
            None => {
                error!("hal3a uninit: '{user}' never called init");
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

    /// Remote teardown first (it also releases the parked notify wait),
    /// then local cleanup: notify thread, cached registrations, channels.
    fn teardown(&self, chans: Arc<ChannelSet>) {
        {
            let mut ch = chans.channel(Chan::Init as usize).lock();
            let r = self
                .marshal_common::<Hal3aInitParams>(&mut ch)
                .and_then(|()| self.send(&ch, RequestId::Hal3aUninit));
            if let Err(e) = r {
                error!("hal3a uninit: remote uninit failed: {e}");
            }
        }

        if let Some(t) = self.notify_thread.lock().take() {
            let _ = t.join();
        }
        self.receivers.lock().clear();

        let handles = self.caches.lock().drain_all();
        self.transport.deregister_buffers(&handles);

        match Arc::try_unwrap(chans) {
            Ok(set) => set.release(self.transport.as_ref()),
            Err(_) => warn!("hal3a uninit: channel set still referenced, leaking"),
        }
    }

    fn channels(&self) -> Result<Arc<ChannelSet>> {
        self.state
            .lock()
            .channels
            .clone()
            .ok_or_else(|| IpcError::LifecycleMisuse("hal3a adapter not initialized".into()))
    }

    fn send(&self, ch: &Channel, id: RequestId) -> Result<()> {
        self.transport.request_sync(id, self.sensor_index, ch.handle())
    }

    /// Reset the struct and stamp the common prefix.
    fn marshal_common<T: crate::channel::ParamStruct + Default>(
        &self,
        ch: &mut Channel,
    ) -> Result<()> {
        let mut p = ch.params::<T>()?;
        *p = T::default();
        // Every param struct starts with CommonParams.
        unsafe {
            let common = &mut *(&mut *p as *mut T as *mut crate::proto::CommonParams);
            common.sensor_index = self.sensor_index as i32;
        }
        Ok(())
    }

    // -- operations --------------------------------------------------------

    /// Configure the remote engine. Stale cached registrations from a
    /// previous session are swept first, mirroring the pre-check the
    /// original stream restart does.
    pub fn config(&self, cfg: &Hal3aConfig) -> Result<()> {
        let chans = self.channels()?;

        let stale = self.caches.lock().drain_all();
        if !stale.is_empty() {
            warn!("hal3a config: sweeping {} stale buffer registrations", stale.len());
            self.transport.deregister_buffers(&stale);
        }

        let mut ch = chans.channel(Chan::Config as usize).lock();
        {
            let mut p = ch.params::<Hal3aConfigParams>()?;
            p.common.sensor_index = self.sensor_index as i32;
            p.subsample_count = cfg.subsample_count;
            p.bit_mode = cfg.bit_mode;
            p.hlr_option = cfg.hlr_option;
            cfg.cfg_app.flatten(&mut p.cfg_app_meta)?;
            cfg.cfg_hal.flatten(&mut p.cfg_hal_meta)?;
        }
        self.send(&ch, RequestId::Hal3aConfig)
    }

    pub fn start(&self, start_num: i32) -> Result<()> {
        let chans = self.channels()?;
        let mut ch = chans.channel(Chan::Start as usize).lock();
        {
            let mut p = ch.params::<Hal3aStartParams>()?;
            p.common.sensor_index = self.sensor_index as i32;
            p.start_num = start_num;
        }
        self.send(&ch, RequestId::Hal3aStart)
    }

    pub fn stop(&self) -> Result<()> {
        let chans = self.channels()?;
        let mut ch = chans.channel(Chan::Stop as usize).lock();
        self.marshal_common::<Hal3aStopParams>(&mut ch)?;
        self.send(&ch, RequestId::Hal3aStop)
    }

    pub fn stop_stt(&self) -> Result<()> {
        let chans = self.channels()?;
        let mut ch = chans.channel(Chan::StopStt as usize).lock();
        self.marshal_common::<Hal3aStopSttParams>(&mut ch)?;
        self.send(&ch, RequestId::Hal3aStopStt)
    }

    fn metaset_request(
        &self,
        chan: Chan,
        id: RequestId,
        requests: &[MetaSet],
        start_num: i32,
    ) -> Result<()> {
        let first = requests.first().ok_or_else(|| {
            IpcError::LifecycleMisuse(format!("{id:?} called with an empty request queue"))
        })?;
        let chans = self.channels()?;
        let mut ch = chans.channel(chan as usize).lock();
        {
            let mut p = ch.params::<Hal3aMetaSetParams>()?;
            p.common.sensor_index = self.sensor_index as i32;
            p.request.store(first)?;
            p.start_num = start_num;
        }
        self.send(&ch, id)
    }

    pub fn set(&self, requests: &[MetaSet]) -> Result<()> {
        self.metaset_request(Chan::Set, RequestId::Hal3aSet, requests, 0)
    }

    pub fn start_request_q(&self, requests: &[MetaSet]) -> Result<()> {
        self.metaset_request(Chan::StartRequestQ, RequestId::Hal3aStartRequestQ, requests, 0)
    }

    pub fn start_capture(&self, requests: &[MetaSet], start_num: i32) -> Result<()> {
        self.metaset_request(Chan::StartCapture, RequestId::Hal3aStartCapture, requests, start_num)
    }

    pub fn preset(&self, requests: &[MetaSet]) -> Result<()> {
        self.metaset_request(Chan::Preset, RequestId::Hal3aPreset, requests, 0)
    }

    /// Run the per-frame ISP tuning exchange: control metadata and tuning
    /// buffers in, result metadata out.
    pub fn set_isp(
        &self,
        flow_type: i32,
        control: &MetaSet,
        tuning: &Hal3aTuningBuf,
        result: &mut MetaSet,
    ) -> Result<()> {
        let _isp = self.isp_lock.lock();
        let chans = self.channels()?;

        let (p2_handle, lce_handle) = {
            let mut caches = self.caches.lock();
            let p2 = cached_handle(&mut caches.p2_tuning, self.transport.as_ref(), tuning.p2_fd)?;
            let lce = match &tuning.lce {
                Some(lce) => {
                    Some(cached_handle(&mut caches.lce, self.transport.as_ref(), lce.fd)?)
                }
                None => None,
            };
            (p2, lce)
        };

        let mut ch = chans.channel(Chan::SetIsp as usize).lock();
        {
            let mut p = ch.params::<Hal3aSetIspParams>()?;
            p.common.sensor_index = self.sensor_index as i32;
            p.flow_type = flow_type;
            p.control.store(control)?;
            p.p2_tuning_handle = p2_handle;
            match (&tuning.lce, lce_handle) {
                (Some(lce), Some(handle)) => {
                    p.lce_enable = 1;
                    p.lce_buf = IpcImageBufInfo {
                        format: lce.format,
                        width: lce.width,
                        height: lce.height,
                        plane_count: lce.plane_count,
                        strides: lce.strides,
                        scanlines: lce.scanlines,
                        handle,
                    };
                }
                _ => {
                    p.lce_enable = 0;
                    p.lce_buf = IpcImageBufInfo::empty();
                }
            }
        }
        self.send(&ch, RequestId::Hal3aSetIsp)?;

        let p = ch.params::<Hal3aSetIspParams>()?;
        *result = p.result.load()?;
        Ok(())
    }

    fn ctrl_request(&self, chans: &ChannelSet, ctrl: &Hal3aCtrl) -> Result<Hal3aCtrlReply> {
        let mut ch = chans.channel(Chan::Ctrl as usize).lock();
        {
            let mut p = ch.params::<Hal3aCtrlParams>()?;
            *p = Hal3aCtrlParams::default();
            p.common.sensor_index = self.sensor_index as i32;
            ctrl.encode(&mut p)?;
        }
        self.send(&ch, RequestId::Hal3aSendCtrl)?;
        let p = ch.params::<Hal3aCtrlParams>()?;
        Hal3aCtrlReply::read(&p, ctrl)
    }

    /// Multiplexed control call; the reply variant matches the request.
    pub fn send_ctrl(&self, ctrl: &Hal3aCtrl) -> Result<Hal3aCtrlReply> {
        let chans = self.channels()?;
        self.ctrl_request(&chans, ctrl)
    }

    pub fn get_sensor_param(&self, cmd: u32) -> Result<i64> {
        let chans = self.channels()?;
        let mut ch = chans.channel(Chan::SensorParam as usize).lock();
        {
            let mut p = ch.params::<Hal3aGetSensorParamParams>()?;
            p.common.sensor_index = self.sensor_index as i32;
            p.cmd = cmd;
            p.result = 0;
        }
        self.send(&ch, RequestId::Hal3aGetSensorParam)?;
        let p = ch.params::<Hal3aGetSensorParamParams>()?;
        Ok(p.result)
    }

    /// Result metadata for a completed frame.
    pub fn get(&self, frame_id: i32) -> Result<MetaSet> {
        let chans = self.channels()?;
        let mut ch = chans.channel(Chan::Get as usize).lock();
        {
            let mut p = ch.params::<Hal3aGetParams>()?;
            p.common.sensor_index = self.sensor_index as i32;
            p.frame_id = frame_id;
        }
        self.send(&ch, RequestId::Hal3aGet)?;
        let p = ch.params::<Hal3aGetParams>()?;
        p.result.load()
    }

    /// Exchange a P1 tuning buffer over the tuning pipe.
    pub fn tuning_pipe_cmd(&self, cmd: u32, magic: i32, fd: RawFd) -> Result<i32> {
        let chans = self.channels()?;
        let handle = {
            let mut caches = self.caches.lock();
            cached_handle(&mut caches.p1_tuning, self.transport.as_ref(), fd)?
        };
        let mut ch = chans.channel(Chan::TuningPipe as usize).lock();
        {
            let mut p = ch.params::<Hal3aTuningPipeParams>()?;
            p.common.sensor_index = self.sensor_index as i32;
            p.cmd = cmd;
            p.magic = magic;
            p.tuning_handle = handle;
            p.response = 0;
        }
        self.send(&ch, RequestId::Hal3aTuningPipe)?;
        let p = ch.params::<Hal3aTuningPipeParams>()?;
        Ok(p.response)
    }

    /// Exchange a statistics buffer over the stat pipe.
    pub fn stt_pipe_cmd(&self, cmd: u32, magic: i32, kind: u32, fd: RawFd) -> Result<()> {
        let chans = self.channels()?;
        let handle = {
            let mut caches = self.caches.lock();
            cached_handle(&mut caches.stt, self.transport.as_ref(), fd)?
        };
        let mut ch = chans.channel(Chan::SttPipe as usize).lock();
        {
            let mut p = ch.params::<Hal3aSttPipeParams>()?;
            p.common.sensor_index = self.sensor_index as i32;
            p.cmd = cmd;
            p.magic = magic;
            p.stt_kind = kind;
            p.stt_handle = handle;
        }
        self.send(&ch, RequestId::Hal3aSttPipe)
    }

    pub fn set_fd_info(&self, faces: &FdInfoPacket) -> Result<()> {
        let chans = self.channels()?;
        let mut ch = chans.channel(Chan::SetFdInfo as usize).lock();
        {
            let mut p = ch.params::<Hal3aSetFdInfoParams>()?;
            p.common.sensor_index = self.sensor_index as i32;
            p.faces = *faces;
        }
        self.send(&ch, RequestId::Hal3aSetFdInfo)
    }

    // -- callbacks ---------------------------------------------------------

    /// Attach `receiver` for `kind` and make sure the notify loop is
    /// parked on the remote relay.
    pub fn attach_cb(&self, kind: NotifyKind, receiver: Arc<dyn NotifyReceiver>) -> Result<()> {
        let chans = self.channels()?;
        {
            let mut ch = chans.channel(Chan::AttachCb as usize).lock();
            {
                let mut p = ch.params::<Hal3aAttachCbParams>()?;
                p.common.sensor_index = self.sensor_index as i32;
                p.kind = kind as u32;
            }
            self.send(&ch, RequestId::Hal3aAttachCb)?;
        }
        self.receivers.lock().insert(kind, receiver);

        let mut thread = self.notify_thread.lock();
        if thread.is_none() {
            *thread = Some(self.spawn_notify_loop(Arc::clone(&chans)));
        }
        Ok(())
    }

    /// Detach `kind`; the notify loop exits after the server releases the
    /// last parked wait.
    pub fn detach_cb(&self, kind: NotifyKind) -> Result<()> {
        let chans = self.channels()?;
        {
            let mut ch = chans.channel(Chan::DetachCb as usize).lock();
            {
                let mut p = ch.params::<Hal3aDetachCbParams>()?;
                p.common.sensor_index = self.sensor_index as i32;
                p.kind = kind as u32;
            }
            self.send(&ch, RequestId::Hal3aDetachCb)?;
        }
        let none_left = {
            let mut receivers = self.receivers.lock();
            receivers.remove(&kind);
            receivers.is_empty()
        };
        if none_left {
            if let Some(t) = self.notify_thread.lock().take() {
                let _ = t.join();
            }
        }
        Ok(())
    }

    /// The client half of the callback relay: keep one notify request
    /// parked at the server and fan completed notifications out to the
    /// attached receivers.
    fn spawn_notify_loop(&self, chans: Arc<ChannelSet>) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let receivers = Arc::clone(&self.receivers);
        let sensor = self.sensor_index;
        std::thread::Builder::new()
            .name(format!("camipc-3a-notify-{sensor}"))
            .spawn(move || loop {
                let event = {
                    let mut ch = chans.channel(Chan::Notify as usize).lock();
                    match ch.params::<Hal3aNotifyParams>() {
                        Ok(mut p) => {
                            p.common.sensor_index = sensor as i32;
                            p.stopped = 0;
                        }
                        Err(e) => {
                            error!("notify loop: {e}");
                            break;
                        }
                    }
                    if let Err(e) =
                        transport.request_sync(RequestId::Hal3aNotifyCallback, sensor, ch.handle())
                    {
                        error!("notify loop: {e}");
                        break;
                    }
                    match ch.params::<Hal3aNotifyParams>() {
                        Ok(p) => (p.kind, p.stopped, p.payload),
                        Err(e) => {
                            error!("notify loop: {e}");
                            break;
                        }
                    }
                };
                let (kind, stopped, payload) = event;
                if stopped != 0 {
                    debug!("notify loop for sensor {sensor} stopped");
                    break;
                }
                if let Some(kind) = NotifyKind::from_u32(kind) {
                    let receiver = receivers.lock().get(&kind).cloned();
                    if let Some(r) = receiver {
                        r.on_notify(kind, &payload);
                    }
                }
            })
            .expect("spawn notify loop")
    }
}

impl Drop for Hal3aClient {
    fn drop(&mut self) {
        // A collaborator that forgot its uninit still gets a clean remote
        // teardown instead of leaked channels and registrations.
        let chans = {
            let mut state = self.state.lock();
            if state.channels.is_none() {
                return;
            }
            warn!(
                "hal3a adapter dropped with {} live users, tearing down",
                state.users.len()
            );
            state.users.clear();
            state.channels.take().expect("checked above")
        };
        self.teardown(chans);
    }
}
