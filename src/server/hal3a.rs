// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Server adapter for the 3A subsystem. Owns one engine instance per
// sensor (created lazily on the remote init call), registers one handler
// per request kind, and relays engine notifications back to the client.
//
// Every handler starts with the mandatory size check via ParamView and
// fails fast on an empty engine slot — a stale or truncated segment is
// never deserialized and a missing engine is never dereferenced.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};

use crate::channel::ParamView;
use crate::dispatcher::Dispatcher;
use crate::engine::{EngineError, Hal3aConfig, Hal3aEngine, Hal3aEngineFactory, TuningBufs};
use crate::error::{status, IpcError, Result};
use crate::meta::Flatten;
use crate::proto::hal3a::*;
use crate::proto::{RequestId, MAX_SENSORS};
use crate::registry::{BufferHandle, BufferRegistry, NO_BUFFER};
use crate::server::{NotifyRelay, RelayReceiver};

pub struct Hal3aServer {
    factory: Box<dyn Hal3aEngineFactory>,
    engines: RwLock<[Option<Arc<dyn Hal3aEngine>>; MAX_SENSORS]>,
    /// Static sensor info pushed by the client before init; keyed by
    /// sensor list index.
    static_info: Mutex<HashMap<i32, SensorStaticInfo>>,
    relay: Arc<NotifyRelay>,
    registry: Arc<BufferRegistry>,
}

impl Hal3aServer {
    pub fn new(factory: Box<dyn Hal3aEngineFactory>, registry: Arc<BufferRegistry>) -> Arc<Self> {
        Arc::new(Self {
            factory,
            engines: RwLock::new(Default::default()),
            static_info: Mutex::new(HashMap::new()),
            relay: Arc::new(NotifyRelay::new()),
            registry,
        })
    }

    /// Register this adapter's handler-table entries with the dispatcher.
    pub fn attach(self: &Arc<Self>, dispatcher: &Dispatcher) {
        macro_rules! handler {
            ($id:expr, $method:ident) => {{
                let s = Arc::clone(self);
                dispatcher.register_handler($id, Arc::new(move |a, n| s.$method(a, n)));
            }};
        }
        handler!(RequestId::Hal3aInit, on_init);
        handler!(RequestId::Hal3aUninit, on_uninit);
        handler!(RequestId::Hal3aConfig, on_config);
        handler!(RequestId::Hal3aStart, on_start);
        handler!(RequestId::Hal3aStop, on_stop);
        handler!(RequestId::Hal3aStopStt, on_stop_stt);
        handler!(RequestId::Hal3aSet, on_set);
        handler!(RequestId::Hal3aSetIsp, on_set_isp);
        handler!(RequestId::Hal3aSendCtrl, on_send_ctrl);
        handler!(RequestId::Hal3aGetSensorParam, on_get_sensor_param);
        handler!(RequestId::Hal3aNotifyCallback, on_notify_callback);
        handler!(RequestId::Hal3aTuningPipe, on_tuning_pipe);
        handler!(RequestId::Hal3aSttPipe, on_stt_pipe);
        handler!(RequestId::Hal3aStartCapture, on_start_capture);
        handler!(RequestId::Hal3aStartRequestQ, on_start_request_q);
        handler!(RequestId::Hal3aPreset, on_preset);
        handler!(RequestId::Hal3aAttachCb, on_attach_cb);
        handler!(RequestId::Hal3aDetachCb, on_detach_cb);
        handler!(RequestId::Hal3aGet, on_get);
        handler!(RequestId::Hal3aSetFdInfo, on_set_fd_info);
    }

    /// Static info the client pushed for a sensor-list index, if any.
    pub fn static_info(&self, idx: i32) -> Option<SensorStaticInfo> {
        self.static_info.lock().get(&idx).copied()
    }

    fn engine(&self, sensor: usize) -> Result<Arc<dyn Hal3aEngine>> {
        self.engines.read()[sensor]
            .clone()
            .ok_or(IpcError::EngineNotInitialized(sensor))
    }

    /// Resolve a buffer handle embedded in a parameter struct to a
    /// handler-local mutable slice. Performed immediately before the
    /// engine call; the slice never outlives the dispatch.
    fn resolve_buf<'a>(&self, handle: BufferHandle) -> Result<&'a mut [u8]> {
        let info = self.registry.lookup(handle)?;
        Ok(unsafe { std::slice::from_raw_parts_mut(info.addr, info.size) })
    }

    // -- handlers ----------------------------------------------------------

    fn on_init(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aInitParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        debug!("hal3a init: sensor {sensor}");

        let mut engines = self.engines.write();
        if engines[sensor].is_some() {
            warn!("hal3a init: sensor {sensor} already has an engine, replacing");
        }
        let engine = self
            .factory
            .create(sensor)
            .map_err(|e| engine_failed(RequestId::Hal3aInit, e))?;
        engines[sensor] = Some(engine);
        Ok(())
    }

    fn on_uninit(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aInitParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        debug!("hal3a uninit: sensor {sensor}");

        self.relay.quit(sensor);
        self.engines.write()[sensor] = None;
        Ok(())
    }

    fn on_config(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aConfigParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let engine = self.engine(sensor)?;

        let cfg = Hal3aConfig {
            subsample_count: view.subsample_count,
            bit_mode: view.bit_mode,
            hlr_option: view.hlr_option,
            cfg_app: crate::meta::Metadata::unflatten(&view.cfg_app_meta)?,
            cfg_hal: crate::meta::Metadata::unflatten(&view.cfg_hal_meta)?,
        };

        engine
            .config(&cfg)
            .map_err(|e| engine_failed(RequestId::Hal3aConfig, e))
    }

    fn on_start(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aStartParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        self.engine(sensor)?
            .start(view.start_num)
            .map_err(|e| engine_failed(RequestId::Hal3aStart, e))
    }

    fn on_stop(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aStopParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        self.engine(sensor)?
            .stop()
            .map_err(|e| engine_failed(RequestId::Hal3aStop, e))
    }

    fn on_stop_stt(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aStopSttParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        self.engine(sensor)?.stop_stt();
        Ok(())
    }

    fn on_set(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aMetaSetParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let request = view.request.load()?;
        self.engine(sensor)?
            .set(&request)
            .map_err(|e| engine_failed(RequestId::Hal3aSet, e))
    }

    fn on_set_isp(&self, addr: *mut u8, size: usize) -> Result<()> {
        let mut view = ParamView::<Hal3aSetIspParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let engine = self.engine(sensor)?;

        let control = view.control.load()?;

        // Second registry lookups, right before the engine call: convert
        // the handles the client registered into live mappings.
        let p2 = self.resolve_buf(view.p2_tuning_handle)?;
        let lce = if view.lce_enable != 0 && view.lce_buf.handle != NO_BUFFER {
            Some(self.resolve_buf(view.lce_buf.handle)?)
        } else {
            None
        };

        let result = engine
            .set_isp(view.flow_type, &control, TuningBufs { p2, lce })
            .map_err(|e| engine_failed(RequestId::Hal3aSetIsp, e))?;
        view.result.store(&result)?;
        Ok(())
    }

    fn on_send_ctrl(&self, addr: *mut u8, size: usize) -> Result<()> {
        let mut view = ParamView::<Hal3aCtrlParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let ctrl = Hal3aCtrl::decode(&view)?;

        // Static-info push arrives before init and needs no engine.
        if let Hal3aCtrl::SetStaticInfo(info) = ctrl {
            debug!("hal3a static info: idx {} device {}", info.idx, info.device_id);
            self.static_info.lock().insert(info.idx, info);
            return Ok(());
        }

        let reply = self
            .engine(sensor)?
            .send_ctrl(ctrl)
            .map_err(|e| engine_failed(RequestId::Hal3aSendCtrl, e))?;
        reply.write(&mut view)
    }

    fn on_get_sensor_param(&self, addr: *mut u8, size: usize) -> Result<()> {
        let mut view = ParamView::<Hal3aGetSensorParamParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        view.result = self
            .engine(sensor)?
            .get_sensor_param(view.cmd)
            .map_err(|e| engine_failed(RequestId::Hal3aGetSensorParam, e))?;
        Ok(())
    }

    /// Parked by the client's notify loop; returns when the relay has a
    /// notification (written into the channel in place) or is shutting
    /// down (`stopped` flag set).
    fn on_notify_callback(&self, addr: *mut u8, size: usize) -> Result<()> {
        let mut view = ParamView::<Hal3aNotifyParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        match self.relay.wait(sensor) {
            Some((kind, payload)) => {
                view.kind = kind as u32;
                view.payload = payload;
                view.stopped = 0;
            }
            None => {
                view.stopped = 1;
            }
        }
        Ok(())
    }

    fn on_tuning_pipe(&self, addr: *mut u8, size: usize) -> Result<()> {
        let mut view = ParamView::<Hal3aTuningPipeParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let engine = self.engine(sensor)?;
        let buf = self.resolve_buf(view.tuning_handle)?;
        view.response = engine
            .tuning_pipe_cmd(view.cmd, view.magic, buf)
            .map_err(|e| engine_failed(RequestId::Hal3aTuningPipe, e))?;
        Ok(())
    }

    fn on_stt_pipe(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aSttPipeParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let engine = self.engine(sensor)?;
        let buf = self.resolve_buf(view.stt_handle)?;
        engine
            .stt_pipe_cmd(view.cmd, view.magic, view.stt_kind, buf)
            .map_err(|e| engine_failed(RequestId::Hal3aSttPipe, e))
    }

    fn on_start_capture(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aMetaSetParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let request = view.request.load()?;
        self.engine(sensor)?
            .start_capture(&request, view.start_num)
            .map_err(|e| engine_failed(RequestId::Hal3aStartCapture, e))
    }

    fn on_start_request_q(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aMetaSetParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let request = view.request.load()?;
        self.engine(sensor)?
            .start_request_q(&request)
            .map_err(|e| engine_failed(RequestId::Hal3aStartRequestQ, e))
    }

    fn on_preset(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aMetaSetParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let request = view.request.load()?;
        self.engine(sensor)?
            .preset(&request)
            .map_err(|e| engine_failed(RequestId::Hal3aPreset, e))
    }

    fn on_attach_cb(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aAttachCbParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let kind = NotifyKind::from_u32(view.kind)
            .ok_or_else(|| IpcError::MalformedHeader(format!("bad notify kind {}", view.kind)))?;
        let engine = self.engine(sensor)?;

        self.relay.attach(sensor);
        engine.attach_cb(
            kind,
            Arc::new(RelayReceiver {
                relay: Arc::clone(&self.relay),
                sensor,
            }),
        );
        Ok(())
    }

    fn on_detach_cb(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aDetachCbParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let kind = NotifyKind::from_u32(view.kind)
            .ok_or_else(|| IpcError::MalformedHeader(format!("bad notify kind {}", view.kind)))?;
        self.engine(sensor)?.detach_cb(kind);
        self.relay.detach(sensor);
        Ok(())
    }

    fn on_get(&self, addr: *mut u8, size: usize) -> Result<()> {
        let mut view = ParamView::<Hal3aGetParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let result = self
            .engine(sensor)?
            .get(view.frame_id)
            .map_err(|e| engine_failed(RequestId::Hal3aGet, e))?;
        view.result.store(&result)?;
        Ok(())
    }

    fn on_set_fd_info(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<Hal3aSetFdInfoParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        self.engine(sensor)?
            .set_fd_info(&view.faces)
            .map_err(|e| engine_failed(RequestId::Hal3aSetFdInfo, e))
    }
}

/// Sensor index out of the common prefix, bounds-checked against the
/// engine table.
pub(crate) fn sensor_index(raw: i32) -> Result<usize> {
    let idx = raw as usize;
    if raw < 0 || idx >= MAX_SENSORS {
        return Err(IpcError::MalformedHeader(format!(
            "sensor index {raw} out of range in params"
        )));
    }
    Ok(idx)
}

pub(crate) fn engine_failed(id: RequestId, e: EngineError) -> IpcError {
    error!("{id:?}: {e}");
    IpcError::RemoteCallFailed(id as u32, status::REMOTE_CALL_FAILED)
}
