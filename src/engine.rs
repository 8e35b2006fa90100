// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Capability contracts of the remote algorithm engines. The broker only
// invokes these; the implementations (the actual 3A / noise-reduction
// libraries) live outside this crate. Server adapters hold one engine
// instance per sensor, created lazily through the factory on the remote
// "init" call.

use std::sync::Arc;

use thiserror::Error;

use crate::proto::hal3a::{
    FdInfoPacket, Hal3aCtrl, Hal3aCtrlReply, MetaSet, NotifyKind, NotifyPayload,
};

/// Failure reported by an engine. Server adapters convert any engine
/// error into a `RemoteCallFailed` status; the detail stays in the log.
#[derive(Debug, Error)]
#[error("engine: {0}")]
pub struct EngineError(pub String);

pub type EngineResult<T> = Result<T, EngineError>;

/// Static configuration handed to the 3A engine at config time.
#[derive(Clone, Debug, Default)]
pub struct Hal3aConfig {
    pub subsample_count: i32,
    pub bit_mode: i32,
    pub hlr_option: i32,
    pub cfg_app: crate::meta::Metadata,
    pub cfg_hal: crate::meta::Metadata,
}

/// Receiver for engine-originated notifications, attached per kind.
pub trait NotifyReceiver: Send + Sync {
    fn on_notify(&self, kind: NotifyKind, payload: &NotifyPayload);
}

/// Mutable views over the tuning buffers for one set-isp call, resolved
/// server-side from the handles embedded in the parameter struct.
pub struct TuningBufs<'a> {
    pub p2: &'a mut [u8],
    pub lce: Option<&'a mut [u8]>,
}

/// The 3A (auto-exposure / auto-focus / auto-white-balance) engine.
pub trait Hal3aEngine: Send + Sync {
    fn config(&self, cfg: &Hal3aConfig) -> EngineResult<()>;
    fn start(&self, start_num: i32) -> EngineResult<()>;
    fn stop(&self) -> EngineResult<()>;
    fn stop_stt(&self);

    /// Queue one request's metadata set.
    fn set(&self, request: &MetaSet) -> EngineResult<()>;

    /// Run the per-frame ISP tuning step: consumes the control metadata,
    /// writes the tuning blob into the resolved buffers, and returns the
    /// result metadata.
    fn set_isp(&self, flow_type: i32, control: &MetaSet, bufs: TuningBufs<'_>)
        -> EngineResult<MetaSet>;

    fn start_request_q(&self, request: &MetaSet) -> EngineResult<()>;
    fn start_capture(&self, request: &MetaSet, start_num: i32) -> EngineResult<()>;
    fn preset(&self, request: &MetaSet) -> EngineResult<()>;

    /// Multiplexed control entry point.
    fn send_ctrl(&self, ctrl: Hal3aCtrl) -> EngineResult<Hal3aCtrlReply>;

    fn get_sensor_param(&self, cmd: u32) -> EngineResult<i64>;

    /// Result metadata for a completed frame.
    fn get(&self, frame_id: i32) -> EngineResult<MetaSet>;

    fn attach_cb(&self, kind: NotifyKind, receiver: Arc<dyn NotifyReceiver>);
    fn detach_cb(&self, kind: NotifyKind);

    /// Exchange over the tuning pipe (enqueue/dequeue a tuning buffer).
    fn tuning_pipe_cmd(&self, cmd: u32, magic: i32, buf: &mut [u8]) -> EngineResult<i32>;

    /// Exchange over the statistics pipe.
    fn stt_pipe_cmd(&self, cmd: u32, magic: i32, kind: u32, buf: &mut [u8]) -> EngineResult<()>;

    fn set_fd_info(&self, faces: &FdInfoPacket) -> EngineResult<()>;
}

/// Creates one 3A engine per sensor on the remote "init" call.
pub trait Hal3aEngineFactory: Send + Sync {
    fn create(&self, sensor_index: usize) -> EngineResult<Arc<dyn Hal3aEngine>>;
}

/// Geometry and tuning inputs for one software noise-reduction pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct SwnrConfig {
    pub width: i32,
    pub height: i32,
    pub format: i32,
    pub iso: i32,
    pub magic: i32,
}

/// The software noise-reduction engine.
pub trait SwnrEngine: Send + Sync {
    /// Run noise reduction in place on the mapped image.
    fn do_swnr(&self, cfg: &SwnrConfig, image: &mut [u8]) -> EngineResult<()>;

    /// EXIF-style debug metadata of the last pass.
    fn debug_info(&self) -> EngineResult<crate::meta::Metadata>;
}

pub trait SwnrEngineFactory: Send + Sync {
    fn create(&self, sensor_index: usize) -> EngineResult<Arc<dyn SwnrEngine>>;
}
