// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Parameter structs for the 3A subsystem, one POD per request kind,
// embedded directly in the per-call channel segments. Variable-length
// metadata crosses inside fixed-capacity byte arrays via the Flatten
// contract; buffers cross as registry handles, never as addresses —
// only the server side resolves a handle to a mapping.

use crate::channel::ParamStruct;
use crate::error::{IpcError, Result};
use crate::meta::{Flatten, Metadata};
use crate::proto::CommonParams;
use crate::registry::{BufferHandle, NO_BUFFER};

/// Capacity of each flattened-metadata array.
pub const META_CAPACITY: usize = 4096;
/// Capacity of each multiplexed control argument slot.
pub const CTRL_ARG_CAPACITY: usize = 128;
/// Face-rectangle slots in a face-detection result.
pub const MAX_FACES: usize = 15;

// ---------------------------------------------------------------------------
// Metadata packet
// ---------------------------------------------------------------------------

/// One request's worth of metadata: identity fields plus the app and HAL
/// metadata bags in flattened form.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct MetaSetPacket {
    pub magic_num: i32,
    pub dummy: i32,
    pub pre_set_key: i32,
    pub app_meta: [u8; META_CAPACITY],
    pub hal_meta: [u8; META_CAPACITY],
}

impl Default for MetaSetPacket {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// The unpacked, API-level form of a [`MetaSetPacket`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetaSet {
    pub magic_num: i32,
    pub dummy: i32,
    pub pre_set_key: i32,
    pub app: Metadata,
    pub hal: Metadata,
}

impl MetaSetPacket {
    /// Marshal `ms` into this packet in place.
    pub fn store(&mut self, ms: &MetaSet) -> Result<()> {
        self.magic_num = ms.magic_num;
        self.dummy = ms.dummy;
        self.pre_set_key = ms.pre_set_key;
        ms.app.flatten(&mut self.app_meta)?;
        ms.hal.flatten(&mut self.hal_meta)?;
        Ok(())
    }

    /// Unmarshal the packet back into API form.
    pub fn load(&self) -> Result<MetaSet> {
        Ok(MetaSet {
            magic_num: self.magic_num,
            dummy: self.dummy,
            pre_set_key: self.pre_set_key,
            app: Metadata::unflatten(&self.app_meta)?,
            hal: Metadata::unflatten(&self.hal_meta)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Image buffer descriptor
// ---------------------------------------------------------------------------

/// Plane geometry of an image buffer passed by reference. The buffer
/// itself travels as a registry handle in `handle`.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct IpcImageBufInfo {
    pub format: i32,
    pub width: i32,
    pub height: i32,
    pub plane_count: i32,
    pub strides: [i32; 3],
    pub scanlines: [i32; 3],
    pub handle: BufferHandle,
}

impl IpcImageBufInfo {
    pub fn empty() -> Self {
        Self {
            handle: NO_BUFFER,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Per-request parameter structs
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Hal3aInitParams {
    pub common: CommonParams,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct Hal3aConfigParams {
    pub common: CommonParams,
    pub subsample_count: i32,
    pub bit_mode: i32,
    pub hlr_option: i32,
    pub cfg_app_meta: [u8; META_CAPACITY],
    pub cfg_hal_meta: [u8; META_CAPACITY],
}

impl Default for Hal3aConfigParams {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Hal3aStartParams {
    pub common: CommonParams,
    pub start_num: i32,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Hal3aStopParams {
    pub common: CommonParams,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Hal3aStopSttParams {
    pub common: CommonParams,
}

/// Shared by set, start-request-queue, start-capture and preset — the four
/// calls that push a request's metadata set, each over its own channel.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct Hal3aMetaSetParams {
    pub common: CommonParams,
    pub request: MetaSetPacket,
    /// Only meaningful for start-capture.
    pub start_num: i32,
}

#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct Hal3aSetIspParams {
    pub common: CommonParams,
    pub flow_type: i32,
    /// Inbound control metadata.
    pub control: MetaSetPacket,
    /// P2 tuning blob, by handle. The server resolves it immediately
    /// before the engine call.
    pub p2_tuning_handle: BufferHandle,
    pub lce_enable: u32,
    pub lce_buf: IpcImageBufInfo,
    /// Outbound result metadata, rewritten in place by the handler.
    pub result: MetaSetPacket,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct Hal3aCtrlParams {
    pub common: CommonParams,
    pub ctrl: u32,
    pub arg1: [u8; CTRL_ARG_CAPACITY],
    pub arg2: [u8; CTRL_ARG_CAPACITY],
}

impl Default for Hal3aCtrlParams {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Hal3aGetSensorParamParams {
    pub common: CommonParams,
    pub cmd: u32,
    pub result: i64,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Hal3aNotifyParams {
    pub common: CommonParams,
    pub kind: u32,
    /// Set by the server when the relay is shutting down; tells the
    /// client's notify loop to exit instead of re-arming.
    pub stopped: i32,
    pub payload: NotifyPayload,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Hal3aAttachCbParams {
    pub common: CommonParams,
    pub kind: u32,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Hal3aDetachCbParams {
    pub common: CommonParams,
    pub kind: u32,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Hal3aTuningPipeParams {
    pub common: CommonParams,
    pub cmd: u32,
    pub magic: i32,
    pub tuning_handle: BufferHandle,
    pub response: i32,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Hal3aSttPipeParams {
    pub common: CommonParams,
    pub cmd: u32,
    pub magic: i32,
    pub stt_handle: BufferHandle,
    pub stt_kind: u32,
}

#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct Hal3aGetParams {
    pub common: CommonParams,
    pub frame_id: i32,
    pub result: MetaSetPacket,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct FaceRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub score: i32,
    pub id: i32,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct FdInfoPacket {
    pub count: i32,
    pub faces: [FaceRect; MAX_FACES],
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Hal3aSetFdInfoParams {
    pub common: CommonParams,
    pub faces: FdInfoPacket,
}

unsafe impl ParamStruct for Hal3aInitParams {}
unsafe impl ParamStruct for Hal3aConfigParams {}
unsafe impl ParamStruct for Hal3aStartParams {}
unsafe impl ParamStruct for Hal3aStopParams {}
unsafe impl ParamStruct for Hal3aStopSttParams {}
unsafe impl ParamStruct for Hal3aMetaSetParams {}
unsafe impl ParamStruct for Hal3aSetIspParams {}
unsafe impl ParamStruct for Hal3aCtrlParams {}
unsafe impl ParamStruct for Hal3aGetSensorParamParams {}
unsafe impl ParamStruct for Hal3aNotifyParams {}
unsafe impl ParamStruct for Hal3aAttachCbParams {}
unsafe impl ParamStruct for Hal3aDetachCbParams {}
unsafe impl ParamStruct for Hal3aTuningPipeParams {}
unsafe impl ParamStruct for Hal3aSttPipeParams {}
unsafe impl ParamStruct for Hal3aGetParams {}
unsafe impl ParamStruct for Hal3aSetFdInfoParams {}

// ---------------------------------------------------------------------------
// Notify payload
// ---------------------------------------------------------------------------

/// Kinds of engine-originated notifications relayed to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum NotifyKind {
    ProcFinish = 1,
    CurrResult = 2,
    VsyncDone = 3,
}

impl NotifyKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => NotifyKind::ProcFinish,
            2 => NotifyKind::CurrResult,
            3 => NotifyKind::VsyncDone,
            _ => return None,
        })
    }
}

/// Fixed payload of one notification.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct NotifyPayload {
    pub magic: i32,
    pub request_no: i32,
    pub arg1: i64,
    pub arg2: i64,
}

// ---------------------------------------------------------------------------
// Multiplexed control calls
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct SensorStaticInfo {
    pub idx: i32,
    pub kind: i32,
    pub device_id: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct SensorCropWin {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub full_w: i32,
    pub full_h: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct PdBlockInfo {
    pub offset_x: i32,
    pub offset_y: i32,
    pub pitch_x: i32,
    pub pitch_y: i32,
    pub pair_num: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct SensorVcInfo {
    pub vc_num: i32,
    pub vsize: i32,
    pub hsize: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct PeriSensorData {
    pub acceleration: [f32; 3],
}

const CTRL_SET_STATIC_INFO: u32 = 1;
const CTRL_QUERY_CROP_WIN: u32 = 2;
const CTRL_SET_PIXEL_CLOCK: u32 = 3;
const CTRL_SET_PIXEL_LINE: u32 = 4;
const CTRL_QUERY_PDAF_INFO: u32 = 5;
const CTRL_QUERY_PDAF_CAPACITY: u32 = 6;
const CTRL_QUERY_SENSOR_VC_INFO: u32 = 7;
const CTRL_SET_DEFAULT_FRAME_RATE: u32 = 8;
const CTRL_SET_ROLLING_SHUTTER: u32 = 9;
const CTRL_SET_VERTICAL_BLANKING: u32 = 10;
const CTRL_SET_PERI_SENSOR_DATA: u32 = 11;

/// The multiplexed "send control" argument, keyed by control id. Only the
/// payload valid for a given control is representable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Hal3aCtrl {
    SetStaticInfo(SensorStaticInfo),
    QueryCropWin { scenario: u32 },
    SetPixelClock { freq: i32 },
    SetPixelLine { num: u32 },
    QueryPdafInfo { scenario: u32 },
    QueryPdafCapacity { scenario: u32 },
    QuerySensorVcInfo { scenario: u32 },
    SetDefaultFrameRate { scenario: u32, fps: u32 },
    SetRollingShutter { tline: u32, vsize: u32 },
    SetVerticalBlanking { blanking: i32 },
    SetPeriSensorData(PeriSensorData),
}

/// Reply to a control call; `Done` for the set-only controls.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Hal3aCtrlReply {
    Done,
    CropWin(SensorCropWin),
    PdafInfo(PdBlockInfo),
    PdafCapacity(bool),
    SensorVcInfo(SensorVcInfo),
}

/// Copy a POD value into a fixed control-argument slot.
fn put_pod<T: Copy>(dst: &mut [u8; CTRL_ARG_CAPACITY], v: &T) -> Result<()> {
    let need = std::mem::size_of::<T>();
    if need > CTRL_ARG_CAPACITY {
        return Err(IpcError::SerializationOverflow {
            need,
            capacity: CTRL_ARG_CAPACITY,
        });
    }
    unsafe {
        std::ptr::copy_nonoverlapping(v as *const T as *const u8, dst.as_mut_ptr(), need);
    }
    Ok(())
}

/// Read a POD value back out of a control-argument slot.
fn get_pod<T: Copy>(src: &[u8; CTRL_ARG_CAPACITY]) -> Result<T> {
    let need = std::mem::size_of::<T>();
    if need > CTRL_ARG_CAPACITY {
        return Err(IpcError::SerializationOverflow {
            need,
            capacity: CTRL_ARG_CAPACITY,
        });
    }
    let mut out = std::mem::MaybeUninit::<T>::uninit();
    unsafe {
        std::ptr::copy_nonoverlapping(src.as_ptr(), out.as_mut_ptr() as *mut u8, need);
        Ok(out.assume_init())
    }
}

impl Hal3aCtrl {
    /// Marshal into the control parameter struct (client side).
    pub fn encode(&self, params: &mut Hal3aCtrlParams) -> Result<()> {
        match self {
            Hal3aCtrl::SetStaticInfo(info) => {
                params.ctrl = CTRL_SET_STATIC_INFO;
                put_pod(&mut params.arg1, info)?;
            }
            Hal3aCtrl::QueryCropWin { scenario } => {
                params.ctrl = CTRL_QUERY_CROP_WIN;
                put_pod(&mut params.arg1, scenario)?;
            }
            Hal3aCtrl::SetPixelClock { freq } => {
                params.ctrl = CTRL_SET_PIXEL_CLOCK;
                put_pod(&mut params.arg1, freq)?;
            }
            Hal3aCtrl::SetPixelLine { num } => {
                params.ctrl = CTRL_SET_PIXEL_LINE;
                put_pod(&mut params.arg1, num)?;
            }
            Hal3aCtrl::QueryPdafInfo { scenario } => {
                params.ctrl = CTRL_QUERY_PDAF_INFO;
                put_pod(&mut params.arg1, scenario)?;
            }
            Hal3aCtrl::QueryPdafCapacity { scenario } => {
                params.ctrl = CTRL_QUERY_PDAF_CAPACITY;
                put_pod(&mut params.arg1, scenario)?;
            }
            Hal3aCtrl::QuerySensorVcInfo { scenario } => {
                params.ctrl = CTRL_QUERY_SENSOR_VC_INFO;
                put_pod(&mut params.arg1, scenario)?;
            }
            Hal3aCtrl::SetDefaultFrameRate { scenario, fps } => {
                params.ctrl = CTRL_SET_DEFAULT_FRAME_RATE;
                put_pod(&mut params.arg1, scenario)?;
                put_pod(&mut params.arg2, fps)?;
            }
            Hal3aCtrl::SetRollingShutter { tline, vsize } => {
                params.ctrl = CTRL_SET_ROLLING_SHUTTER;
                put_pod(&mut params.arg1, tline)?;
                put_pod(&mut params.arg2, vsize)?;
            }
            Hal3aCtrl::SetVerticalBlanking { blanking } => {
                params.ctrl = CTRL_SET_VERTICAL_BLANKING;
                put_pod(&mut params.arg1, blanking)?;
            }
            Hal3aCtrl::SetPeriSensorData(data) => {
                params.ctrl = CTRL_SET_PERI_SENSOR_DATA;
                put_pod(&mut params.arg1, data)?;
            }
        }
        Ok(())
    }

    /// Unmarshal from the control parameter struct (server side).
    pub fn decode(params: &Hal3aCtrlParams) -> Result<Self> {
        Ok(match params.ctrl {
            CTRL_SET_STATIC_INFO => Hal3aCtrl::SetStaticInfo(get_pod(&params.arg1)?),
            CTRL_QUERY_CROP_WIN => Hal3aCtrl::QueryCropWin {
                scenario: get_pod(&params.arg1)?,
            },
            CTRL_SET_PIXEL_CLOCK => Hal3aCtrl::SetPixelClock {
                freq: get_pod(&params.arg1)?,
            },
            CTRL_SET_PIXEL_LINE => Hal3aCtrl::SetPixelLine {
                num: get_pod(&params.arg1)?,
            },
            CTRL_QUERY_PDAF_INFO => Hal3aCtrl::QueryPdafInfo {
                scenario: get_pod(&params.arg1)?,
            },
            CTRL_QUERY_PDAF_CAPACITY => Hal3aCtrl::QueryPdafCapacity {
                scenario: get_pod(&params.arg1)?,
            },
            CTRL_QUERY_SENSOR_VC_INFO => Hal3aCtrl::QuerySensorVcInfo {
                scenario: get_pod(&params.arg1)?,
            },
            CTRL_SET_DEFAULT_FRAME_RATE => Hal3aCtrl::SetDefaultFrameRate {
                scenario: get_pod(&params.arg1)?,
                fps: get_pod(&params.arg2)?,
            },
            CTRL_SET_ROLLING_SHUTTER => Hal3aCtrl::SetRollingShutter {
                tline: get_pod(&params.arg1)?,
                vsize: get_pod(&params.arg2)?,
            },
            CTRL_SET_VERTICAL_BLANKING => Hal3aCtrl::SetVerticalBlanking {
                blanking: get_pod(&params.arg1)?,
            },
            CTRL_SET_PERI_SENSOR_DATA => Hal3aCtrl::SetPeriSensorData(get_pod(&params.arg1)?),
            other => {
                return Err(IpcError::MalformedHeader(format!(
                    "unknown control id {other}"
                )))
            }
        })
    }
}

impl Hal3aCtrlReply {
    /// Marshal the reply into `arg2` in place (server side).
    pub fn write(&self, params: &mut Hal3aCtrlParams) -> Result<()> {
        match self {
            Hal3aCtrlReply::Done => Ok(()),
            Hal3aCtrlReply::CropWin(win) => put_pod(&mut params.arg2, win),
            Hal3aCtrlReply::PdafInfo(info) => put_pod(&mut params.arg2, info),
            Hal3aCtrlReply::PdafCapacity(cap) => put_pod(&mut params.arg2, &(*cap as i32)),
            Hal3aCtrlReply::SensorVcInfo(info) => put_pod(&mut params.arg2, info),
        }
    }

    /// Unmarshal the reply matching `request` (client side).
    pub fn read(params: &Hal3aCtrlParams, request: &Hal3aCtrl) -> Result<Self> {
        Ok(match request {
            Hal3aCtrl::QueryCropWin { .. } => Hal3aCtrlReply::CropWin(get_pod(&params.arg2)?),
            Hal3aCtrl::QueryPdafInfo { .. } => Hal3aCtrlReply::PdafInfo(get_pod(&params.arg2)?),
            Hal3aCtrl::QueryPdafCapacity { .. } => {
                Hal3aCtrlReply::PdafCapacity(get_pod::<i32>(&params.arg2)? != 0)
            }
            Hal3aCtrl::QuerySensorVcInfo { .. } => {
                Hal3aCtrlReply::SensorVcInfo(get_pod(&params.arg2)?)
            }
            _ => Hal3aCtrlReply::Done,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_encode_decode_roundtrip() {
        let cases = [
            Hal3aCtrl::SetStaticInfo(SensorStaticInfo {
                idx: 1,
                kind: 2,
                device_id: 3,
            }),
            Hal3aCtrl::QueryCropWin { scenario: 7 },
            Hal3aCtrl::SetRollingShutter {
                tline: 10,
                vsize: 1080,
            },
            Hal3aCtrl::SetPeriSensorData(PeriSensorData {
                acceleration: [0.1, -0.2, 9.8],
            }),
        ];
        for ctrl in cases {
            let mut params = Hal3aCtrlParams::default();
            ctrl.encode(&mut params).expect("encode");
            let back = Hal3aCtrl::decode(&params).expect("decode");
            assert_eq!(back, ctrl);
        }
    }

    #[test]
    fn ctrl_decode_rejects_unknown_id() {
        let mut params = Hal3aCtrlParams::default();
        params.ctrl = 0xffff;
        assert!(Hal3aCtrl::decode(&params).is_err());
    }

    #[test]
    fn ctrl_reply_roundtrip() {
        let request = Hal3aCtrl::QueryCropWin { scenario: 0 };
        let win = SensorCropWin {
            x: 0,
            y: 0,
            w: 1920,
            h: 1080,
            full_w: 4032,
            full_h: 3024,
        };
        let mut params = Hal3aCtrlParams::default();
        Hal3aCtrlReply::CropWin(win).write(&mut params).expect("write");
        match Hal3aCtrlReply::read(&params, &request).expect("read") {
            Hal3aCtrlReply::CropWin(got) => assert_eq!(got, win),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn metaset_packet_roundtrip() {
        let mut ms = MetaSet {
            magic_num: 42,
            dummy: 0,
            pre_set_key: 7,
            ..Default::default()
        };
        ms.app.set_i32(0x1001, -5);
        ms.hal.set_i64(0x2002, 1 << 40);

        let mut packet = MetaSetPacket::default();
        packet.store(&ms).expect("store");
        let back = packet.load().expect("load");
        assert_eq!(back, ms);
    }
}
