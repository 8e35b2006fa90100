// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Parameter structs for the software noise-reduction subsystem.

use crate::channel::ParamStruct;
use crate::proto::CommonParams;
use crate::registry::BufferHandle;

/// Capacity of the flattened EXIF/debug metadata array.
pub const DEBUG_META_CAPACITY: usize = 2048;

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct SwnrInitParams {
    pub common: CommonParams,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct SwnrUninitParams {
    pub common: CommonParams,
}

/// One noise-reduction pass over an image buffer passed by handle. The
/// handler resolves the handle and runs the engine directly on the mapped
/// pixels.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct SwnrDoParams {
    pub common: CommonParams,
    pub image_handle: BufferHandle,
    pub width: i32,
    pub height: i32,
    pub format: i32,
    pub iso: i32,
    pub magic: i32,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct SwnrDebugParams {
    pub common: CommonParams,
    pub exif_meta: [u8; DEBUG_META_CAPACITY],
}

impl Default for SwnrDebugParams {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

unsafe impl ParamStruct for SwnrInitParams {}
unsafe impl ParamStruct for SwnrUninitParams {}
unsafe impl ParamStruct for SwnrDoParams {}
unsafe impl ParamStruct for SwnrDebugParams {}
