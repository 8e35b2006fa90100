// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Server adapter for the software noise-reduction subsystem: the compact
// second instance of the generic server-adapter shape.

use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::channel::ParamView;
use crate::dispatcher::Dispatcher;
use crate::engine::{SwnrConfig, SwnrEngine, SwnrEngineFactory};
use crate::error::{IpcError, Result};
use crate::meta::Flatten;
use crate::proto::swnr::*;
use crate::proto::{RequestId, MAX_SENSORS};
use crate::registry::BufferRegistry;
use crate::server::hal3a::{engine_failed, sensor_index};

pub struct SwnrServer {
    factory: Box<dyn SwnrEngineFactory>,
    engines: RwLock<[Option<Arc<dyn SwnrEngine>>; MAX_SENSORS]>,
    registry: Arc<BufferRegistry>,
}

impl SwnrServer {
    pub fn new(factory: Box<dyn SwnrEngineFactory>, registry: Arc<BufferRegistry>) -> Arc<Self> {
        Arc::new(Self {
            factory,
            engines: RwLock::new(Default::default()),
            registry,
        })
    }

    pub fn attach(self: &Arc<Self>, dispatcher: &Dispatcher) {
        macro_rules! handler {
            ($id:expr, $method:ident) => {{
                let s = Arc::clone(self);
                dispatcher.register_handler($id, Arc::new(move |a, n| s.$method(a, n)));
            }};
        }
        handler!(RequestId::SwnrInit, on_init);
        handler!(RequestId::SwnrUninit, on_uninit);
        handler!(RequestId::SwnrDoSwnr, on_do_swnr);
        handler!(RequestId::SwnrGetDebugInfo, on_get_debug_info);
    }

    fn engine(&self, sensor: usize) -> Result<Arc<dyn SwnrEngine>> {
        self.engines.read()[sensor]
            .clone()
            .ok_or(IpcError::EngineNotInitialized(sensor))
    }

    fn on_init(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<SwnrInitParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        debug!("swnr init: sensor {sensor}");
        let engine = self
            .factory
            .create(sensor)
            .map_err(|e| engine_failed(RequestId::SwnrInit, e))?;
        self.engines.write()[sensor] = Some(engine);
        Ok(())
    }

    fn on_uninit(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<SwnrUninitParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        debug!("swnr uninit: sensor {sensor}");
        self.engines.write()[sensor] = None;
        Ok(())
    }

    fn on_do_swnr(&self, addr: *mut u8, size: usize) -> Result<()> {
        let view = ParamView::<SwnrDoParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let engine = self.engine(sensor)?;

        let info = self.registry.lookup(view.image_handle)?;
        let image = unsafe { std::slice::from_raw_parts_mut(info.addr, info.size) };

        let cfg = SwnrConfig {
            width: view.width,
            height: view.height,
            format: view.format,
            iso: view.iso,
            magic: view.magic,
        };
        engine
            .do_swnr(&cfg, image)
            .map_err(|e| engine_failed(RequestId::SwnrDoSwnr, e))
    }

    fn on_get_debug_info(&self, addr: *mut u8, size: usize) -> Result<()> {
        let mut view = ParamView::<SwnrDebugParams>::new(addr, size)?;
        let sensor = sensor_index(view.common.sensor_index)?;
        let meta = self
            .engine(sensor)?
            .debug_info()
            .map_err(|e| engine_failed(RequestId::SwnrGetDebugInfo, e))?;
        meta.flatten(&mut view.exif_meta)?;
        Ok(())
    }
}
