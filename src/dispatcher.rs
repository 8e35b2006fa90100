// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Server-side request dispatcher. Routes inbound request envelopes to the
// registered handler on the worker thread owning the request's
// (routing group, sensor index) pair. One thread per pair, each with a
// bounded FIFO: traffic within a pair is strictly ordered, traffic across
// pairs runs in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Sender};
use log::{debug, error};
use parking_lot::RwLock;

use crate::error::{status, IpcError, Result};
use crate::proto::{routing_group, RequestId, RoutingGroup, WireHeader, MAX_SENSORS};
use crate::registry::{BufferHandle, BufferRegistry, NO_BUFFER};

/// Depth of each per-pair FIFO; a full queue backpressures the
/// client-facing thread.
const QUEUE_DEPTH: usize = 32;

/// A handler invoked with the resolved `(addr, size)` of the request's
/// shared buffer (null/0 when the request carried no buffer). Handlers
/// must check the size against their parameter struct before anything
/// else.
pub type Handler = Arc<dyn Fn(*mut u8, usize) -> Result<()> + Send + Sync>;

/// Completion callback: `(request_id, status, buffer_handle)`. The only
/// path results take back to the transport layer.
pub type CompletionFn = Box<dyn Fn(u32, i32, i32) + Send + Sync>;

struct RawRegion {
    addr: *mut u8,
    len: usize,
}

// The region points into a registry-owned mapping that outlives the
// dispatch call; the worker is the only accessor while the call is in
// flight.
unsafe impl Send for RawRegion {}

struct Task {
    request_id: u32,
    region: RawRegion,
    done: Sender<i32>,
}

/// The per-group, per-sensor worker pool plus the handler table.
pub struct Dispatcher {
    registry: Arc<BufferRegistry>,
    handlers: Arc<RwLock<HashMap<u32, Handler>>>,
    workers: HashMap<(RoutingGroup, usize), Sender<Task>>,
    threads: Vec<JoinHandle<()>>,
    complete: CompletionFn,
}

impl Dispatcher {
    /// Build the full worker pool from the static group enumeration.
    pub fn new(registry: Arc<BufferRegistry>, complete: CompletionFn) -> Self {
        let handlers: Arc<RwLock<HashMap<u32, Handler>>> = Arc::new(RwLock::new(HashMap::new()));
        let mut workers = HashMap::new();
        let mut threads = Vec::new();

        for group in RoutingGroup::ALL {
            for sensor in 0..MAX_SENSORS {
                let (tx, rx) = bounded::<Task>(QUEUE_DEPTH);
                let table = Arc::clone(&handlers);
                let name = format!("camipc-{group:?}-{sensor}");
                let handle = std::thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || {
                        while let Ok(task) = rx.recv() {
                            let status = run_task(&table, &task);
                            // Receiver gone means the caller gave up; the
                            // buffer was still rewritten in place.
                            let _ = task.done.send(status);
                        }
                    })
                    .expect("spawn dispatcher worker");
                workers.insert((group, sensor), tx);
                threads.push(handle);
            }
        }

        Self {
            registry,
            handlers,
            workers,
            threads,
            complete,
        }
    }

    /// Register the handler for one request kind. Server adapters call
    /// this once per operation at attach time.
    pub fn register_handler(&self, id: RequestId, handler: Handler) {
        self.handlers.write().insert(id as u32, handler);
    }

    /// The registry this dispatcher resolves buffer handles against.
    pub fn registry(&self) -> &Arc<BufferRegistry> {
        &self.registry
    }

    /// Accept one inbound request envelope, run it to completion on its
    /// group worker, and report the status through the completion
    /// callback. Returns the same status for transports that want it
    /// inline.
    pub fn dispatch(&self, request_id: u32, header: &[u8], buffer_handle: BufferHandle) -> i32 {
        let status = match self.route(request_id, header, buffer_handle) {
            Ok(code) => code,
            Err(e) => {
                error!("dispatch {request_id:#x}: {e}");
                e.status_code()
            }
        };
        (self.complete)(request_id, status, buffer_handle);
        status
    }

    fn route(&self, request_id: u32, header: &[u8], buffer_handle: BufferHandle) -> Result<i32> {
        // Header first: nothing touches shared memory until it parses.
        let hdr = WireHeader::parse(header)?;
        let id = RequestId::from_u32(request_id)
            .ok_or_else(|| IpcError::MalformedHeader(format!("unknown request id {request_id:#x}")))?;

        let region = if buffer_handle != NO_BUFFER {
            let info = self
                .registry
                .lookup(buffer_handle)
                .map_err(|_| IpcError::UnknownBuffer(buffer_handle))?;
            RawRegion {
                addr: info.addr,
                len: info.size,
            }
        } else {
            RawRegion {
                addr: std::ptr::null_mut(),
                len: 0,
            }
        };

        let group = routing_group(id);
        let tx = self
            .workers
            .get(&(group, hdr.sensor_index))
            .expect("worker pool covers every (group, sensor) pair");

        let (done_tx, done_rx) = bounded::<i32>(1);
        let task = Task {
            request_id,
            region,
            done: done_tx,
        };
        if tx.send(task).is_err() {
            // Worker already shut down; the call is simply not serviced.
            error!("dispatch {request_id:#x}: worker {group:?}/{} is gone", hdr.sensor_index);
            return Ok(status::REMOTE_CALL_FAILED);
        }

        debug!("dispatch {request_id:#x} -> {group:?}/{}", hdr.sensor_index);
        match done_rx.recv() {
            Ok(code) => Ok(code),
            Err(_) => Ok(status::REMOTE_CALL_FAILED),
        }
    }
}

fn run_task(table: &RwLock<HashMap<u32, Handler>>, task: &Task) -> i32 {
    let handler = match table.read().get(&task.request_id) {
        Some(h) => Arc::clone(h),
        None => {
            error!("no handler registered for request {:#x}", task.request_id);
            return status::REMOTE_CALL_FAILED;
        }
    };
    match handler(task.region.addr, task.region.len) {
        Ok(()) => status::OK,
        Err(e) => {
            error!("request {:#x} failed: {e}", task.request_id);
            e.status_code()
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Disconnect every queue, then join; workers drain what is left
        // and exit on disconnect.
        self.workers.clear();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
