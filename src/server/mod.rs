// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Server-side adapters: one per subsystem, each owning the engine
// instances for its sensors and the handler table entries that
// deserialize, invoke, and serialize back in place.

mod hal3a;
mod swnr;

pub use hal3a::Hal3aServer;
pub use swnr::SwnrServer;

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::engine::NotifyReceiver;
use crate::proto::hal3a::{NotifyKind, NotifyPayload};
use crate::proto::MAX_SENSORS;

// ---------------------------------------------------------------------------
// Notify relay
// ---------------------------------------------------------------------------

struct RelayInner {
    queues: [VecDeque<(NotifyKind, NotifyPayload)>; MAX_SENSORS],
    attached: [usize; MAX_SENSORS],
    quit: [bool; MAX_SENSORS],
}

/// Bridges engine-originated notifications to the client's parked notify
/// request. The engine posts from its own thread; the notify-callback
/// handler blocks in [`wait`] on the callback group's worker until a
/// notification (or shutdown) arrives and writes it into the notify
/// channel in place.
///
/// [`wait`]: NotifyRelay::wait
pub struct NotifyRelay {
    inner: Mutex<RelayInner>,
    cv: Condvar,
}

impl NotifyRelay {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RelayInner {
                queues: Default::default(),
                attached: [0; MAX_SENSORS],
                quit: [false; MAX_SENSORS],
            }),
            cv: Condvar::new(),
        }
    }

    /// Queue a notification and wake the parked handler.
    pub fn post(&self, sensor: usize, kind: NotifyKind, payload: NotifyPayload) {
        let mut inner = self.inner.lock();
        inner.queues[sensor].push_back((kind, payload));
        self.cv.notify_all();
    }

    /// Block until a notification for `sensor` arrives. Returns `None`
    /// once the last callback is detached (or the sensor is uninited),
    /// telling the client loop to stop re-arming.
    pub fn wait(&self, sensor: usize) -> Option<(NotifyKind, NotifyPayload)> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(ev) = inner.queues[sensor].pop_front() {
                return Some(ev);
            }
            if inner.quit[sensor] {
                return None;
            }
            self.cv.wait(&mut inner);
        }
    }

    /// One more callback kind attached for `sensor`.
    pub fn attach(&self, sensor: usize) {
        let mut inner = self.inner.lock();
        inner.attached[sensor] += 1;
        inner.quit[sensor] = false;
    }

    /// One callback kind detached; releases the parked wait when the last
    /// one goes.
    pub fn detach(&self, sensor: usize) {
        let mut inner = self.inner.lock();
        inner.attached[sensor] = inner.attached[sensor].saturating_sub(1);
        if inner.attached[sensor] == 0 {
            inner.quit[sensor] = true;
            self.cv.notify_all();
        }
    }

    /// Unconditional shutdown for `sensor` (engine uninit).
    pub fn quit(&self, sensor: usize) {
        let mut inner = self.inner.lock();
        inner.attached[sensor] = 0;
        inner.quit[sensor] = true;
        inner.queues[sensor].clear();
        self.cv.notify_all();
    }
}

impl Default for NotifyRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// The receiver handed to the engine at attach-callback time; forwards
/// every notification into the relay.
pub(crate) struct RelayReceiver {
    pub(crate) relay: std::sync::Arc<NotifyRelay>,
    pub(crate) sensor: usize,
}

impl NotifyReceiver for RelayReceiver {
    fn on_notify(&self, kind: NotifyKind, payload: &NotifyPayload) {
        self.relay.post(self.sensor, kind, *payload);
    }
}
