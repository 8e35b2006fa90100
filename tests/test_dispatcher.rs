// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Tests for the request dispatcher: header validation, buffer
// resolution, completion callback delivery, per-group FIFO ordering and
// cross-group parallelism.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use camipc::proto::{RequestId, REQUEST_MAGIC};
use camipc::{status, BufferRegistry, Dispatcher, NO_BUFFER};
use parking_lot::Mutex;

fn dispatcher() -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        Arc::new(BufferRegistry::new()),
        Box::new(|_, _, _| {}),
    ))
}

fn header(sensor: u8) -> [u8; 2] {
    [REQUEST_MAGIC, sensor]
}

#[test]
fn malformed_headers_are_rejected_before_dispatch() {
    let d = dispatcher();
    // Too short.
    assert_eq!(
        d.dispatch(RequestId::Hal3aStart as u32, &[REQUEST_MAGIC], NO_BUFFER),
        status::MALFORMED_HEADER
    );
    // Wrong magic.
    assert_eq!(
        d.dispatch(RequestId::Hal3aStart as u32, &[0x00, 0x00], NO_BUFFER),
        status::MALFORMED_HEADER
    );
    // Sensor index out of range.
    assert_eq!(
        d.dispatch(RequestId::Hal3aStart as u32, &[REQUEST_MAGIC, 0x7f], NO_BUFFER),
        status::MALFORMED_HEADER
    );
    // Unknown request id.
    assert_eq!(
        d.dispatch(0xdead_beef, &header(0), NO_BUFFER),
        status::MALFORMED_HEADER
    );
}

#[test]
fn unknown_buffer_handle_is_rejected() {
    let d = dispatcher();
    assert_eq!(
        d.dispatch(RequestId::Hal3aStart as u32, &header(0), 4711),
        status::UNKNOWN_BUFFER
    );
}

#[test]
fn unregistered_request_fails_without_crashing() {
    let d = dispatcher();
    assert_eq!(
        d.dispatch(RequestId::Hal3aGet as u32, &header(0), NO_BUFFER),
        status::REMOTE_CALL_FAILED
    );
}

#[test]
fn completion_callback_carries_request_and_status() {
    let seen: Arc<Mutex<Vec<(u32, i32, i32)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let d = Dispatcher::new(
        Arc::new(BufferRegistry::new()),
        Box::new(move |id, st, handle| sink.lock().push((id, st, handle))),
    );
    d.register_handler(RequestId::Hal3aStart, Arc::new(|_, _| Ok(())));

    d.dispatch(RequestId::Hal3aStart as u32, &header(0), NO_BUFFER);
    d.dispatch(RequestId::Hal3aStart as u32, &[0u8; 1], NO_BUFFER);

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], (RequestId::Hal3aStart as u32, status::OK, NO_BUFFER));
    assert_eq!(
        seen[1],
        (RequestId::Hal3aStart as u32, status::MALFORMED_HEADER, NO_BUFFER)
    );
}

#[test]
fn handler_status_flows_back() {
    let d = dispatcher();
    d.register_handler(
        RequestId::Hal3aStop,
        Arc::new(|_, _| {
            Err(camipc::IpcError::EngineNotInitialized(0))
        }),
    );
    assert_eq!(
        d.dispatch(RequestId::Hal3aStop as u32, &header(0), NO_BUFFER),
        status::ENGINE_NOT_INITIALIZED
    );
}

#[test]
fn calls_within_one_group_complete_in_submission_order() {
    let d = dispatcher();
    let order: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    let next = Arc::new(AtomicI32::new(0));

    let sink = Arc::clone(&order);
    let counter = Arc::clone(&next);
    d.register_handler(
        RequestId::Hal3aSet,
        Arc::new(move |_, _| {
            sink.lock().push(counter.fetch_add(1, Ordering::SeqCst));
            Ok(())
        }),
    );

    for _ in 0..3 {
        assert_eq!(
            d.dispatch(RequestId::Hal3aSet as u32, &header(0), NO_BUFFER),
            status::OK
        );
    }
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[test]
fn different_groups_run_in_parallel() {
    let d = dispatcher();

    // The Set-group handler parks until the Default-group handler runs.
    // If the two groups shared a worker this test would deadlock.
    let (unblock_tx, unblock_rx) = crossbeam::channel::bounded::<()>(1);
    let rx = Mutex::new(unblock_rx);
    d.register_handler(
        RequestId::Hal3aSet,
        Arc::new(move |_, _| {
            rx.lock().recv().expect("unblocked by the other group");
            Ok(())
        }),
    );
    d.register_handler(
        RequestId::Hal3aStart,
        Arc::new(move |_, _| {
            unblock_tx.send(()).expect("send unblock");
            Ok(())
        }),
    );

    let d2 = Arc::clone(&d);
    let blocked = std::thread::spawn(move || {
        d2.dispatch(RequestId::Hal3aSet as u32, &header(0), NO_BUFFER)
    });
    assert_eq!(
        d.dispatch(RequestId::Hal3aStart as u32, &header(0), NO_BUFFER),
        status::OK
    );
    assert_eq!(blocked.join().unwrap(), status::OK);
}

#[test]
fn sensors_of_one_group_run_in_parallel() {
    let d = dispatcher();

    // Sensor 0's worker parks until sensor 1's worker of the same group
    // runs. Workers are named "camipc-<group>-<sensor>", which is how the
    // shared handler tells the two apart.
    let (unblock_tx, unblock_rx) = crossbeam::channel::bounded::<()>(1);
    let rx = Mutex::new(unblock_rx);
    d.register_handler(
        RequestId::Hal3aSet,
        Arc::new(move |_, _| {
            let on_sensor_0 = std::thread::current()
                .name()
                .is_some_and(|n| n.ends_with("-0"));
            if on_sensor_0 {
                rx.lock().recv().expect("unblocked by sensor 1");
            } else {
                unblock_tx.send(()).expect("send unblock");
            }
            Ok(())
        }),
    );

    let d2 = Arc::clone(&d);
    let blocked = std::thread::spawn(move || {
        d2.dispatch(RequestId::Hal3aSet as u32, &header(0), NO_BUFFER)
    });
    assert_eq!(
        d.dispatch(RequestId::Hal3aSet as u32, &header(1), NO_BUFFER),
        status::OK
    );
    assert_eq!(blocked.join().unwrap(), status::OK);
}
