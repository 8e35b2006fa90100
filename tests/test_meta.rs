// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Tests for the metadata flatten/unflatten contract.

use camipc::{Flatten, IpcError, MetaValue, Metadata};

#[test]
fn roundtrip_all_value_kinds() {
    let mut meta = Metadata::new();
    meta.set_i32(0x1000, -42);
    meta.set_i64(0x1001, 1 << 40);
    meta.set_f32(0x1002, 2.5);
    meta.set_bytes(0x1003, b"tuning blob");

    let mut buf = [0u8; 256];
    let written = meta.flatten(&mut buf).expect("flatten");
    assert!(written > 0 && written <= buf.len());

    let back = Metadata::unflatten(&buf).expect("unflatten");
    assert_eq!(back, meta);
    assert_eq!(back.get(0x1000), Some(&MetaValue::I32(-42)));
    assert_eq!(back.get(0x1003), Some(&MetaValue::Bytes(b"tuning blob".to_vec())));
}

#[test]
fn flatten_reports_exact_overflow() {
    let mut meta = Metadata::new();
    meta.set_bytes(1, &[0u8; 100]);
    let mut buf = [0u8; 64];
    match meta.flatten(&mut buf) {
        Err(IpcError::SerializationOverflow { need, capacity }) => {
            assert!(need > capacity);
            assert_eq!(capacity, 64);
        }
        other => panic!("expected overflow, got {other:?}"),
    }
}

#[test]
fn unflatten_rejects_truncated_input() {
    let mut meta = Metadata::new();
    meta.set_i64(7, 99);
    let mut buf = [0u8; 64];
    let written = meta.flatten(&mut buf).expect("flatten");

    // Chop the last payload byte off.
    assert!(Metadata::unflatten(&buf[..written - 1]).is_err());
}

#[test]
fn flatten_is_deterministic_and_sorted() {
    let mut a = Metadata::new();
    a.set_i32(2, 2);
    a.set_i32(1, 1);
    let mut b = Metadata::new();
    b.set_i32(1, 1);
    b.set_i32(2, 2);

    let mut buf_a = [0u8; 64];
    let mut buf_b = [0u8; 64];
    let na = a.flatten(&mut buf_a).expect("flatten a");
    let nb = b.flatten(&mut buf_b).expect("flatten b");
    assert_eq!(&buf_a[..na], &buf_b[..nb]);
}

#[test]
fn overwrite_replaces_value() {
    let mut meta = Metadata::new();
    meta.set_i32(5, 1);
    meta.set_i32(5, 2);
    assert_eq!(meta.len(), 1);
    assert_eq!(meta.get(5), Some(&MetaValue::I32(2)));
}

#[test]
fn stale_bytes_after_payload_are_ignored() {
    // Channels are reused call after call; a shorter flatten over a longer
    // stale one must still parse to the new contents.
    let mut buf = [0u8; 128];
    let mut long = Metadata::new();
    long.set_bytes(1, &[7u8; 64]);
    long.flatten(&mut buf).expect("flatten long");

    let mut short = Metadata::new();
    short.set_i32(2, 9);
    short.flatten(&mut buf).expect("flatten short");

    let back = Metadata::unflatten(&buf).expect("unflatten");
    assert_eq!(back, short);
}
