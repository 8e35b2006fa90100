// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Hot-path microbenchmarks.
//
// Run with:
//   cargo bench --bench registry
//
// Groups:
//   registry_lookup — handle resolution under the read lock, the per-call
//                     cost every dispatched request pays
//   meta_flatten    — metadata marshal/unmarshal at typical entry counts

use std::ffi::CString;

use camipc::{BufferRegistry, Flatten, Metadata};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn anon_shm_fd(size: usize) -> i32 {
    let name = format!("/camipc_bench_{}", std::process::id());
    let c_name = CString::new(name).unwrap();
    unsafe {
        let fd = libc::shm_open(c_name.as_ptr(), libc::O_RDWR | libc::O_CREAT, 0o600);
        assert!(fd >= 0);
        assert_eq!(libc::ftruncate(fd, size as libc::off_t), 0);
        libc::shm_unlink(c_name.as_ptr());
        fd
    }
}

fn bench_registry_lookup(c: &mut Criterion) {
    let reg = BufferRegistry::new();
    let mut handles = Vec::new();
    for _ in 0..64 {
        handles.push(reg.register_buffer(anon_shm_fd(4096)).expect("register"));
    }
    let probe = handles[handles.len() / 2];

    c.bench_function("registry_lookup", |b| {
        b.iter(|| black_box(reg.lookup(black_box(probe)).unwrap()))
    });

    reg.deregister_buffers(&handles);
}

fn bench_meta_flatten(c: &mut Criterion) {
    let mut group = c.benchmark_group("meta_flatten");

    for &entries in &[4usize, 16, 64] {
        let mut meta = Metadata::new();
        for tag in 0..entries as u32 {
            meta.set_i32(tag, tag as i32);
        }
        let mut buf = vec![0u8; 4096];

        group.bench_with_input(BenchmarkId::new("flatten", entries), &entries, |b, _| {
            b.iter(|| black_box(meta.flatten(&mut buf).unwrap()))
        });
        meta.flatten(&mut buf).unwrap();
        group.bench_with_input(BenchmarkId::new("unflatten", entries), &entries, |b, _| {
            b.iter(|| black_box(Metadata::unflatten(&buf).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_registry_lookup, bench_meta_flatten);
criterion_main!(benches);
