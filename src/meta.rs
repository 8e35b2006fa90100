// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Variable-length camera metadata and the flatten/unflatten contract
// used to carry it across the process boundary inside fixed-capacity
// byte arrays embedded in the parameter structs.

use std::collections::BTreeMap;

use crate::error::{IpcError, Result};

/// Explicit serialization into a caller-provided, fixed-capacity buffer.
///
/// `flatten` returns the number of bytes written and fails loudly with
/// `SerializationOverflow` when the capacity is exceeded; `unflatten`
/// mirrors it and fails the same way on truncated input. Implemented once
/// per type that crosses the shared-memory boundary with variable length.
pub trait Flatten: Sized {
    fn flatten(&self, dst: &mut [u8]) -> Result<usize>;
    fn unflatten(src: &[u8]) -> Result<Self>;
}

/// A single metadata value.
#[derive(Clone, Debug, PartialEq)]
pub enum MetaValue {
    I32(i32),
    I64(i64),
    F32(f32),
    Bytes(Vec<u8>),
}

const TYPE_I32: u8 = 1;
const TYPE_I64: u8 = 2;
const TYPE_F32: u8 = 3;
const TYPE_BYTES: u8 = 4;

/// Tag-addressed metadata bag, the broker-side stand-in for the camera
/// stack's per-request metadata. Tags are sorted so flattened output is
/// deterministic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    entries: BTreeMap<u32, MetaValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, tag: u32, value: MetaValue) {
        self.entries.insert(tag, value);
    }

    pub fn set_i32(&mut self, tag: u32, v: i32) {
        self.set(tag, MetaValue::I32(v));
    }

    pub fn set_i64(&mut self, tag: u32, v: i64) {
        self.set(tag, MetaValue::I64(v));
    }

    pub fn set_f32(&mut self, tag: u32, v: f32) {
        self.set(tag, MetaValue::F32(v));
    }

    pub fn set_bytes(&mut self, tag: u32, v: &[u8]) {
        self.set(tag, MetaValue::Bytes(v.to_vec()));
    }

    pub fn get(&self, tag: u32) -> Option<&MetaValue> {
        self.entries.get(&tag)
    }

    pub fn remove(&mut self, tag: u32) -> Option<MetaValue> {
        self.entries.remove(&tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &MetaValue)> {
        self.entries.iter()
    }
}

// ---------------------------------------------------------------------------
// Wire form: u32 entry count, then per entry
//   u32 tag | u8 type | u32 payload length | payload bytes
// ---------------------------------------------------------------------------

struct Writer<'a> {
    dst: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.pos + bytes.len();
        if end > self.dst.len() {
            return Err(IpcError::SerializationOverflow {
                need: end,
                capacity: self.dst.len(),
            });
        }
        self.dst[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn put_u32(&mut self, v: u32) -> Result<()> {
        self.put(&v.to_le_bytes())
    }
}

struct Reader<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        if end > self.src.len() {
            return Err(IpcError::SerializationOverflow {
                need: end,
                capacity: self.src.len(),
            });
        }
        let out = &self.src[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn take_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl Flatten for Metadata {
    fn flatten(&self, dst: &mut [u8]) -> Result<usize> {
        let mut w = Writer { dst, pos: 0 };
        w.put_u32(self.entries.len() as u32)?;
        for (&tag, value) in &self.entries {
            w.put_u32(tag)?;
            match value {
                MetaValue::I32(v) => {
                    w.put(&[TYPE_I32])?;
                    w.put_u32(4)?;
                    w.put(&v.to_le_bytes())?;
                }
                MetaValue::I64(v) => {
                    w.put(&[TYPE_I64])?;
                    w.put_u32(8)?;
                    w.put(&v.to_le_bytes())?;
                }
                MetaValue::F32(v) => {
                    w.put(&[TYPE_F32])?;
                    w.put_u32(4)?;
                    w.put(&v.to_le_bytes())?;
                }
                MetaValue::Bytes(v) => {
                    w.put(&[TYPE_BYTES])?;
                    w.put_u32(v.len() as u32)?;
                    w.put(v)?;
                }
            }
        }
        Ok(w.pos)
    }

    fn unflatten(src: &[u8]) -> Result<Self> {
        let mut r = Reader { src, pos: 0 };
        let count = r.take_u32()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let tag = r.take_u32()?;
            let kind = r.take(1)?[0];
            let len = r.take_u32()? as usize;
            let payload = r.take(len)?;
            let value = match (kind, len) {
                (TYPE_I32, 4) => MetaValue::I32(i32::from_le_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ])),
                (TYPE_I64, 8) => {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(payload);
                    MetaValue::I64(i64::from_le_bytes(b))
                }
                (TYPE_F32, 4) => MetaValue::F32(f32::from_le_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ])),
                (TYPE_BYTES, _) => MetaValue::Bytes(payload.to_vec()),
                _ => {
                    return Err(IpcError::SerializationOverflow {
                        need: len,
                        capacity: src.len(),
                    })
                }
            };
            entries.insert(tag, value);
        }
        Ok(Self { entries })
    }
}
