//! Record codec — self-describing value encoding (spec.md §3, §4.3).
//!
//! `Value` is a tagged union over the kinds spec.md names; the
//! compressed/overflow variants are resolved inside this module and never
//! cross the public row-storage API (spec.md §9 "Polymorphic value
//! representation").

pub mod overflow;
pub mod varint;

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::read::ZlibDecoder;
use flate2::Compression;
use std::io::Read as _;

use crate::consts::{COMPRESSION_MIN_LEN, COMPRESSION_MIN_SAVING_PCT};
use crate::error::{Error, Result};
use crate::pager::Pager;

use self::varint::{read_uvarint, read_zigzag_varint, write_uvarint, write_zigzag_varint};

// ---- value kind tags (spec.md §3 "Record") ----
const KIND_NULL: u8 = 0;
const KIND_BOOL: u8 = 1;
const KIND_INT64: u8 = 2;
const KIND_FLOAT64: u8 = 3;
const KIND_TEXT: u8 = 4;
const KIND_BLOB: u8 = 5;
const KIND_TEXT_OVERFLOW: u8 = 6;
const KIND_BLOB_OVERFLOW: u8 = 7;
const KIND_TEXT_COMPRESSED: u8 = 8;
const KIND_BLOB_COMPRESSED: u8 = 9;
const KIND_TEXT_COMPRESSED_OVERFLOW: u8 = 10;
const KIND_BLOB_COMPRESSED_OVERFLOW: u8 = 11;

/// A decoded column value. Overflow/compressed variants never escape the
/// codec — callers always see the fully-materialized public variants
/// (`Null`..`Blob`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Internal, codec-only representation that can carry an unresolved
/// overflow pointer or a compressed payload, one tag per value rather
/// than one for the whole record.
enum RawField {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Text(Vec<u8>),
    Blob(Vec<u8>),
    TextCompressed(Vec<u8>),
    BlobCompressed(Vec<u8>),
    TextOverflow { page: u32, len: u32 },
    BlobOverflow { page: u32, len: u32 },
    TextCompressedOverflow { page: u32, len: u32 },
    BlobCompressedOverflow { page: u32, len: u32 },
}

fn zlib_compress(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).expect("in-memory zlib write");
    enc.finish().expect("in-memory zlib finish")
}

fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut dec = ZlibDecoder::new(data);
    let mut out = Vec::new();
    dec.read_to_end(&mut out)
        .map_err(|e| Error::corruption(format!("zlib decompress failed: {e}")))?;
    Ok(out)
}

/// Opportunistically compresses a TEXT/BLOB value, per spec.md §4.3: only
/// when the payload exceeds [`COMPRESSION_MIN_LEN`] and compression saves
/// at least [`COMPRESSION_MIN_SAVING_PCT`] percent.
fn maybe_compress(raw: &[u8]) -> Option<Vec<u8>> {
    if raw.len() < COMPRESSION_MIN_LEN {
        return None;
    }
    let compressed = zlib_compress(raw);
    let saved_pct = 100u64.saturating_sub((compressed.len() as u64 * 100) / raw.len() as u64);
    if saved_pct >= COMPRESSION_MIN_SAVING_PCT {
        Some(compressed)
    } else {
        None
    }
}

fn encode_raw_field(out: &mut Vec<u8>, field: &RawField) {
    match field {
        RawField::Null => {
            out.push(KIND_NULL);
            write_uvarint(out, 0);
        }
        RawField::Bool(b) => {
            out.push(KIND_BOOL);
            write_uvarint(out, 1);
            out.push(if *b { 1 } else { 0 });
        }
        RawField::Int64(v) => {
            let mut payload = Vec::new();
            write_zigzag_varint(&mut payload, *v);
            out.push(KIND_INT64);
            write_uvarint(out, payload.len() as u64);
            out.extend_from_slice(&payload);
        }
        RawField::Float64(v) => {
            out.push(KIND_FLOAT64);
            write_uvarint(out, 8);
            out.extend_from_slice(&v.to_le_bytes());
        }
        RawField::Text(bytes) => {
            out.push(KIND_TEXT);
            write_uvarint(out, bytes.len() as u64);
            out.extend_from_slice(bytes);
        }
        RawField::Blob(bytes) => {
            out.push(KIND_BLOB);
            write_uvarint(out, bytes.len() as u64);
            out.extend_from_slice(bytes);
        }
        RawField::TextCompressed(bytes) => {
            out.push(KIND_TEXT_COMPRESSED);
            write_uvarint(out, bytes.len() as u64);
            out.extend_from_slice(bytes);
        }
        RawField::BlobCompressed(bytes) => {
            out.push(KIND_BLOB_COMPRESSED);
            write_uvarint(out, bytes.len() as u64);
            out.extend_from_slice(bytes);
        }
        RawField::TextOverflow { page, len } => {
            out.push(KIND_TEXT_OVERFLOW);
            write_uvarint(out, 8);
            out.extend_from_slice(&page.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
        }
        RawField::BlobOverflow { page, len } => {
            out.push(KIND_BLOB_OVERFLOW);
            write_uvarint(out, 8);
            out.extend_from_slice(&page.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
        }
        RawField::TextCompressedOverflow { page, len } => {
            out.push(KIND_TEXT_COMPRESSED_OVERFLOW);
            write_uvarint(out, 8);
            out.extend_from_slice(&page.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
        }
        RawField::BlobCompressedOverflow { page, len } => {
            out.push(KIND_BLOB_COMPRESSED_OVERFLOW);
            write_uvarint(out, 8);
            out.extend_from_slice(&page.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
        }
    }
}

fn value_to_raw(v: &Value) -> RawField {
    match v {
        Value::Null => RawField::Null,
        Value::Bool(b) => RawField::Bool(*b),
        Value::Int64(n) => RawField::Int64(*n),
        Value::Float64(f) => RawField::Float64(*f),
        Value::Text(s) => {
            let raw = s.as_bytes();
            match maybe_compress(raw) {
                Some(c) => RawField::TextCompressed(c),
                None => RawField::Text(raw.to_vec()),
            }
        }
        Value::Blob(b) => match maybe_compress(b) {
            Some(c) => RawField::BlobCompressed(c),
            None => RawField::Blob(b.clone()),
        },
    }
}

/// Encodes a single value without overflow handling (inline only). Used by
/// callers that have already decided a value fits inline, and internally by
/// [`encode_record`] before the page-size-aware overflow pass.
pub fn encode_value(v: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_raw_field(&mut out, &value_to_raw(v));
    out
}

/// Decodes a single inline (non-overflow) value at `*offset`, advancing it.
pub fn decode_value(buf: &[u8], offset: &mut usize) -> Result<Value> {
    if *offset >= buf.len() {
        return Err(Error::corruption("value kind byte missing"));
    }
    let kind = buf[*offset];
    *offset += 1;
    let len = read_uvarint(buf, offset)? as usize;
    if *offset + len > buf.len() {
        return Err(Error::corruption("value payload out of range"));
    }
    let payload = &buf[*offset..*offset + len];
    *offset += len;
    decode_inline_kind(kind, payload)
}

fn decode_inline_kind(kind: u8, payload: &[u8]) -> Result<Value> {
    match kind {
        KIND_NULL => Ok(Value::Null),
        KIND_BOOL => {
            if payload.len() != 1 {
                return Err(Error::corruption("bool payload must be 1 byte"));
            }
            Ok(Value::Bool(payload[0] != 0))
        }
        KIND_INT64 => {
            let mut o = 0;
            read_zigzag_varint(payload, &mut o).map(Value::Int64)
        }
        KIND_FLOAT64 => {
            if payload.len() != 8 {
                return Err(Error::corruption("float64 payload must be 8 bytes"));
            }
            let mut b = [0u8; 8];
            b.copy_from_slice(payload);
            Ok(Value::Float64(f64::from_le_bytes(b)))
        }
        KIND_TEXT => String::from_utf8(payload.to_vec())
            .map(Value::Text)
            .map_err(|e| Error::corruption(format!("invalid utf8 text: {e}"))),
        KIND_BLOB => Ok(Value::Blob(payload.to_vec())),
        KIND_TEXT_COMPRESSED => {
            let raw = zlib_decompress(payload)?;
            String::from_utf8(raw)
                .map(Value::Text)
                .map_err(|e| Error::corruption(format!("invalid utf8 text: {e}")))
        }
        KIND_BLOB_COMPRESSED => Ok(Value::Blob(zlib_decompress(payload)?)),
        KIND_TEXT_OVERFLOW
        | KIND_BLOB_OVERFLOW
        | KIND_TEXT_COMPRESSED_OVERFLOW
        | KIND_BLOB_COMPRESSED_OVERFLOW => Err(Error::internal(
            "overflow value requires decode_record_with_overflow",
        )),
        other => Err(Error::corruption(format!("unknown value kind {other}"))),
    }
}

/// Encodes a full record: `[field_count:varint]` followed by each field.
/// Values whose inline encoding exceeds `overflow_threshold` are written as
/// an overflow chain via `pager`; pass `pager = None` to force inline-only
/// encoding (e.g. for B+Tree index keys that are never overflowed).
pub fn encode_record(pager: Option<&Pager>, values: &[Value]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_uvarint(&mut out, values.len() as u64);

    let threshold = pager
        .as_ref()
        .map(|p| crate::consts::overflow_threshold(p.page_size()))
        .unwrap_or(usize::MAX);

    for v in values {
        let raw = value_to_raw(v);
        let inline_len = raw_payload_len(&raw);
        if inline_len > threshold {
            let pager = pager.ok_or_else(|| {
                Error::internal("record field requires overflow but no pager supplied")
            })?;
            let overflowed = spill_to_overflow(pager, raw)?;
            encode_raw_field(&mut out, &overflowed);
        } else {
            encode_raw_field(&mut out, &raw);
        }
    }
    Ok(out)
}

fn raw_payload_len(raw: &RawField) -> usize {
    match raw {
        RawField::Null => 0,
        RawField::Bool(_) => 1,
        RawField::Int64(v) => {
            let mut b = Vec::new();
            write_zigzag_varint(&mut b, *v);
            b.len()
        }
        RawField::Float64(_) => 8,
        RawField::Text(b) | RawField::Blob(b) => b.len(),
        RawField::TextCompressed(b) | RawField::BlobCompressed(b) => b.len(),
        RawField::TextOverflow { .. }
        | RawField::BlobOverflow { .. }
        | RawField::TextCompressedOverflow { .. }
        | RawField::BlobCompressedOverflow { .. } => 8,
    }
}

fn spill_to_overflow(pager: &Pager, raw: RawField) -> Result<RawField> {
    match raw {
        RawField::Text(bytes) => {
            let len = bytes.len() as u32;
            let page = overflow::write_overflow_chain(pager, &bytes)?;
            Ok(RawField::TextOverflow { page, len })
        }
        RawField::Blob(bytes) => {
            let len = bytes.len() as u32;
            let page = overflow::write_overflow_chain(pager, &bytes)?;
            Ok(RawField::BlobOverflow { page, len })
        }
        RawField::TextCompressed(bytes) => {
            let len = bytes.len() as u32;
            let page = overflow::write_overflow_chain(pager, &bytes)?;
            Ok(RawField::TextCompressedOverflow { page, len })
        }
        RawField::BlobCompressed(bytes) => {
            let len = bytes.len() as u32;
            let page = overflow::write_overflow_chain(pager, &bytes)?;
            Ok(RawField::BlobCompressedOverflow { page, len })
        }
        other => Ok(other),
    }
}

/// Decodes a record whose fields are all inline (no overflow present).
/// Fails with `Error::Internal` if any field is an overflow pointer; use
/// [`decode_record_with_overflow`] for records that may carry one.
pub fn decode_record(buf: &[u8]) -> Result<Vec<Value>> {
    let mut offset = 0;
    let count = read_uvarint(buf, &mut offset)? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(decode_value(buf, &mut offset)?);
    }
    Ok(values)
}

/// Decodes a record, resolving any overflow pointers via `pager` and
/// decompressing compressed (inline or overflowed) payloads
/// (spec.md §4.3).
pub fn decode_record_with_overflow(pager: &Pager, buf: &[u8]) -> Result<Vec<Value>> {
    let mut offset = 0;
    let count = read_uvarint(buf, &mut offset)? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(decode_value_with_overflow(pager, buf, &mut offset)?);
    }
    Ok(values)
}

fn decode_value_with_overflow(pager: &Pager, buf: &[u8], offset: &mut usize) -> Result<Value> {
    if *offset >= buf.len() {
        return Err(Error::corruption("value kind byte missing"));
    }
    let kind = buf[*offset];
    *offset += 1;
    let len = read_uvarint(buf, offset)? as usize;
    if *offset + len > buf.len() {
        return Err(Error::corruption("value payload out of range"));
    }
    let payload = &buf[*offset..*offset + len];
    *offset += len;

    match kind {
        KIND_TEXT_OVERFLOW | KIND_TEXT_COMPRESSED_OVERFLOW => {
            if payload.len() != 8 {
                return Err(Error::corruption("overflow pointer must be 8 bytes"));
            }
            let (page, total_len) = read_overflow_pointer(payload);
            let raw = overflow::read_overflow_chain(pager, page, total_len as usize)?;
            let raw = if kind == KIND_TEXT_COMPRESSED_OVERFLOW {
                zlib_decompress(&raw)?
            } else {
                raw
            };
            String::from_utf8(raw)
                .map(Value::Text)
                .map_err(|e| Error::corruption(format!("invalid utf8 text: {e}")))
        }
        KIND_BLOB_OVERFLOW | KIND_BLOB_COMPRESSED_OVERFLOW => {
            if payload.len() != 8 {
                return Err(Error::corruption("overflow pointer must be 8 bytes"));
            }
            let (page, total_len) = read_overflow_pointer(payload);
            let raw = overflow::read_overflow_chain(pager, page, total_len as usize)?;
            let raw = if kind == KIND_BLOB_COMPRESSED_OVERFLOW {
                zlib_decompress(&raw)?
            } else {
                raw
            };
            Ok(Value::Blob(raw))
        }
        _ => decode_inline_kind(kind, payload),
    }
}

fn read_overflow_pointer(payload: &[u8]) -> (u32, u32) {
    let mut p = [0u8; 4];
    p.copy_from_slice(&payload[0..4]);
    let mut l = [0u8; 4];
    l.copy_from_slice(&payload[4..8]);
    (u32::from_le_bytes(p), u32::from_le_bytes(l))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_roundtrip_all_kinds() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int64(-42),
            Value::Int64(i64::MAX),
            Value::Float64(3.5),
            Value::Text("hello".into()),
            Value::Blob(vec![1, 2, 3]),
        ];
        let encoded = encode_record(None, &values).unwrap();
        let decoded = decode_record(&encoded).unwrap();
        assert_eq!(values, decoded);
    }

    #[test]
    fn compression_triggers_above_threshold_and_decodes_back() {
        let big = "a".repeat(1000);
        let raw = value_to_raw(&Value::Text(big.clone()));
        match raw {
            RawField::TextCompressed(_) => {}
            _ => panic!("expected compression to trigger on repetitive text"),
        }
        let mut out = Vec::new();
        encode_raw_field(&mut out, &value_to_raw(&Value::Text(big.clone())));
        let mut off = 0;
        let decoded = decode_value(&out, &mut off).unwrap();
        assert_eq!(decoded, Value::Text(big));
    }

    #[test]
    fn incompressible_short_text_stays_inline() {
        let raw = value_to_raw(&Value::Text("short".into()));
        match raw {
            RawField::Text(_) => {}
            _ => panic!("short text must not compress"),
        }
    }
}
