//! Order-preserving packed encoding for tuples
//!
//! Each element encodes as a tag byte followed by a payload whose byte
//! order matches the element order:
//! - byte strings and UTF-8 strings are 0x00-terminated, embedded zeros
//!   escaped as `00 FF`
//! - integers and timestamps are sign-biased big-endian u64
//! - floats flip the sign bit (positive) or all bits (negative), which is
//!   exactly the monotone mapping behind `total_cmp`
//!
//! Encodings are prefix-free, so the byte order of a concatenation equals
//! element-wise tuple order, and a packed prefix sorts before all of its
//! extensions. Unpacking is exact: `unpack_elements(pack_elements(t)) == t`.

use super::{Tuple, TupleElement};
use crate::error::{Error, Result};
use uuid::Uuid;

pub(crate) const TAG_NULL: u8 = 0x00;
pub(crate) const TAG_BYTES: u8 = 0x01;
pub(crate) const TAG_STRING: u8 = 0x02;
pub(crate) const TAG_INT: u8 = 0x11;
pub(crate) const TAG_FLOAT: u8 = 0x20;
pub(crate) const TAG_DOUBLE: u8 = 0x21;
pub(crate) const TAG_FALSE: u8 = 0x26;
pub(crate) const TAG_TRUE: u8 = 0x27;
pub(crate) const TAG_UUID: u8 = 0x30;
pub(crate) const TAG_TIMESTAMP: u8 = 0x31;

/// Pack a sequence of elements into a fresh buffer
pub fn pack_elements(elements: &[TupleElement]) -> Vec<u8> {
    let mut out = Vec::with_capacity(elements.len() * 9);
    pack_into(elements, &mut out);
    out
}

/// Pack a sequence of elements, appending to `out`
pub fn pack_into(elements: &[TupleElement], out: &mut Vec<u8>) {
    for element in elements {
        pack_element(element, out);
    }
}

fn pack_element(element: &TupleElement, out: &mut Vec<u8>) {
    match element {
        TupleElement::Null => out.push(TAG_NULL),
        TupleElement::Bytes(b) => {
            out.push(TAG_BYTES);
            escape_bytes(b, out);
        }
        TupleElement::String(s) => {
            out.push(TAG_STRING);
            escape_bytes(s.as_bytes(), out);
        }
        TupleElement::Int(v) => {
            out.push(TAG_INT);
            out.extend_from_slice(&bias_i64(*v).to_be_bytes());
        }
        TupleElement::Float(v) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&order_f32_bits(*v).to_be_bytes());
        }
        TupleElement::Double(v) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&order_f64_bits(*v).to_be_bytes());
        }
        TupleElement::Bool(false) => out.push(TAG_FALSE),
        TupleElement::Bool(true) => out.push(TAG_TRUE),
        TupleElement::Uuid(u) => {
            out.push(TAG_UUID);
            out.extend_from_slice(u.as_bytes());
        }
        TupleElement::Timestamp(v) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&bias_i64(*v).to_be_bytes());
        }
    }
}

/// Unpack a buffer produced by [`pack_elements`] back into elements
pub fn unpack_elements(mut bytes: &[u8]) -> Result<Tuple> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let (element, rest) = unpack_element(bytes)?;
        out.push(element);
        bytes = rest;
    }
    Ok(out)
}

fn unpack_element(bytes: &[u8]) -> Result<(TupleElement, &[u8])> {
    let tag = bytes[0];
    let rest = &bytes[1..];
    match tag {
        TAG_NULL => Ok((TupleElement::Null, rest)),
        TAG_BYTES => {
            let (raw, rest) = unescape_bytes(rest)?;
            Ok((TupleElement::Bytes(raw), rest))
        }
        TAG_STRING => {
            let (raw, rest) = unescape_bytes(rest)?;
            let s = String::from_utf8(raw)
                .map_err(|e| Error::internal(format!("invalid UTF-8 in packed string: {}", e)))?;
            Ok((TupleElement::String(s), rest))
        }
        TAG_INT => {
            let (v, rest) = take_u64(rest)?;
            Ok((TupleElement::Int(unbias_i64(v)), rest))
        }
        TAG_FLOAT => {
            let (v, rest) = take_u32(rest)?;
            Ok((TupleElement::Float(f32::from_bits(unorder_f32_bits(v))), rest))
        }
        TAG_DOUBLE => {
            let (v, rest) = take_u64(rest)?;
            Ok((TupleElement::Double(f64::from_bits(unorder_f64_bits(v))), rest))
        }
        TAG_FALSE => Ok((TupleElement::Bool(false), rest)),
        TAG_TRUE => Ok((TupleElement::Bool(true), rest)),
        TAG_UUID => {
            if rest.len() < 16 {
                return Err(Error::internal("truncated packed uuid"));
            }
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&rest[..16]);
            Ok((TupleElement::Uuid(Uuid::from_bytes(raw)), &rest[16..]))
        }
        TAG_TIMESTAMP => {
            let (v, rest) = take_u64(rest)?;
            Ok((TupleElement::Timestamp(unbias_i64(v)), rest))
        }
        other => Err(Error::internal(format!(
            "unknown tuple tag 0x{:02x} in packed key",
            other
        ))),
    }
}

fn escape_bytes(raw: &[u8], out: &mut Vec<u8>) {
    for &b in raw {
        out.push(b);
        if b == 0x00 {
            out.push(0xFF);
        }
    }
    out.push(0x00);
}

fn unescape_bytes(bytes: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0x00 {
            if i + 1 < bytes.len() && bytes[i + 1] == 0xFF {
                out.push(0x00);
                i += 2;
                continue;
            }
            return Ok((out, &bytes[i + 1..]));
        }
        out.push(bytes[i]);
        i += 1;
    }
    Err(Error::internal("unterminated packed byte string"))
}

fn take_u64(bytes: &[u8]) -> Result<(u64, &[u8])> {
    if bytes.len() < 8 {
        return Err(Error::internal("truncated packed integer"));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    Ok((u64::from_be_bytes(raw), &bytes[8..]))
}

fn take_u32(bytes: &[u8]) -> Result<(u32, &[u8])> {
    if bytes.len() < 4 {
        return Err(Error::internal("truncated packed float"));
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    Ok((u32::from_be_bytes(raw), &bytes[4..]))
}

fn bias_i64(v: i64) -> u64 {
    (v as u64) ^ (1 << 63)
}

fn unbias_i64(v: u64) -> i64 {
    (v ^ (1 << 63)) as i64
}

fn order_f64_bits(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & (1 << 63) != 0 { !bits } else { bits | (1 << 63) }
}

fn unorder_f64_bits(v: u64) -> u64 {
    if v & (1 << 63) != 0 { v & !(1 << 63) } else { !v }
}

fn order_f32_bits(v: f32) -> u32 {
    let bits = v.to_bits();
    if bits & (1 << 31) != 0 { !bits } else { bits | (1 << 31) }
}

fn unorder_f32_bits(v: u32) -> u32 {
    if v & (1 << 31) != 0 { v & !(1 << 31) } else { !v }
}
