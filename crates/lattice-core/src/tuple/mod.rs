//! Tuple layer - comparable values and the order-preserving key codec
//!
//! Every value that can appear in a primary key, an index entry, or a
//! filter literal is a [`TupleElement`]. The closed variant set keeps one
//! comparator in one place; index scans, sorts, intersections, and
//! histogram bucketing all order values through [`TupleElement::cmp`],
//! which agrees byte-for-byte with the packed encoding in [`pack`].

pub mod pack;

pub use pack::{pack_elements, pack_into, unpack_elements};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// A tuple is an ordered sequence of elements
pub type Tuple = Vec<TupleElement>;

/// A single comparable value in a key or filter literal
///
/// Ordering is total: elements order first by type tag (matching the
/// packed encoding), then by value. Floats use IEEE total ordering, so
/// `-0.0 < 0.0` and NaN sorts above infinity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TupleElement {
    /// Null, sorts before every other element
    Null,
    /// Raw byte string
    Bytes(Vec<u8>),
    /// UTF-8 string
    String(String),
    /// 64-bit signed integer
    Int(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// Boolean, false < true
    Bool(bool),
    /// UUID, ordered by its big-endian bytes
    Uuid(Uuid),
    /// Milliseconds since the Unix epoch
    Timestamp(i64),
}

impl TupleElement {
    /// Rank used to order elements of different types; identical to the
    /// tag byte order of the packed encoding.
    pub(crate) fn type_rank(&self) -> u8 {
        match self {
            TupleElement::Null => pack::TAG_NULL,
            TupleElement::Bytes(_) => pack::TAG_BYTES,
            TupleElement::String(_) => pack::TAG_STRING,
            TupleElement::Int(_) => pack::TAG_INT,
            TupleElement::Float(_) => pack::TAG_FLOAT,
            TupleElement::Double(_) => pack::TAG_DOUBLE,
            TupleElement::Bool(false) => pack::TAG_FALSE,
            TupleElement::Bool(true) => pack::TAG_TRUE,
            TupleElement::Uuid(_) => pack::TAG_UUID,
            TupleElement::Timestamp(_) => pack::TAG_TIMESTAMP,
        }
    }

    /// The smallest element strictly greater than `self` in tuple order,
    /// or `None` when the type has no successor (integer at its maximum,
    /// float at infinity, `true`, NaN, null).
    ///
    /// Range construction for `> v` and `<= v` depends on this returning
    /// `None` rather than an approximation; see the index matcher.
    pub fn successor(&self) -> Option<TupleElement> {
        match self {
            TupleElement::Null => None,
            TupleElement::Bytes(b) => {
                let mut next = b.clone();
                next.push(0x00);
                Some(TupleElement::Bytes(next))
            }
            TupleElement::String(s) => {
                let mut next = s.clone();
                next.push('\u{0}');
                Some(TupleElement::String(next))
            }
            TupleElement::Int(v) => v.checked_add(1).map(TupleElement::Int),
            TupleElement::Float(v) => f32_next_up(*v).map(TupleElement::Float),
            TupleElement::Double(v) => f64_next_up(*v).map(TupleElement::Double),
            TupleElement::Bool(false) => Some(TupleElement::Bool(true)),
            TupleElement::Bool(true) => None,
            TupleElement::Uuid(u) => {
                let v = u.as_u128();
                v.checked_add(1).map(|n| TupleElement::Uuid(Uuid::from_u128(n)))
            }
            TupleElement::Timestamp(v) => v.checked_add(1).map(TupleElement::Timestamp),
        }
    }

    /// True when the element is null
    pub fn is_null(&self) -> bool {
        matches!(self, TupleElement::Null)
    }
}

impl PartialEq for TupleElement {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TupleElement {}

impl PartialOrd for TupleElement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TupleElement {
    fn cmp(&self, other: &Self) -> Ordering {
        use TupleElement::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (Uuid(a), Uuid(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl fmt::Display for TupleElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TupleElement::Null => write!(f, "null"),
            TupleElement::Bytes(b) => write!(f, "0x{}", hex_string(b)),
            TupleElement::String(s) => write!(f, "{:?}", s),
            TupleElement::Int(v) => write!(f, "{}", v),
            TupleElement::Float(v) => write!(f, "{}f", v),
            TupleElement::Double(v) => write!(f, "{}", v),
            TupleElement::Bool(v) => write!(f, "{}", v),
            TupleElement::Uuid(u) => write!(f, "{}", u),
            TupleElement::Timestamp(v) => write!(f, "ts:{}", v),
        }
    }
}

impl From<i64> for TupleElement {
    fn from(v: i64) -> Self {
        TupleElement::Int(v)
    }
}

impl From<&str> for TupleElement {
    fn from(v: &str) -> Self {
        TupleElement::String(v.to_string())
    }
}

impl From<String> for TupleElement {
    fn from(v: String) -> Self {
        TupleElement::String(v)
    }
}

impl From<f64> for TupleElement {
    fn from(v: f64) -> Self {
        TupleElement::Double(v)
    }
}

impl From<bool> for TupleElement {
    fn from(v: bool) -> Self {
        TupleElement::Bool(v)
    }
}

/// Compare two tuples element-wise, shorter-is-prefix sorts first.
///
/// Agrees with byte order of the packed encodings because element
/// encodings are prefix-free.
pub fn compare_tuples(a: &[TupleElement], b: &[TupleElement]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn f32_next_up(v: f32) -> Option<f32> {
    if v.is_nan() || v == f32::INFINITY {
        return None;
    }
    if v == 0.0 {
        // -0.0's successor in total order is +0.0
        if v.is_sign_negative() {
            return Some(0.0);
        }
        return Some(f32::from_bits(1));
    }
    let bits = v.to_bits();
    let next = if v > 0.0 { bits + 1 } else { bits - 1 };
    Some(f32::from_bits(next))
}

fn f64_next_up(v: f64) -> Option<f64> {
    if v.is_nan() || v == f64::INFINITY {
        return None;
    }
    if v == 0.0 {
        if v.is_sign_negative() {
            return Some(0.0);
        }
        return Some(f64::from_bits(1));
    }
    let bits = v.to_bits();
    let next = if v > 0.0 { bits + 1 } else { bits - 1 };
    Some(f64::from_bits(next))
}
