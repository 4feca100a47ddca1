//! Stable 64-bit hashing of parameter values.
//!
//! The admission sketch and the doorkeeper index by a deterministic 64-bit
//! hash of the shaped parameter, independent of the randomized hasher used
//! by the index maps. Hash collisions are tolerated (the maps compare by
//! equality); the hash only steers frequency estimation, so a degraded
//! hash costs accuracy, never correctness.
//!
//! # Value Representations
//!
//! [`ParamValue`] is the argument type the router and shapers key on, with
//! one hashing rule per representation:
//!
//! | Representation | Hashed as |
//! |----------------|-----------|
//! | signed/unsigned integers (8–64 bit) | widened to `u64`, FNV-64 of the LE bytes |
//! | `f32` / `f64` | IEEE-754 bit pattern, FNV-64 |
//! | `bool` | `0` / `1` directly |
//! | text / byte strings | FNV-64 of the bytes |
//! | structured (`List`) | FNV-64 of a canonical tag + length + payload encoding |
//!
//! Floats both hash *and compare* by bit pattern: `0.0 != -0.0` and two
//! `NaN`s with identical bits are the same parameter. That keeps equality
//! (the authoritative comparator) consistent with the hash.
//!
//! Implementations of [`StableHash`] that cannot produce a canonical byte
//! encoding degrade to hash 0: every such value lands in the same sketch
//! cells and frequency estimation suffers, but map equality still keeps
//! the counters correct.
//!
//! # Examples
//!
//! ```
//! use paramflow::{ParamValue, StableHash};
//!
//! // Deterministic across runs, processes, and platforms.
//! assert_eq!("user-1".stable_hash(), "user-1".stable_hash());
//!
//! // Integer widths widen consistently.
//! assert_eq!(7u8.stable_hash(), 7u64.stable_hash());
//!
//! // ParamValue defers to the underlying representation.
//! assert_eq!(ParamValue::from(7i64).stable_hash(), 7i64.stable_hash());
//!
//! // Floats key on their bit pattern.
//! assert_ne!(ParamValue::from(0.0), ParamValue::from(-0.0));
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::hash::{Hash, Hasher};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Streaming FNV-1a over byte slices.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fnv64(u64);

impl Fnv64 {
    pub(crate) fn new() -> Self {
        Fnv64(FNV_OFFSET)
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    pub(crate) fn finish(self) -> u64 {
        self.0
    }
}

fn fnv64_u64(v: u64) -> u64 {
    let mut h = Fnv64::new();
    h.write(&v.to_le_bytes());
    h.finish()
}

/// A deterministic 64-bit hash used for sketch and doorkeeper lookups.
///
/// The contract is weaker than [`core::hash::Hash`]: `stable_hash(a) ==
/// stable_hash(b)` does not imply `a == b`. Implementations that cannot
/// produce a canonical byte encoding should return 0; equality in the index
/// map remains the authoritative comparator and only frequency-estimation
/// quality suffers.
pub trait StableHash {
    /// Returns the stable 64-bit hash of this value.
    fn stable_hash(&self) -> u64;
}

macro_rules! impl_stable_hash_int {
    ($($t:ty),*) => {$(
        impl StableHash for $t {
            #[inline]
            fn stable_hash(&self) -> u64 {
                fnv64_u64(*self as u64)
            }
        }
    )*};
}

impl_stable_hash_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl StableHash for f32 {
    #[inline]
    fn stable_hash(&self) -> u64 {
        fnv64_u64(u64::from(self.to_bits()))
    }
}

impl StableHash for f64 {
    #[inline]
    fn stable_hash(&self) -> u64 {
        fnv64_u64(self.to_bits())
    }
}

impl StableHash for bool {
    #[inline]
    fn stable_hash(&self) -> u64 {
        u64::from(*self)
    }
}

impl StableHash for str {
    #[inline]
    fn stable_hash(&self) -> u64 {
        let mut h = Fnv64::new();
        h.write(self.as_bytes());
        h.finish()
    }
}

impl StableHash for String {
    #[inline]
    fn stable_hash(&self) -> u64 {
        self.as_str().stable_hash()
    }
}

impl StableHash for [u8] {
    #[inline]
    fn stable_hash(&self) -> u64 {
        let mut h = Fnv64::new();
        h.write(self);
        h.finish()
    }
}

impl StableHash for Vec<u8> {
    #[inline]
    fn stable_hash(&self) -> u64 {
        self.as_slice().stable_hash()
    }
}

/// A parameter value extracted from a call, the unit the shaper keys on.
///
/// Floats compare and hash by their IEEE-754 bit pattern, so `NaN` values
/// with identical bits are the same parameter and `0.0 != -0.0`. Structured
/// values are represented as [`ParamValue::List`] and hashed through a
/// canonical binary encoding.
///
/// Values convert in from the common primitive types:
///
/// ```
/// use paramflow::ParamValue;
///
/// let by_id = ParamValue::from(42i64);
/// let by_name = ParamValue::from("alice");
/// let composite = ParamValue::List(vec![by_id.clone(), by_name.clone()]);
///
/// // Distinct representations are distinct parameters, even for the
/// // "same" number.
/// assert_ne!(ParamValue::from(1i64), ParamValue::from(1u64));
/// assert_ne!(composite, ParamValue::List(vec![by_name, by_id]));
/// ```
#[derive(Debug, Clone)]
pub enum ParamValue {
    /// Signed integer argument (all widths are widened to 64 bit).
    Int(i64),
    /// Unsigned integer argument.
    Uint(u64),
    /// Floating-point argument, keyed by bit pattern.
    Float(f64),
    /// Boolean argument.
    Bool(bool),
    /// Text argument.
    Str(String),
    /// Raw byte-string argument.
    Bytes(Vec<u8>),
    /// Structured argument with a deterministic element order.
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Appends the canonical binary encoding: a variant tag followed by the
    /// little-endian payload. The encoding is injective per variant, which
    /// makes the derived hashes deterministic across runs and platforms.
    fn encode(&self, h: &mut Fnv64) {
        match self {
            ParamValue::Int(v) => {
                h.write(&[0x01]);
                h.write(&v.to_le_bytes());
            }
            ParamValue::Uint(v) => {
                h.write(&[0x02]);
                h.write(&v.to_le_bytes());
            }
            ParamValue::Float(v) => {
                h.write(&[0x03]);
                h.write(&v.to_bits().to_le_bytes());
            }
            ParamValue::Bool(v) => {
                h.write(&[0x04, u8::from(*v)]);
            }
            ParamValue::Str(s) => {
                h.write(&[0x05]);
                h.write(&(s.len() as u64).to_le_bytes());
                h.write(s.as_bytes());
            }
            ParamValue::Bytes(b) => {
                h.write(&[0x06]);
                h.write(&(b.len() as u64).to_le_bytes());
                h.write(b);
            }
            ParamValue::List(items) => {
                h.write(&[0x07]);
                h.write(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.encode(h);
                }
            }
        }
    }
}

impl StableHash for ParamValue {
    fn stable_hash(&self) -> u64 {
        match self {
            ParamValue::Int(v) => v.stable_hash(),
            ParamValue::Uint(v) => v.stable_hash(),
            ParamValue::Float(v) => v.stable_hash(),
            ParamValue::Bool(v) => v.stable_hash(),
            ParamValue::Str(s) => s.stable_hash(),
            ParamValue::Bytes(b) => b.stable_hash(),
            ParamValue::List(_) => {
                let mut h = Fnv64::new();
                self.encode(&mut h);
                h.finish()
            }
        }
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::Int(a), ParamValue::Int(b)) => a == b,
            (ParamValue::Uint(a), ParamValue::Uint(b)) => a == b,
            (ParamValue::Float(a), ParamValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ParamValue::Bool(a), ParamValue::Bool(b)) => a == b,
            (ParamValue::Str(a), ParamValue::Str(b)) => a == b,
            (ParamValue::Bytes(a), ParamValue::Bytes(b)) => a == b,
            (ParamValue::List(a), ParamValue::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ParamValue {}

impl Hash for ParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            ParamValue::Int(v) => v.hash(state),
            ParamValue::Uint(v) => v.hash(state),
            ParamValue::Float(v) => v.to_bits().hash(state),
            ParamValue::Bool(v) => v.hash(state),
            ParamValue::Str(s) => s.hash(state),
            ParamValue::Bytes(b) => b.hash(state),
            ParamValue::List(items) => items.hash(state),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Uint(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Str(s) => write!(f, "{s}"),
            ParamValue::Bytes(b) => write!(f, "{} bytes", b.len()),
            ParamValue::List(items) => write!(f, "list of {}", items.len()),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        ParamValue::Uint(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(String::from(v))
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(v: Vec<u8>) -> Self {
        ParamValue::Bytes(v)
    }
}
