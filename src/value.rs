use std::fmt;
use std::hash::Hasher;

use siphasher::sip::SipHasher13;

use crate::keys::{ObjKey, ObjLink};

/// Physical column type tag.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ColumnType {
    Int,
    Bool,
    Float,
    Double,
    String,
    Binary,
    Mixed,
    Timestamp,
    Decimal,
    ObjectId,
    Link,
    TypedLink,
    LinkList,
    BackLink,
}

/// Point in time as seconds plus nanoseconds since the epoch.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanoseconds: u32) -> Self {
        Timestamp {
            seconds,
            nanoseconds,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

/// 12-byte object identifier, displayed as lowercase hex.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct ObjectId(pub [u8; 12]);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Decimal value as an unnormalized mantissa/exponent pair.
///
/// Comparison is structural: `10E0` and `1E1` are distinct values.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Decimal {
    pub mantissa: i64,
    pub exponent: i8,
}

impl Decimal {
    pub fn new(mantissa: i64, exponent: i8) -> Self {
        Decimal { mantissa, exponent }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}E{}", self.mantissa, self.exponent)
    }
}

/// Tagged union over the physical scalar types plus null and links.
#[derive(Clone, PartialEq, Debug, Default)]
pub enum Mixed {
    #[default]
    Null,
    Int(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Timestamp(Timestamp),
    Decimal(Decimal),
    ObjectId(ObjectId),
    Link(ObjKey),
    TypedLink(ObjLink),
}

impl Mixed {
    pub fn is_null(&self) -> bool {
        matches!(self, Mixed::Null) || matches!(self, Mixed::Link(k) if k.is_null())
    }

    /// The column type the value would occupy; `None` for null.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Mixed::Null => None,
            Mixed::Int(_) => Some(ColumnType::Int),
            Mixed::Bool(_) => Some(ColumnType::Bool),
            Mixed::Float(_) => Some(ColumnType::Float),
            Mixed::Double(_) => Some(ColumnType::Double),
            Mixed::String(_) => Some(ColumnType::String),
            Mixed::Binary(_) => Some(ColumnType::Binary),
            Mixed::Timestamp(_) => Some(ColumnType::Timestamp),
            Mixed::Decimal(_) => Some(ColumnType::Decimal),
            Mixed::ObjectId(_) => Some(ColumnType::ObjectId),
            Mixed::Link(_) => Some(ColumnType::Link),
            Mixed::TypedLink(_) => Some(ColumnType::TypedLink),
        }
    }

    /// Deterministic 64-bit hash, defined for every variant.
    ///
    /// Dictionary key placement derives inner row keys from this hash,
    /// so it must stay stable across processes and versions.
    pub fn hash(&self) -> u64 {
        let mut hasher = SipHasher13::new_with_keys(0, 0);
        match self {
            Mixed::Null => hasher.write_u8(0),
            Mixed::Int(v) => {
                hasher.write_u8(1);
                hasher.write_i64(*v);
            }
            Mixed::Bool(v) => {
                hasher.write_u8(2);
                hasher.write_u8(u8::from(*v));
            }
            Mixed::Float(v) => {
                hasher.write_u8(3);
                hasher.write_u32(v.to_bits());
            }
            Mixed::Double(v) => {
                hasher.write_u8(4);
                hasher.write_u64(v.to_bits());
            }
            Mixed::String(v) => {
                hasher.write_u8(5);
                hasher.write(v.as_bytes());
            }
            Mixed::Binary(v) => {
                hasher.write_u8(6);
                hasher.write(v);
            }
            Mixed::Timestamp(v) => {
                hasher.write_u8(7);
                hasher.write_i64(v.seconds);
                hasher.write_u32(v.nanoseconds);
            }
            Mixed::Decimal(v) => {
                hasher.write_u8(8);
                hasher.write_i64(v.mantissa);
                hasher.write_i8(v.exponent);
            }
            Mixed::ObjectId(v) => {
                hasher.write_u8(9);
                hasher.write(&v.0);
            }
            Mixed::Link(v) => {
                hasher.write_u8(10);
                hasher.write_i64(v.raw());
            }
            Mixed::TypedLink(v) => {
                hasher.write_u8(11);
                hasher.write_u32(v.table.0);
                hasher.write_i64(v.key.raw());
            }
        }
        hasher.finish()
    }
}

impl From<i64> for Mixed {
    fn from(v: i64) -> Self {
        Mixed::Int(v)
    }
}

impl From<i32> for Mixed {
    fn from(v: i32) -> Self {
        Mixed::Int(v as i64)
    }
}

impl From<bool> for Mixed {
    fn from(v: bool) -> Self {
        Mixed::Bool(v)
    }
}

impl From<f32> for Mixed {
    fn from(v: f32) -> Self {
        Mixed::Float(v)
    }
}

impl From<f64> for Mixed {
    fn from(v: f64) -> Self {
        Mixed::Double(v)
    }
}

impl From<&str> for Mixed {
    fn from(v: &str) -> Self {
        Mixed::String(v.to_owned())
    }
}

impl From<String> for Mixed {
    fn from(v: String) -> Self {
        Mixed::String(v)
    }
}

impl From<&[u8]> for Mixed {
    fn from(v: &[u8]) -> Self {
        Mixed::Binary(v.to_vec())
    }
}

impl From<Vec<u8>> for Mixed {
    fn from(v: Vec<u8>) -> Self {
        Mixed::Binary(v)
    }
}

impl From<Timestamp> for Mixed {
    fn from(v: Timestamp) -> Self {
        Mixed::Timestamp(v)
    }
}

impl From<Decimal> for Mixed {
    fn from(v: Decimal) -> Self {
        Mixed::Decimal(v)
    }
}

impl From<ObjectId> for Mixed {
    fn from(v: ObjectId) -> Self {
        Mixed::ObjectId(v)
    }
}

impl From<ObjKey> for Mixed {
    fn from(v: ObjKey) -> Self {
        if v.is_null() {
            Mixed::Null
        } else {
            Mixed::Link(v)
        }
    }
}

impl From<ObjLink> for Mixed {
    fn from(v: ObjLink) -> Self {
        if v.is_null() {
            Mixed::Null
        } else {
            Mixed::TypedLink(v)
        }
    }
}

impl<T: Into<Mixed>> From<Option<T>> for Mixed {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Mixed::Null,
        }
    }
}
