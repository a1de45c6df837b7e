//! Dynamic SQL values exchanged between source models, shadow rows and drivers.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// A single database value.
///
/// Temporal values use fixed integer encodings so they can be compared and
/// hashed without a calendar library:
/// - `Date`: days since 1970-01-01
/// - `Time`: microseconds since midnight
/// - `Timestamp`: microseconds since the Unix epoch (UTC)
#[derive(Debug, Clone)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// 16-bit integer
    SmallInt(i16),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    BigInt(i64),
    /// Double precision float
    Double(f64),
    /// Exact decimal, kept in its textual form
    Decimal(String),
    /// Text
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Days since the Unix epoch
    Date(i32),
    /// Microseconds since midnight
    Time(i64),
    /// Microseconds since the Unix epoch
    Timestamp(i64),
    /// 128-bit UUID
    Uuid([u8; 16]),
    /// Structured JSON document
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in conversion error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BYTES",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
        }
    }

    /// Borrow the value as a string slice (text and decimal only).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of any integral variant.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) | Value::Date(v) => Some(i64::from(*v)),
            Value::BigInt(v) | Value::Time(v) | Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point view of any numeric variant, including decimals.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Decimal(s) => s.trim().parse().ok(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Compare two values the way a backend orders them.
    ///
    /// NULL sorts before everything else. Numeric variants compare by
    /// magnitude across widths; text compares lexicographically. Returns
    /// `None` for incomparable pairs (e.g. text vs. bytes).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Json(a), Value::Json(b)) => (a == b).then_some(Ordering::Equal),
            (a, b) => {
                if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                    if !matches!(a, Value::Double(_) | Value::Decimal(_))
                        && !matches!(b, Value::Double(_) | Value::Decimal(_))
                    {
                        return Some(x.cmp(&y));
                    }
                }
                match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                }
            }
        }
    }

    /// The value with integer widths widened to `BigInt`, so equal keys
    /// hash alike whatever width a backend returned.
    pub fn normalized(self) -> Value {
        match self {
            Value::SmallInt(v) => Value::BigInt(i64::from(v)),
            Value::Int(v) => Value::BigInt(i64::from(v)),
            other => other,
        }
    }

    /// Equality as seen by a query predicate (`field = value`).
    ///
    /// Unlike `PartialEq`, numerics of different widths compare equal when
    /// their magnitudes match.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::SmallInt(a), Value::SmallInt(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::SmallInt(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Int(i) => {
                3u8.hash(state);
                i.hash(state);
            }
            Value::BigInt(i) => {
                4u8.hash(state);
                i.hash(state);
            }
            Value::Double(f) => {
                5u8.hash(state);
                f.to_bits().hash(state);
            }
            Value::Decimal(s) => {
                6u8.hash(state);
                s.hash(state);
            }
            Value::Text(s) => {
                7u8.hash(state);
                s.hash(state);
            }
            Value::Bytes(b) => {
                8u8.hash(state);
                b.hash(state);
            }
            Value::Date(d) => {
                9u8.hash(state);
                d.hash(state);
            }
            Value::Time(t) => {
                10u8.hash(state);
                t.hash(state);
            }
            Value::Timestamp(ts) => {
                11u8.hash(state);
                ts.hash(state);
            }
            Value::Uuid(u) => {
                12u8.hash(state);
                u.hash(state);
            }
            Value::Json(j) => {
                13u8.hash(state);
                j.to_string().hash(state);
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::SmallInt(v) => write!(f, "{v}"),
            Value::Int(v) | Value::Date(v) => write!(f, "{v}"),
            Value::BigInt(v) | Value::Time(v) | Value::Timestamp(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Decimal(s) | Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Uuid(u) => {
                for (i, byte) in u.iter().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        f.write_str("-")?;
                    }
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for_value! {
    bool => Bool,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    u16 => Int,
    u32 => BigInt,
    f32 => Double,
    f64 => Double,
    String => Text,
    Vec<u8> => Bytes,
    [u8; 16] => Uuid,
    serde_json::Value => Json,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Typed extraction from a [`Value`].
///
/// Conversions accept every variant that carries the target type losslessly,
/// so a `Date` column can be read into an `i32` field and a `Decimal` into a
/// `String`.
pub trait FromValue: Sized {
    /// Convert a value, failing with [`Error::Conversion`] on a mismatch.
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch<T>(expected: &str, value: &Value) -> Result<T> {
    Err(Error::Conversion(format!(
        "expected {expected}, found {}",
        value.type_name()
    )))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
                Ok(value.as_i64().is_some_and(|v| v != 0))
            }
            other => mismatch("BOOLEAN", &other),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value.as_i64() {
            Some(v) if !matches!(value, Value::Bool(_)) => Ok(v),
            _ => mismatch("BIGINT", &value),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value.clone())?;
        i32::try_from(wide).or_else(|_| mismatch("INTEGER", &value))
    }
}

impl FromValue for i16 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value.clone())?;
        i16::try_from(wide).or_else(|_| mismatch("SMALLINT", &value))
    }
}

impl FromValue for u16 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value.clone())?;
        u16::try_from(wide).or_else(|_| mismatch("unsigned SMALLINT", &value))
    }
}

impl FromValue for u32 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value.clone())?;
        u32::try_from(wide).or_else(|_| mismatch("unsigned INTEGER", &value))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value.as_f64() {
            Some(v) if !matches!(value, Value::Bool(_)) => Ok(v),
            _ => mismatch("DOUBLE", &value),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s),
            other => mismatch("TEXT", &other),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::Uuid(u) => Ok(u.to_vec()),
            other => mismatch("BYTES", &other),
        }
    }
}

impl FromValue for [u8; 16] {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::Bytes(b) if b.len() == 16 => {
                let mut out = [0u8; 16];
                out.copy_from_slice(&b);
                Ok(out)
            }
            other => mismatch("UUID", &other),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Json(j) => Ok(j),
            Value::Text(s) => serde_json::from_str(&s)
                .map_err(|e| Error::Conversion(format!("invalid JSON text: {e}"))),
            other => mismatch("JSON", &other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
