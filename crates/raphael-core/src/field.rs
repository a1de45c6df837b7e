//! Source-model field descriptors.
//!
//! A [`FieldDescriptor`] is the read-only description of one field of a
//! definition-first model: its semantic [`FieldKind`] plus the constraints the
//! shadow-model synthesis needs (nullability, length, precision, defaults,
//! auto-now flags). Descriptors are `const`-constructible so derived models can
//! keep them in a `static`.

use crate::value::Value;

/// Semantic kind of a source field.
///
/// This is a closed set: anything a model declares must be expressed as one of
/// these tags. Kinds without a shadow counterpart (`Duration`, `ForeignKey`,
/// `File`, `IpAddress`) are still representable so models can describe them;
/// the mapping catalog drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Auto-incrementing 32-bit key.
    Auto,
    /// Auto-incrementing 64-bit key.
    BigAuto,
    /// Auto-incrementing 16-bit key.
    SmallAuto,
    /// Bounded string.
    Char,
    /// Bounded string holding an e-mail address.
    Email,
    /// Bounded string holding a URL.
    Url,
    /// Bounded string holding a slug.
    Slug,
    /// Unbounded text.
    Text,
    Integer,
    BigInteger,
    SmallInteger,
    PositiveInteger,
    PositiveSmallInteger,
    Float,
    /// Exact decimal with declared precision and scale.
    Decimal,
    Boolean,
    Date,
    DateTime,
    Time,
    Duration,
    Uuid,
    /// Structured JSON document.
    Json,
    /// Raw bytes.
    Binary,
    /// Reference to another model.
    ForeignKey,
    /// Stored file path.
    File,
    /// IPv4/IPv6 address.
    IpAddress,
}

impl FieldKind {
    /// Parse the attribute spelling used by `#[raphael(kind = "...")]`.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "auto" => FieldKind::Auto,
            "big_auto" | "bigauto" => FieldKind::BigAuto,
            "small_auto" | "smallauto" => FieldKind::SmallAuto,
            "char" | "string" => FieldKind::Char,
            "email" => FieldKind::Email,
            "url" => FieldKind::Url,
            "slug" => FieldKind::Slug,
            "text" => FieldKind::Text,
            "integer" | "int" => FieldKind::Integer,
            "big_integer" | "bigint" => FieldKind::BigInteger,
            "small_integer" | "smallint" => FieldKind::SmallInteger,
            "positive_integer" => FieldKind::PositiveInteger,
            "positive_small_integer" => FieldKind::PositiveSmallInteger,
            "float" => FieldKind::Float,
            "decimal" => FieldKind::Decimal,
            "boolean" | "bool" => FieldKind::Boolean,
            "date" => FieldKind::Date,
            "datetime" | "date_time" => FieldKind::DateTime,
            "time" => FieldKind::Time,
            "duration" => FieldKind::Duration,
            "uuid" => FieldKind::Uuid,
            "json" => FieldKind::Json,
            "binary" | "bytes" => FieldKind::Binary,
            "foreign_key" | "fk" => FieldKind::ForeignKey,
            "file" => FieldKind::File,
            "ip_address" | "ip" => FieldKind::IpAddress,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether the kind is one of the auto-incrementing key kinds.
    pub const fn is_auto(self) -> bool {
        matches!(
            self,
            FieldKind::Auto | FieldKind::BigAuto | FieldKind::SmallAuto
        )
    }
}

/// A default value declared on a source field.
///
/// Kept to `const`-friendly shapes; `to_value` produces the runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldDefault {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(&'static str),
}

impl FieldDefault {
    pub fn to_value(self) -> Value {
        match self {
            FieldDefault::Bool(b) => Value::Bool(b),
            FieldDefault::Int(i) => Value::BigInt(i),
            FieldDefault::Float(f) => Value::Double(f),
            FieldDefault::Str(s) => Value::Text(s.to_string()),
        }
    }
}

/// Metadata about one source-model field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field (and column) name
    pub name: &'static str,
    /// Semantic kind
    pub kind: FieldKind,
    /// Whether this field is the primary key
    pub primary_key: bool,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Declared maximum length for bounded strings
    pub max_length: Option<u32>,
    /// Total digits for decimals
    pub max_digits: Option<u8>,
    /// Digits after the decimal point for decimals
    pub decimal_places: Option<u8>,
    /// Declared default
    pub default: Option<FieldDefault>,
    /// Set to the current time on every save
    pub auto_now: bool,
    /// Set to the current time on creation
    pub auto_now_add: bool,
}

impl FieldDescriptor {
    /// Create a descriptor with minimal required data.
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            primary_key: false,
            nullable: false,
            max_length: None,
            max_digits: None,
            decimal_places: None,
            default: None,
            auto_now: false,
            auto_now_add: false,
        }
    }

    /// Set primary key flag.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Set nullable flag.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set maximum length.
    pub const fn max_length(mut self, value: u32) -> Self {
        self.max_length = Some(value);
        self
    }

    /// Set maximum length from optional.
    pub const fn max_length_opt(mut self, value: Option<u32>) -> Self {
        self.max_length = value;
        self
    }

    /// Set both precision and scale for decimals.
    ///
    /// ```
    /// use raphael_core::field::{FieldDescriptor, FieldKind};
    ///
    /// // DECIMAL(6, 2) for prices
    /// let price = FieldDescriptor::new("price", FieldKind::Decimal).decimal(6, 2);
    /// assert_eq!(price.max_digits, Some(6));
    /// ```
    pub const fn decimal(mut self, max_digits: u8, decimal_places: u8) -> Self {
        self.max_digits = Some(max_digits);
        self.decimal_places = Some(decimal_places);
        self
    }

    /// Set decimal precision and scale from optionals.
    pub const fn decimal_opt(mut self, max_digits: Option<u8>, decimal_places: Option<u8>) -> Self {
        self.max_digits = max_digits;
        self.decimal_places = decimal_places;
        self
    }

    /// Set default value.
    pub const fn default(mut self, value: FieldDefault) -> Self {
        self.default = Some(value);
        self
    }

    /// Set default value from optional.
    pub const fn default_opt(mut self, value: Option<FieldDefault>) -> Self {
        self.default = value;
        self
    }

    /// Set auto-now flag.
    pub const fn auto_now(mut self, value: bool) -> Self {
        self.auto_now = value;
        self
    }

    /// Set auto-now-add flag.
    pub const fn auto_now_add(mut self, value: bool) -> Self {
        self.auto_now_add = value;
        self
    }

    /// Whether a default was declared.
    pub const fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Normalize a Rust-side value into the canonical variant for this kind.
    ///
    /// Models store temporal values as plain integers and decimals as strings;
    /// this re-tags them so backends see `Date`, `Timestamp`, `Decimal`, ...
    /// Values that are already canonical, or that cannot be re-tagged, pass
    /// through unchanged.
    pub fn coerce(&self, value: Value) -> Value {
        match (self.kind, value) {
            (_, Value::Null) => Value::Null,
            (FieldKind::Date, Value::Int(d)) => Value::Date(d),
            (FieldKind::Date, Value::BigInt(d)) => {
                i32::try_from(d).map_or(Value::BigInt(d), Value::Date)
            }
            (FieldKind::DateTime, Value::BigInt(ts) | Value::Time(ts)) => Value::Timestamp(ts),
            (FieldKind::DateTime, Value::Int(ts)) => Value::Timestamp(i64::from(ts)),
            (FieldKind::Time, Value::BigInt(t) | Value::Timestamp(t)) => Value::Time(t),
            (FieldKind::Time, Value::Int(t)) => Value::Time(i64::from(t)),
            (FieldKind::Decimal, Value::Text(s)) => Value::Decimal(s),
            (FieldKind::Decimal, Value::Double(f)) => Value::Decimal(format_decimal(f, self.decimal_places)),
            (FieldKind::Decimal, v @ (Value::Int(_) | Value::BigInt(_) | Value::SmallInt(_))) => {
                Value::Decimal(v.to_string())
            }
            (FieldKind::Uuid, Value::Bytes(b)) if b.len() == 16 => {
                let mut out = [0u8; 16];
                out.copy_from_slice(&b);
                Value::Uuid(out)
            }
            (FieldKind::Json, Value::Text(s)) => {
                serde_json::from_str(&s).map_or(Value::Text(s), Value::Json)
            }
            (_, other) => other,
        }
    }
}

fn format_decimal(value: f64, places: Option<u8>) -> String {
    match places {
        Some(p) => format!("{:.*}", usize::from(p), value),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        const TITLE: FieldDescriptor = FieldDescriptor::new("title", FieldKind::Char)
            .max_length(255)
            .nullable(true)
            .default(FieldDefault::Str("Untitled"));
        assert_eq!(TITLE.max_length, Some(255));
        assert!(TITLE.nullable);
        assert!(TITLE.has_default());
        assert!(!TITLE.primary_key);
    }

    #[test]
    fn test_kind_from_name() {
        assert_eq!(FieldKind::from_name("DateTime"), Some(FieldKind::DateTime));
        assert_eq!(FieldKind::from_name("big-auto"), Some(FieldKind::BigAuto));
        assert_eq!(FieldKind::from_name("geometry"), None);
        assert!(FieldKind::SmallAuto.is_auto());
        assert!(!FieldKind::Integer.is_auto());
    }

    #[test]
    fn test_coerce_temporal_and_decimal() {
        let date = FieldDescriptor::new("published", FieldKind::Date);
        assert_eq!(date.coerce(Value::Int(19_000)), Value::Date(19_000));

        let created = FieldDescriptor::new("created_at", FieldKind::DateTime);
        assert_eq!(created.coerce(Value::BigInt(42)), Value::Timestamp(42));

        let price = FieldDescriptor::new("price", FieldKind::Decimal).decimal(6, 2);
        assert_eq!(
            price.coerce(Value::Double(12.5)),
            Value::Decimal("12.50".to_string())
        );
        assert_eq!(
            price.coerce(Value::Text("3.10".to_string())),
            Value::Decimal("3.10".to_string())
        );
    }

    #[test]
    fn test_coerce_passthrough() {
        let title = FieldDescriptor::new("title", FieldKind::Char);
        assert_eq!(title.coerce(Value::Int(1)), Value::Int(1));
        assert_eq!(title.coerce(Value::Null), Value::Null);
    }
}
