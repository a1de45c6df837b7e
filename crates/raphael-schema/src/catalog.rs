//! Field mapping catalog.
//!
//! Pure translation from a source [`FieldDescriptor`] to the [`TargetField`]
//! the async runtime understands. The mapping is a `match` over the closed
//! [`FieldKind`] set, so adding a kind forces a decision here.

use raphael_core::field::{FieldDefault, FieldDescriptor, FieldKind};

/// Default length for e-mail fields without a declared max length.
pub const EMAIL_MAX_LENGTH: u32 = 254;
/// Default length for URL fields without a declared max length.
pub const URL_MAX_LENGTH: u32 = 200;
/// Default length for slug fields without a declared max length.
pub const SLUG_MAX_LENGTH: u32 = 50;
/// Fallback for bounded strings declared without a length.
pub const CHAR_MAX_LENGTH: u32 = 255;
/// Fallback decimal precision (total digits, digits after the point).
pub const DECIMAL_FALLBACK: (u8, u8) = (10, 0);

/// Storage type of a shadow-model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    SmallInt,
    Int,
    BigInt,
    /// Bounded string of at most `max_length` characters.
    Char { max_length: u32 },
    Text,
    Float,
    Decimal { max_digits: u8, decimal_places: u8 },
    Boolean,
    Datetime,
    Date,
    Time,
    Uuid,
    Json,
    Binary,
}

/// Full specification of a shadow-model field.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetField {
    pub ty: TargetType,
    pub primary_key: bool,
    /// Key value is assigned by the backend (auto-increment).
    pub generated: bool,
    pub nullable: bool,
    pub default: Option<FieldDefault>,
    pub auto_now: bool,
    pub auto_now_add: bool,
}

impl TargetField {
    /// A plain, non-key field of the given type.
    pub const fn new(ty: TargetType) -> Self {
        Self {
            ty,
            primary_key: false,
            generated: false,
            nullable: false,
            default: None,
            auto_now: false,
            auto_now_add: false,
        }
    }

    /// A primary key of the given type.
    pub const fn primary_key(ty: TargetType, generated: bool) -> Self {
        let mut field = Self::new(ty);
        field.primary_key = true;
        field.generated = generated;
        field
    }

    /// Whether the backend fills this field when the caller leaves it unset.
    pub const fn has_backend_value(&self) -> bool {
        self.generated || self.default.is_some() || self.auto_now || self.auto_now_add
    }
}

/// Map one source field to its shadow specification.
///
/// Returns `None` for kinds with no shadow counterpart; such fields are left
/// out of the shadow model rather than treated as errors.
pub fn map_field(source: &FieldDescriptor) -> Option<TargetField> {
    if source.primary_key {
        return Some(map_primary_key(source.kind));
    }

    let ty = match source.kind {
        FieldKind::Char => TargetType::Char {
            max_length: source.max_length.unwrap_or(CHAR_MAX_LENGTH),
        },
        FieldKind::Email => TargetType::Char {
            max_length: source.max_length.unwrap_or(EMAIL_MAX_LENGTH),
        },
        FieldKind::Url => TargetType::Char {
            max_length: source.max_length.unwrap_or(URL_MAX_LENGTH),
        },
        FieldKind::Slug => TargetType::Char {
            max_length: source.max_length.unwrap_or(SLUG_MAX_LENGTH),
        },
        FieldKind::Text => TargetType::Text,
        FieldKind::Integer | FieldKind::PositiveInteger | FieldKind::Auto => TargetType::Int,
        FieldKind::BigInteger | FieldKind::BigAuto => TargetType::BigInt,
        FieldKind::SmallInteger | FieldKind::PositiveSmallInteger | FieldKind::SmallAuto => {
            TargetType::SmallInt
        }
        FieldKind::Float => TargetType::Float,
        FieldKind::Decimal => TargetType::Decimal {
            max_digits: source.max_digits.unwrap_or(DECIMAL_FALLBACK.0),
            decimal_places: source.decimal_places.unwrap_or(DECIMAL_FALLBACK.1),
        },
        FieldKind::Boolean => TargetType::Boolean,
        FieldKind::DateTime => TargetType::Datetime,
        FieldKind::Date => TargetType::Date,
        FieldKind::Time => TargetType::Time,
        FieldKind::Uuid => TargetType::Uuid,
        FieldKind::Json => TargetType::Json,
        FieldKind::Binary => TargetType::Binary,
        FieldKind::Duration
        | FieldKind::ForeignKey
        | FieldKind::File
        | FieldKind::IpAddress => return None,
    };

    let mut field = TargetField::new(ty);
    field.nullable = source.nullable;
    field.default = source.default;

    match source.kind {
        FieldKind::Boolean if field.default.is_none() => {
            field.default = Some(FieldDefault::Bool(false));
        }
        FieldKind::DateTime | FieldKind::Date => {
            field.auto_now = source.auto_now;
            field.auto_now_add = source.auto_now_add;
        }
        _ => {}
    }

    Some(field)
}

fn map_primary_key(kind: FieldKind) -> TargetField {
    match kind {
        FieldKind::BigAuto | FieldKind::BigInteger => {
            TargetField::primary_key(TargetType::BigInt, true)
        }
        FieldKind::Auto | FieldKind::Integer => TargetField::primary_key(TargetType::Int, true),
        FieldKind::Uuid => TargetField::primary_key(TargetType::Uuid, true),
        _ => TargetField::primary_key(TargetType::Int, true),
    }
}
