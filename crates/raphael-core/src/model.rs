//! The source-model contract.
//!
//! A source model is a plain struct declared against the synchronous,
//! definition-first layer. Everything the async bridge needs from it is
//! captured here: identity (`APP_LABEL`, `MODEL_NAME`), the ordered field
//! descriptor list, and by-name access to field values.
//!
//! Usually implemented with `#[derive(Model)]` from `raphael-macros`.

use crate::error::Result;
use crate::field::FieldDescriptor;
use crate::value::Value;

/// Trait implemented by every source model.
pub trait Model: Default + Send + Sync + Sized + 'static {
    /// Namespace the model belongs to (e.g. `"books"`).
    const APP_LABEL: &'static str;

    /// Lowercase model name (e.g. `"book"`).
    const MODEL_NAME: &'static str;

    /// Rust type name, used to name the shadow model.
    const TYPE_NAME: &'static str;

    /// Explicit table name override.
    const DB_TABLE: Option<&'static str> = None;

    /// Field descriptors in declaration order.
    fn fields() -> &'static [FieldDescriptor];

    /// Read a field by name. `None` when the model has no such field.
    fn field_value(&self, name: &str) -> Option<Value>;

    /// Write a field by name.
    ///
    /// Fails when the field does not exist or the value does not convert to
    /// the field's Rust type.
    fn set_field_value(&mut self, name: &str, value: Value) -> Result<()>;

    /// Namespace-qualified identifier, `{app_label}.{model_name}`.
    fn qualified_name() -> String {
        format!("{}.{}", Self::APP_LABEL, Self::MODEL_NAME)
    }

    /// Table name: the explicit override, else `{app_label}_{model_name}` in lowercase.
    fn table_name() -> String {
        match Self::DB_TABLE {
            Some(table) => table.to_string(),
            None => format!("{}_{}", Self::APP_LABEL, Self::MODEL_NAME).to_lowercase(),
        }
    }

    /// Look up a field descriptor by name.
    fn field(name: &str) -> Option<&'static FieldDescriptor> {
        Self::fields().iter().find(|f| f.name == name)
    }

    /// The primary key descriptor, if one is declared.
    fn primary_key_field() -> Option<&'static FieldDescriptor> {
        Self::fields().iter().find(|f| f.primary_key)
    }

    /// Current primary key value; `None` when unset (NULL) or undeclared.
    fn pk(&self) -> Option<Value> {
        let field = Self::primary_key_field()?;
        self.field_value(field.name).filter(|v| !v.is_null())
    }
}
