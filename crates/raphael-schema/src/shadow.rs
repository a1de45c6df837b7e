//! Shadow models.
//!
//! A shadow model mirrors a source model in the async runtime: same table,
//! same mapped fields, and a guaranteed primary key. The [`ShadowRegistry`]
//! builds at most one shadow per qualified name; later calls return the
//! cached `Arc` unchanged even when given a different field list.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use raphael_core::{FieldDescriptor, Model};

use crate::catalog::{TargetField, TargetType, map_field};

/// Name of the primary key added when a source model declares none.
pub const IMPLICIT_PK: &str = "id";

/// Suffix appended to the source type name.
pub const SHADOW_SUFFIX: &str = "Shadow";

/// One named field of a shadow model.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowField {
    pub name: String,
    pub spec: TargetField,
}

/// A synthesized model definition living in the async runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowModel {
    qualified_name: String,
    name: String,
    table: String,
    fields: Vec<ShadowField>,
    pk: usize,
}

impl ShadowModel {
    /// Build a shadow from raw parts.
    ///
    /// Unmapped fields are dropped. If none of the remaining fields is a
    /// primary key, an auto-increment `id` is prepended.
    pub fn build(
        qualified_name: impl Into<String>,
        type_name: &str,
        table: impl Into<String>,
        source_fields: &[FieldDescriptor],
    ) -> Self {
        let mut fields: Vec<ShadowField> = Vec::with_capacity(source_fields.len() + 1);
        for source in source_fields {
            match map_field(source) {
                Some(spec) => fields.push(ShadowField {
                    name: source.name.to_string(),
                    spec,
                }),
                None => {
                    tracing::debug!(
                        field = source.name,
                        kind = ?source.kind,
                        "Field has no shadow counterpart; omitted"
                    );
                }
            }
        }

        let pk = match fields.iter().position(|f| f.spec.primary_key) {
            Some(idx) => idx,
            None => {
                fields.insert(
                    0,
                    ShadowField {
                        name: IMPLICIT_PK.to_string(),
                        spec: TargetField::primary_key(TargetType::Int, true),
                    },
                );
                0
            }
        };

        Self {
            qualified_name: qualified_name.into(),
            name: format!("{type_name}{SHADOW_SUFFIX}"),
            table: table.into(),
            fields,
            pk,
        }
    }

    /// Build the shadow for a source model type.
    pub fn for_model<M: Model>() -> Self {
        Self::build(
            M::qualified_name(),
            M::TYPE_NAME,
            M::table_name(),
            M::fields(),
        )
    }

    /// `{app_label}.{model_name}` of the source model.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Shadow type name, e.g. `BookShadow`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[ShadowField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ShadowField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn primary_key(&self) -> &ShadowField {
        &self.fields[self.pk]
    }

    /// Resolve a field reference, mapping the `pk` alias to the key's name.
    pub fn resolve<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if name == "pk" {
            return Some(self.primary_key().name.as_str());
        }
        self.field(name).map(|f| f.name.as_str())
    }

    /// Column names in field order.
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// Process-wide cache of shadow models keyed by qualified name.
#[derive(Debug, Default)]
pub struct ShadowRegistry {
    models: Mutex<HashMap<String, Arc<ShadowModel>>>,
}

impl ShadowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shadow for `qualified_name`, building it on first request.
    ///
    /// The remaining arguments are ignored once a shadow exists.
    pub fn get_or_create(
        &self,
        qualified_name: &str,
        type_name: &str,
        table: &str,
        source_fields: &[FieldDescriptor],
    ) -> Arc<ShadowModel> {
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = models.get(qualified_name) {
            return Arc::clone(existing);
        }

        let shadow = Arc::new(ShadowModel::build(
            qualified_name,
            type_name,
            table,
            source_fields,
        ));
        tracing::info!(
            model = qualified_name,
            shadow = shadow.name(),
            table = shadow.table(),
            fields = shadow.fields().len(),
            "Shadow model created"
        );
        models.insert(qualified_name.to_string(), Arc::clone(&shadow));
        shadow
    }

    /// Shadow for a source model type.
    pub fn for_model<M: Model>(&self) -> Arc<ShadowModel> {
        self.get_or_create(
            &M::qualified_name(),
            M::TYPE_NAME,
            &M::table_name(),
            M::fields(),
        )
    }

    pub fn get(&self, qualified_name: &str) -> Option<Arc<ShadowModel>> {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(qualified_name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached shadow.
    pub fn clear(&self) {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raphael_core::{FieldDefault, FieldKind};

    const BOOK_FIELDS: &[FieldDescriptor] = &[
        FieldDescriptor::new("id", FieldKind::BigAuto).primary_key(true),
        FieldDescriptor::new("title", FieldKind::Char).max_length(200),
        FieldDescriptor::new("pages", FieldKind::Integer),
        FieldDescriptor::new("in_print", FieldKind::Boolean).default(FieldDefault::Bool(true)),
        FieldDescriptor::new("reading_time", FieldKind::Duration),
    ];

    const TAG_FIELDS: &[FieldDescriptor] =
        &[FieldDescriptor::new("label", FieldKind::Char).max_length(40)];

    #[test]
    fn test_build_keeps_declared_order() {
        let shadow = ShadowModel::build("books.book", "Book", "books_book", BOOK_FIELDS);
        assert_eq!(shadow.name(), "BookShadow");
        assert_eq!(shadow.table(), "books_book");
        assert_eq!(
            shadow.column_names(),
            vec!["id", "title", "pages", "in_print"]
        );
        assert_eq!(shadow.primary_key().name, "id");
        assert_eq!(shadow.primary_key().spec.ty, TargetType::BigInt);
        assert!(!shadow.has_field("reading_time"));
    }

    #[test]
    fn test_implicit_primary_key() {
        let shadow = ShadowModel::build("blog.tag", "Tag", "blog_tag", TAG_FIELDS);
        assert_eq!(shadow.column_names(), vec!["id", "label"]);
        let pk = shadow.primary_key();
        assert_eq!(pk.name, IMPLICIT_PK);
        assert_eq!(pk.spec.ty, TargetType::Int);
        assert!(pk.spec.generated);
    }

    #[test]
    fn test_resolve_pk_alias() {
        let shadow = ShadowModel::build("books.book", "Book", "books_book", BOOK_FIELDS);
        assert_eq!(shadow.resolve("pk"), Some("id"));
        assert_eq!(shadow.resolve("title"), Some("title"));
        assert_eq!(shadow.resolve("missing"), None);
    }

    #[test]
    fn test_registry_returns_same_instance() {
        let registry = ShadowRegistry::new();
        let first = registry.get_or_create("books.book", "Book", "books_book", BOOK_FIELDS);
        let second = registry.get_or_create("books.book", "Book", "books_book", BOOK_FIELDS);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_ignores_fields_on_repeat() {
        let registry = ShadowRegistry::new();
        let first = registry.get_or_create("books.book", "Book", "books_book", BOOK_FIELDS);
        let second = registry.get_or_create("books.book", "Other", "elsewhere", TAG_FIELDS);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.name(), "BookShadow");
        assert_eq!(second.fields().len(), 4);
    }

    #[test]
    fn test_registry_concurrent_creation() {
        let registry = Arc::new(ShadowRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.get_or_create("books.book", "Book", "books_book", BOOK_FIELDS)
                })
            })
            .collect();
        let shadows: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .collect();
        for shadow in &shadows[1..] {
            assert!(Arc::ptr_eq(&shadows[0], shadow));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_clear() {
        let registry = ShadowRegistry::new();
        registry.get_or_create("blog.tag", "Tag", "blog_tag", TAG_FIELDS);
        assert!(registry.get("blog.tag").is_some());
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get("blog.tag").is_none());
    }
}
