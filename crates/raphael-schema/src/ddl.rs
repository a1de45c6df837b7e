//! DDL generation for shadow models.
//!
//! Materialization is additive: every statement is `CREATE TABLE IF NOT
//! EXISTS`, so running a pass twice, or over a database that already holds
//! some of the tables, is harmless.

use raphael_core::{Dialect, FieldDefault, quote_ident};

use crate::catalog::{TargetField, TargetType};
use crate::shadow::ShadowModel;

/// Options that affect column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdlOptions {
    pub dialect: Dialect,
    /// Store timestamps timezone-aware where the dialect distinguishes.
    pub use_tz: bool,
}

impl DdlOptions {
    pub const fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            use_tz: true,
        }
    }

    pub const fn use_tz(mut self, value: bool) -> Self {
        self.use_tz = value;
        self
    }
}

/// Generate the `CREATE TABLE IF NOT EXISTS` statement for one shadow model.
pub fn create_table(model: &ShadowModel, options: DdlOptions) -> String {
    tracing::debug!(
        dialect = ?options.dialect,
        table = model.table(),
        "Generating DDL"
    );

    let columns: Vec<String> = model
        .fields()
        .iter()
        .map(|field| {
            format!(
                "  {} {}",
                quote_ident(&field.name, options.dialect),
                column_definition(&field.spec, options)
            )
        })
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        quote_ident(model.table(), options.dialect),
        columns.join(",\n")
    )
}

/// Statements for a full schema pass, one per model.
pub fn create_tables<'a>(
    models: impl IntoIterator<Item = &'a ShadowModel>,
    options: DdlOptions,
) -> Vec<String> {
    models
        .into_iter()
        .map(|model| create_table(model, options))
        .collect()
}

fn column_definition(field: &TargetField, options: DdlOptions) -> String {
    if field.primary_key {
        return primary_key_definition(field, options.dialect);
    }

    let mut def = sql_type(field.ty, options);
    if !field.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = field.default {
        def.push_str(" DEFAULT ");
        def.push_str(&default_literal(default, options.dialect));
    }
    def
}

fn primary_key_definition(field: &TargetField, dialect: Dialect) -> String {
    // UUID keys are generated on insert, not by the database.
    if !field.generated || field.ty == TargetType::Uuid {
        let ty = sql_type(field.ty, DdlOptions::new(dialect));
        return format!("{ty} NOT NULL PRIMARY KEY");
    }
    match (dialect, field.ty) {
        // SQLite only auto-increments an INTEGER PRIMARY KEY.
        (Dialect::Sqlite, _) => "INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT".to_string(),
        (Dialect::Postgres, TargetType::BigInt) => "BIGSERIAL NOT NULL PRIMARY KEY".to_string(),
        (Dialect::Postgres, TargetType::SmallInt) => {
            "SMALLSERIAL NOT NULL PRIMARY KEY".to_string()
        }
        (Dialect::Postgres, _) => "SERIAL NOT NULL PRIMARY KEY".to_string(),
        (Dialect::Mysql, TargetType::BigInt) => {
            "BIGINT NOT NULL PRIMARY KEY AUTO_INCREMENT".to_string()
        }
        (Dialect::Mysql, _) => "INT NOT NULL PRIMARY KEY AUTO_INCREMENT".to_string(),
    }
}

/// Column type for a target field type.
pub fn sql_type(ty: TargetType, options: DdlOptions) -> String {
    let dialect = options.dialect;
    match ty {
        TargetType::SmallInt => "SMALLINT".to_string(),
        TargetType::Int => match dialect {
            Dialect::Sqlite => "INTEGER".to_string(),
            Dialect::Postgres | Dialect::Mysql => "INT".to_string(),
        },
        TargetType::BigInt => "BIGINT".to_string(),
        TargetType::Char { max_length } => format!("VARCHAR({max_length})"),
        TargetType::Text => match dialect {
            Dialect::Mysql => "LONGTEXT".to_string(),
            Dialect::Postgres | Dialect::Sqlite => "TEXT".to_string(),
        },
        TargetType::Float => match dialect {
            Dialect::Postgres => "DOUBLE PRECISION".to_string(),
            Dialect::Sqlite => "REAL".to_string(),
            Dialect::Mysql => "DOUBLE".to_string(),
        },
        TargetType::Decimal {
            max_digits,
            decimal_places,
        } => match dialect {
            // SQLite has no exact decimal storage; keep the text form.
            Dialect::Sqlite => "VARCHAR(40)".to_string(),
            Dialect::Postgres | Dialect::Mysql => {
                format!("DECIMAL({max_digits},{decimal_places})")
            }
        },
        TargetType::Boolean => match dialect {
            Dialect::Sqlite => "INT".to_string(),
            Dialect::Postgres | Dialect::Mysql => "BOOL".to_string(),
        },
        TargetType::Datetime => match dialect {
            Dialect::Postgres if options.use_tz => "TIMESTAMPTZ".to_string(),
            Dialect::Postgres | Dialect::Sqlite => "TIMESTAMP".to_string(),
            Dialect::Mysql => "DATETIME(6)".to_string(),
        },
        TargetType::Date => "DATE".to_string(),
        TargetType::Time => match dialect {
            Dialect::Mysql => "TIME(6)".to_string(),
            Dialect::Postgres | Dialect::Sqlite => "TIME".to_string(),
        },
        TargetType::Uuid => match dialect {
            Dialect::Postgres => "UUID".to_string(),
            Dialect::Sqlite | Dialect::Mysql => "CHAR(36)".to_string(),
        },
        TargetType::Json => match dialect {
            Dialect::Postgres => "JSONB".to_string(),
            Dialect::Sqlite | Dialect::Mysql => "JSON".to_string(),
        },
        TargetType::Binary => match dialect {
            Dialect::Postgres => "BYTEA".to_string(),
            Dialect::Sqlite => "BLOB".to_string(),
            Dialect::Mysql => "LONGBLOB".to_string(),
        },
    }
}

fn default_literal(default: FieldDefault, dialect: Dialect) -> String {
    match default {
        FieldDefault::Bool(b) => {
            let literal = match (dialect, b) {
                (Dialect::Postgres, true) => "TRUE",
                (Dialect::Postgres, false) => "FALSE",
                (Dialect::Sqlite | Dialect::Mysql, true) => "1",
                (Dialect::Sqlite | Dialect::Mysql, false) => "0",
            };
            literal.to_string()
        }
        FieldDefault::Int(i) => i.to_string(),
        FieldDefault::Float(f) => f.to_string(),
        FieldDefault::Str(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raphael_core::{FieldDescriptor, FieldKind};

    const BOOK_FIELDS: &[FieldDescriptor] = &[
        FieldDescriptor::new("id", FieldKind::BigAuto).primary_key(true),
        FieldDescriptor::new("title", FieldKind::Char).max_length(200),
        FieldDescriptor::new("subtitle", FieldKind::Char)
            .max_length(200)
            .nullable(true),
        FieldDescriptor::new("in_print", FieldKind::Boolean),
        FieldDescriptor::new("published_at", FieldKind::DateTime).nullable(true),
    ];

    fn book() -> ShadowModel {
        ShadowModel::build("books.book", "Book", "books_book", BOOK_FIELDS)
    }

    #[test]
    fn test_create_table_postgres() {
        let sql = create_table(&book(), DdlOptions::new(Dialect::Postgres));
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"books_book\" (\n  \
             \"id\" BIGSERIAL NOT NULL PRIMARY KEY,\n  \
             \"title\" VARCHAR(200) NOT NULL,\n  \
             \"subtitle\" VARCHAR(200),\n  \
             \"in_print\" BOOL NOT NULL DEFAULT FALSE,\n  \
             \"published_at\" TIMESTAMPTZ\n)"
        );
    }

    #[test]
    fn test_create_table_sqlite() {
        let sql = create_table(&book(), DdlOptions::new(Dialect::Sqlite));
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"books_book\""));
        assert!(sql.contains("\"id\" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"in_print\" INT NOT NULL DEFAULT 0"));
        assert!(sql.contains("\"published_at\" TIMESTAMP"));
    }

    #[test]
    fn test_create_table_mysql() {
        let sql = create_table(&book(), DdlOptions::new(Dialect::Mysql).use_tz(false));
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `books_book`"));
        assert!(sql.contains("`id` BIGINT NOT NULL PRIMARY KEY AUTO_INCREMENT"));
        assert!(sql.contains("`published_at` DATETIME(6)"));
    }

    #[test]
    fn test_naive_timestamps() {
        let options = DdlOptions::new(Dialect::Postgres).use_tz(false);
        assert_eq!(sql_type(TargetType::Datetime, options), "TIMESTAMP");
    }

    #[test]
    fn test_uuid_primary_key() {
        const FIELDS: &[FieldDescriptor] =
            &[FieldDescriptor::new("token", FieldKind::Uuid).primary_key(true)];
        let model = ShadowModel::build("auth.token", "Token", "auth_token", FIELDS);
        let sql = create_table(&model, DdlOptions::new(Dialect::Postgres));
        assert!(sql.contains("\"token\" UUID NOT NULL PRIMARY KEY"));
        let sql = create_table(&model, DdlOptions::new(Dialect::Sqlite));
        assert!(sql.contains("\"token\" CHAR(36) NOT NULL PRIMARY KEY"));
        assert!(!sql.contains("AUTOINCREMENT"));
    }

    #[test]
    fn test_string_default_is_escaped() {
        const FIELDS: &[FieldDescriptor] = &[FieldDescriptor::new("motto", FieldKind::Text)
            .default(FieldDefault::Str("it's fine"))];
        let model = ShadowModel::build("app.thing", "Thing", "app_thing", FIELDS);
        let sql = create_table(&model, DdlOptions::new(Dialect::Sqlite));
        assert!(sql.contains("\"motto\" TEXT NOT NULL DEFAULT 'it''s fine'"));
    }

    #[test]
    fn test_create_tables_one_per_model() {
        let a = book();
        let b = ShadowModel::build("blog.tag", "Tag", "blog_tag", &[]);
        let stmts = create_tables([&a, &b], DdlOptions::new(Dialect::Sqlite));
        assert_eq!(stmts.len(), 2);
        assert!(stmts[1].contains("\"blog_tag\""));
    }
}
