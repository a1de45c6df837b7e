//! SQL rendering.
//!
//! Every function returns the statement text together with its bound
//! parameters, numbered with the dialect's placeholder style. Identifiers are
//! always quoted; operand values are never interpolated.

use raphael_core::{Dialect, Value, quote_ident};

use crate::lookup::{Lookup, Predicate};
use crate::state::{Aggregate, Condition, OrderKey, QueryState};

/// MySQL's documented "no limit" value for `OFFSET` without `LIMIT`.
const MYSQL_NO_LIMIT: u64 = u64::MAX;

/// Bound parameters collected while rendering.
#[derive(Debug)]
struct Params {
    dialect: Dialect,
    values: Vec<Value>,
}

impl Params {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    fn bind(&mut self, value: Value) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }
}

/// `SELECT` of `columns` (all columns when empty).
pub fn select(
    table: &str,
    columns: &[String],
    state: &QueryState,
    dialect: Dialect,
) -> (String, Vec<Value>) {
    let mut params = Params::new(dialect);
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list(columns, dialect),
        quote_ident(table, dialect)
    );
    push_where(&mut sql, &state.conditions, &mut params);
    push_order_by(&mut sql, &state.order_by, dialect);
    push_window(&mut sql, state.limit, state.offset, dialect);
    (sql, params.values)
}

/// `SELECT COUNT(*)`; a windowed state counts through a subquery.
pub fn count(table: &str, state: &QueryState, dialect: Dialect) -> (String, Vec<Value>) {
    if state.is_windowed() {
        let (inner, params) = select_one(table, state, dialect);
        return (
            format!("SELECT COUNT(*) FROM ({inner}) AS {}", quote_ident("sub", dialect)),
            params,
        );
    }
    let mut params = Params::new(dialect);
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table, dialect));
    push_where(&mut sql, &state.conditions, &mut params);
    (sql, params.values)
}

/// A query returning at most one row when any row matches.
pub fn exists(table: &str, state: &QueryState, dialect: Dialect) -> (String, Vec<Value>) {
    let mut windowed = state.clone();
    windowed.order_by.clear();
    if windowed.limit.is_none_or(|limit| limit > 1) {
        windowed.limit = Some(1);
    }
    select_one(table, &windowed, dialect)
}

fn select_one(table: &str, state: &QueryState, dialect: Dialect) -> (String, Vec<Value>) {
    let mut params = Params::new(dialect);
    let mut sql = format!("SELECT 1 FROM {}", quote_ident(table, dialect));
    push_where(&mut sql, &state.conditions, &mut params);
    push_order_by(&mut sql, &state.order_by, dialect);
    push_window(&mut sql, state.limit, state.offset, dialect);
    (sql, params.values)
}

/// Multi-row `INSERT`. Every row must have one value per column.
///
/// With no columns a single row of defaults is inserted.
pub fn insert(
    table: &str,
    columns: &[String],
    rows: &[Vec<Value>],
    returning: bool,
    dialect: Dialect,
) -> (String, Vec<Value>) {
    let mut params = Params::new(dialect);
    let mut sql = if columns.is_empty() {
        match dialect {
            Dialect::Mysql => format!("INSERT INTO {} () VALUES ()", quote_ident(table, dialect)),
            Dialect::Postgres | Dialect::Sqlite => {
                format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table, dialect))
            }
        }
    } else {
        let groups: Vec<String> = rows
            .iter()
            .map(|row| {
                let placeholders: Vec<String> =
                    row.iter().map(|v| params.bind(v.clone())).collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(table, dialect),
            column_list(columns, dialect),
            groups.join(", ")
        )
    };
    if returning && dialect.supports_returning() {
        sql.push_str(" RETURNING *");
    }
    (sql, params.values)
}

/// `UPDATE ... SET`. The state's ordering and window are ignored.
pub fn update(
    table: &str,
    assignments: &[(String, Value)],
    state: &QueryState,
    dialect: Dialect,
) -> (String, Vec<Value>) {
    let mut params = Params::new(dialect);
    let sets: Vec<String> = assignments
        .iter()
        .map(|(column, value)| {
            format!(
                "{} = {}",
                quote_ident(column, dialect),
                params.bind(value.clone())
            )
        })
        .collect();
    let mut sql = format!(
        "UPDATE {} SET {}",
        quote_ident(table, dialect),
        sets.join(", ")
    );
    push_where(&mut sql, &state.conditions, &mut params);
    (sql, params.values)
}

/// `DELETE`. The state's ordering and window are ignored.
pub fn delete(table: &str, state: &QueryState, dialect: Dialect) -> (String, Vec<Value>) {
    let mut params = Params::new(dialect);
    let mut sql = format!("DELETE FROM {}", quote_ident(table, dialect));
    push_where(&mut sql, &state.conditions, &mut params);
    (sql, params.values)
}

/// One row holding every aggregate, aliased by [`Aggregate::alias`].
pub fn aggregate(
    table: &str,
    aggregates: &[Aggregate],
    state: &QueryState,
    dialect: Dialect,
) -> (String, Vec<Value>) {
    let exprs: Vec<String> = aggregates
        .iter()
        .map(|agg| {
            format!(
                "{}({}) AS {}",
                agg.function(),
                quote_ident(agg.field(), dialect),
                quote_ident(&agg.alias(), dialect)
            )
        })
        .collect();

    if state.is_windowed() {
        let (inner, params) = select(table, &[], state, dialect);
        return (
            format!(
                "SELECT {} FROM ({inner}) AS {}",
                exprs.join(", "),
                quote_ident("sub", dialect)
            ),
            params,
        );
    }

    let mut params = Params::new(dialect);
    let mut sql = format!(
        "SELECT {} FROM {}",
        exprs.join(", "),
        quote_ident(table, dialect)
    );
    push_where(&mut sql, &state.conditions, &mut params);
    (sql, params.values)
}

fn column_list(columns: &[String], dialect: Dialect) -> String {
    if columns.is_empty() {
        return "*".to_string();
    }
    columns
        .iter()
        .map(|c| quote_ident(c, dialect))
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_where(sql: &mut String, conditions: &[Condition], params: &mut Params) {
    if conditions.is_empty() {
        return;
    }
    let terms: Vec<String> = conditions
        .iter()
        .map(|condition| match condition {
            Condition::Match(p) => predicate_sql(p, params),
            Condition::Not(group) => {
                let inner: Vec<String> = group.iter().map(|p| excluded_sql(p, params)).collect();
                format!("NOT ({})", inner.join(" AND "))
            }
        })
        .collect();
    sql.push_str(" WHERE ");
    sql.push_str(&terms.join(" AND "));
}

/// A predicate inside an excluded group. NULL columns never satisfy a
/// comparison, so the group is guarded to keep them out of the negation.
fn excluded_sql(predicate: &Predicate, params: &mut Params) -> String {
    match &predicate.lookup {
        Lookup::Exact(Value::Null) | Lookup::IsNull(_) => predicate_sql(predicate, params),
        _ => format!(
            "{} AND {} IS NOT NULL",
            predicate_sql(predicate, params),
            quote_ident(&predicate.field, params.dialect)
        ),
    }
}

fn predicate_sql(predicate: &Predicate, params: &mut Params) -> String {
    let dialect = params.dialect;
    let col = quote_ident(&predicate.field, dialect);
    match &predicate.lookup {
        Lookup::Exact(Value::Null) | Lookup::IsNull(true) => format!("{col} IS NULL"),
        Lookup::IsNull(false) => format!("{col} IS NOT NULL"),
        Lookup::Exact(v) => format!("{col} = {}", params.bind(v.clone())),
        Lookup::IExact(s) => format!(
            "LOWER({col}) = LOWER({})",
            params.bind(Value::Text(s.clone()))
        ),
        Lookup::Contains(s) => like(&col, &format!("%{}%", escape_like(s)), false, params),
        Lookup::IContains(s) => like(&col, &format!("%{}%", escape_like(s)), true, params),
        Lookup::StartsWith(s) => like(&col, &format!("{}%", escape_like(s)), false, params),
        Lookup::IStartsWith(s) => like(&col, &format!("{}%", escape_like(s)), true, params),
        Lookup::EndsWith(s) => like(&col, &format!("%{}", escape_like(s)), false, params),
        Lookup::IEndsWith(s) => like(&col, &format!("%{}", escape_like(s)), true, params),
        Lookup::Gt(v) => format!("{col} > {}", params.bind(v.clone())),
        Lookup::Gte(v) => format!("{col} >= {}", params.bind(v.clone())),
        Lookup::Lt(v) => format!("{col} < {}", params.bind(v.clone())),
        Lookup::Lte(v) => format!("{col} <= {}", params.bind(v.clone())),
        Lookup::In(values) if values.is_empty() => "1 = 0".to_string(),
        Lookup::In(values) => {
            let placeholders: Vec<String> = values.iter().map(|v| params.bind(v.clone())).collect();
            format!("{col} IN ({})", placeholders.join(", "))
        }
        Lookup::Range(low, high) => format!(
            "{col} BETWEEN {} AND {}",
            params.bind(low.clone()),
            params.bind(high.clone())
        ),
    }
}

fn like(col: &str, pattern: &str, case_insensitive: bool, params: &mut Params) -> String {
    let escape = match params.dialect {
        Dialect::Mysql => "'\\\\'",
        Dialect::Postgres | Dialect::Sqlite => "'\\'",
    };
    let placeholder = params.bind(Value::Text(pattern.to_string()));
    if case_insensitive {
        format!("LOWER({col}) LIKE LOWER({placeholder}) ESCAPE {escape}")
    } else {
        format!("{col} LIKE {placeholder} ESCAPE {escape}")
    }
}

/// Escape LIKE wildcards so the operand matches literally.
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn push_order_by(sql: &mut String, keys: &[OrderKey], dialect: Dialect) {
    if keys.is_empty() {
        return;
    }
    let terms: Vec<String> = keys
        .iter()
        .map(|key| match key {
            OrderKey::Asc(f) => format!("{} ASC", quote_ident(f, dialect)),
            OrderKey::Desc(f) => format!("{} DESC", quote_ident(f, dialect)),
            OrderKey::Random => dialect.random_function().to_string(),
        })
        .collect();
    sql.push_str(" ORDER BY ");
    sql.push_str(&terms.join(", "));
}

fn push_window(sql: &mut String, limit: Option<usize>, offset: Option<usize>, dialect: Dialect) {
    match (limit, offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
        (None, Some(offset)) => match dialect {
            Dialect::Postgres => sql.push_str(&format!(" OFFSET {offset}")),
            Dialect::Sqlite => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            Dialect::Mysql => sql.push_str(&format!(" LIMIT {MYSQL_NO_LIMIT} OFFSET {offset}")),
        },
        (None, None) => {}
    }
}
