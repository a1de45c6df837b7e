use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use asupersync::runtime::RuntimeBuilder;

use raphael::prelude::*;
use raphael::{BackendOptions, Connection, ConnectionTarget, Connector, Dialect, Row};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> std::result::Result<T, String> {
    match outcome {
        Outcome::Ok(v) => Ok(v),
        Outcome::Err(e) => Err(format!("unexpected error: {e}")),
        Outcome::Cancelled(r) => Err(format!("cancelled: {r:?}")),
        Outcome::Panicked(p) => Err(format!("panicked: {p:?}")),
    }
}

type Log = Arc<Mutex<Vec<(String, Vec<Value>)>>>;

/// Driver stand-in that records every statement it is handed.
#[derive(Debug, Clone)]
struct ScriptedConnection {
    dialect: Dialect,
    log: Log,
}

impl ScriptedConnection {
    fn record(&self, sql: &str, params: &[Value]) {
        self.log
            .lock()
            .expect("log lock")
            .push((sql.to_string(), params.to_vec()));
    }
}

impl Connection for ScriptedConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.record(sql, params);
        async { Outcome::Ok(Vec::new()) }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        self.record(sql, params);
        let row = sql.starts_with("INSERT").then(|| {
            Row::from_pairs(vec![
                ("id".to_string(), Value::BigInt(7)),
                ("title".to_string(), Value::from("Dune")),
            ])
        });
        async move { Outcome::Ok(row) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        self.record(sql, params);
        async { Outcome::Ok(0) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        self.record(sql, params);
        async { Outcome::Ok(7) }
    }

    fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }

    fn close(self, _cx: &Cx) -> impl Future<Output = raphael::Result<()>> + Send {
        async { Ok(()) }
    }
}

#[derive(Debug, Default)]
struct ScriptedConnector {
    connects: AtomicUsize,
    log: Log,
}

impl ScriptedConnector {
    fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.log.lock().expect("log lock").clone()
    }
}

impl Connector for ScriptedConnector {
    type Conn = ScriptedConnection;

    fn connect(
        &self,
        _cx: &Cx,
        target: &ConnectionTarget,
        _options: &BackendOptions,
    ) -> impl Future<Output = Outcome<Self::Conn, Error>> + Send {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let conn = ScriptedConnection {
            dialect: target.dialect(),
            log: Arc::clone(&self.log),
        };
        async move { Outcome::Ok(conn) }
    }
}

#[derive(Model, Debug, Default, Clone)]
#[raphael(app_label = "library")]
struct Book {
    #[raphael(primary_key)]
    id: Option<i64>,
    #[raphael(max_length = 200)]
    title: String,
    pages: Option<i32>,
}

#[derive(Model, Debug, Default, Clone)]
#[raphael(app_label = "shop")]
struct Product {
    #[raphael(primary_key)]
    id: Option<i64>,
    #[raphael(max_length = 64)]
    sku: String,
    #[raphael(max_length = 200)]
    name: String,
    price: f64,
    stock: i32,
    weight: f64,
    active: bool,
    notes: String,
}

#[derive(Model, Debug, Default, Clone)]
#[raphael(app_label = "auth")]
struct Ticket {
    #[raphael(primary_key)]
    id: [u8; 16],
    #[raphael(max_length = 50)]
    label: String,
}

fn postgres() -> Raphael<SqlBackend<ScriptedConnector>> {
    let config = RaphaelConfig::new(
        DatabaseConfig::new("django.db.backends.postgresql")
            .name("app")
            .host("db.internal"),
    )
    .pool_size(2);
    Raphael::new(config, SqlBackend::new(ScriptedConnector::default()))
}

#[test]
fn manager_calls_render_dialect_sql_and_create_schema_once() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = postgres();
        let books = db.manager::<Book>();

        let found = unwrap_outcome(books.filter(&cx, &[Predicate::eq("title", "Dune")]).await)
            .expect("filter");
        assert!(found.is_empty());
        unwrap_outcome(books.filter(&cx, &[Predicate::eq("title", "Emma")]).await)
            .expect("second filter");

        let connector = db.backend().connector();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);

        let statements = connector.statements();
        let ddl = statements
            .iter()
            .filter(|(sql, _)| sql.starts_with("CREATE TABLE"))
            .count();
        assert_eq!(ddl, 1);
        assert!(statements[0].0.starts_with("CREATE TABLE IF NOT EXISTS \"library_book\""));
        assert_eq!(
            statements[1],
            (
                "SELECT * FROM \"library_book\" WHERE \"title\" = $1".to_string(),
                vec![Value::from("Dune")],
            )
        );
    });
}

#[test]
fn create_returns_the_stored_row() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = postgres();
        let book = unwrap_outcome(
            db.manager::<Book>()
                .create(&cx, &[("title", "Dune".into())])
                .await,
        )
        .expect("create");
        assert_eq!(book.id, Some(7));
        assert_eq!(book.title, "Dune");

        let statements = db.backend().connector().statements();
        let (sql, params) = statements.last().expect("insert statement");
        assert_eq!(
            sql,
            "INSERT INTO \"library_book\" (\"title\") VALUES ($1) RETURNING *"
        );
        assert_eq!(params, &vec![Value::from("Dune")]);
    });
}

#[test]
fn windowed_deletes_never_reach_the_driver() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = postgres();
        let outcome = db.manager::<Book>().query().offset(3).delete(&cx).await;
        assert!(matches!(outcome, Outcome::Err(Error::Query(_))));
        assert!(db.backend().connector().statements().is_empty());
        assert!(!db.is_ready());
    });
}

#[test]
fn large_bulk_create_stays_under_the_parameter_limit() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = postgres();
        let products: Vec<Product> = (0..10_000)
            .map(|i| Product {
                id: None,
                sku: format!("SKU-{i:05}"),
                name: format!("Product {i}"),
                price: 2.5,
                stock: i,
                weight: 0.25,
                active: true,
                notes: String::new(),
            })
            .collect();

        let created = unwrap_outcome(db.manager::<Product>().bulk_create(&cx, &products, None).await)
            .expect("bulk_create");
        assert_eq!(created.len(), 10_000);
        assert_eq!(created[9_999].sku, "SKU-09999");

        let inserts: Vec<(String, Vec<Value>)> = db
            .backend()
            .connector()
            .statements()
            .into_iter()
            .filter(|(sql, _)| sql.starts_with("INSERT"))
            .collect();
        assert_eq!(inserts.len(), 2);
        assert!(
            inserts
                .iter()
                .all(|(_, params)| params.len() <= Dialect::Postgres.max_params())
        );

        let bound: usize = inserts.iter().map(|(_, params)| params.len()).sum();
        assert_eq!(bound, 10_000 * 7);
        assert_eq!(inserts[0].1[0], Value::from("SKU-00000"));
        let last = &inserts[1].1;
        assert_eq!(last[last.len() - 7], Value::from("SKU-09999"));
    });
}

#[test]
fn exclude_keeps_rows_with_null_columns() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = postgres();
        unwrap_outcome(
            db.manager::<Book>()
                .exclude(&cx, &[Predicate::gt("pages", 300)])
                .await,
        )
        .expect("exclude");

        let statements = db.backend().connector().statements();
        let (sql, params) = statements.last().expect("select statement");
        assert_eq!(
            sql,
            "SELECT * FROM \"library_book\" WHERE NOT (\"pages\" > $1 AND \"pages\" IS NOT NULL)"
        );
        assert_eq!(params, &vec![Value::Int(300)]);
    });
}

#[test]
fn uuid_keys_are_bound_by_the_manager() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = postgres();
        let tickets = db.manager::<Ticket>();
        unwrap_outcome(tickets.create(&cx, &[("label", "x".into())]).await).expect("create");
        unwrap_outcome(tickets.create(&cx, &[("label", "y".into())]).await).expect("create again");

        let statements = db.backend().connector().statements();
        assert!(statements[0].0.contains("\"id\" UUID NOT NULL PRIMARY KEY"));
        let keys: Vec<&Value> = statements
            .iter()
            .filter(|(sql, _)| sql.starts_with("INSERT INTO \"auth_ticket\""))
            .map(|(sql, params)| {
                assert_eq!(
                    sql,
                    "INSERT INTO \"auth_ticket\" (\"label\", \"id\") VALUES ($1, $2) RETURNING *"
                );
                &params[1]
            })
            .collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|key| matches!(key, Value::Uuid(bytes) if *bytes != [0; 16])));
        assert_ne!(keys[0], keys[1]);
    });
}
