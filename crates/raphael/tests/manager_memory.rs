use asupersync::runtime::RuntimeBuilder;

use raphael::prelude::*;
use raphael::Row;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> std::result::Result<T, String> {
    match outcome {
        Outcome::Ok(v) => Ok(v),
        Outcome::Err(e) => Err(format!("unexpected error: {e}")),
        Outcome::Cancelled(r) => Err(format!("cancelled: {r:?}")),
        Outcome::Panicked(p) => Err(format!("panicked: {p:?}")),
    }
}

fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

#[derive(Model, Debug, Default, Clone, PartialEq)]
#[raphael(app_label = "library")]
struct Ticket {
    #[raphael(primary_key)]
    id: [u8; 16],
    #[raphael(max_length = 50)]
    label: String,
}

#[derive(Model, Debug, Default, Clone, PartialEq)]
#[raphael(app_label = "library")]
struct Note {
    #[raphael(primary_key)]
    id: Option<i64>,
    body: String,
    #[raphael(kind = "datetime", auto_now)]
    touched: bool,
}

#[derive(Model, Debug, Default, Clone, PartialEq)]
#[raphael(app_label = "library")]
struct Book {
    #[raphael(primary_key)]
    id: Option<i64>,
    #[raphael(max_length = 200)]
    title: String,
    pages: Option<i32>,
    #[raphael(default = true)]
    in_print: bool,
    #[raphael(kind = "datetime", auto_now_add)]
    created_at: Option<i64>,
}

fn library() -> Raphael<MemoryBackend> {
    Raphael::memory(RaphaelConfig::new(
        DatabaseConfig::new("django.db.backends.sqlite3").name(":memory:"),
    ))
}

async fn seed(cx: &Cx, db: &Raphael<MemoryBackend>) {
    let books = db.manager::<Book>();
    for (title, pages) in [("Dune", 412), ("Emma", 320), ("Ulysses", 730)] {
        unwrap_outcome(
            books
                .create(cx, &[("title", title.into()), ("pages", pages.into())])
                .await,
        )
        .expect("create book");
    }
}

fn titles(books: &[Book]) -> Vec<&str> {
    books.iter().map(|b| b.title.as_str()).collect()
}

#[test]
fn create_then_get_round_trips_fields() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        let books = db.manager::<Book>();

        let created = unwrap_outcome(
            books
                .create(&cx, &[("title", "A".into()), ("pages", 10.into())])
                .await,
        )
        .expect("create");
        let id = created.id.expect("generated key");
        assert!(created.in_print, "declared default applies");
        assert!(created.created_at.is_some(), "auto_now_add is stamped");

        let fetched =
            unwrap_outcome(books.get(&cx, &[Predicate::eq("pk", id)]).await).expect("get by pk");
        assert_eq!(fetched.title, "A");
        assert_eq!(fetched.pages, Some(10));
        assert_eq!(fetched, created);
        assert!(db.is_ready());
    });
}

#[test]
fn get_distinguishes_missing_and_duplicate_rows() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        seed(&cx, &db).await;
        let books = db.manager::<Book>();

        let missing = expect_err(books.get(&cx, &[Predicate::eq("title", "Nope")]).await);
        assert!(matches!(missing, Error::NotFound { ref model } if model == "library.Book"));

        let many = expect_err(books.get(&cx, &[Predicate::gt("pages", 300)]).await);
        assert!(matches!(many, Error::MultipleResults { count: 3, .. }));

        let none =
            unwrap_outcome(books.get_or_none(&cx, &[Predicate::eq("title", "Nope")]).await)
                .expect("get_or_none");
        assert!(none.is_none());
    });
}

#[test]
fn get_or_create_and_update_or_create() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        let books = db.manager::<Book>();
        let lookup = [Predicate::eq("title", "Dune")];

        let (dune, created) = unwrap_outcome(
            books
                .get_or_create(&cx, &[("pages", 412.into())], &lookup)
                .await,
        )
        .expect("get_or_create");
        assert!(created);
        assert_eq!(dune.pages, Some(412));

        let (again, created) = unwrap_outcome(
            books
                .get_or_create(&cx, &[("pages", 1.into())], &lookup)
                .await,
        )
        .expect("get_or_create existing");
        assert!(!created);
        assert_eq!(again.id, dune.id);
        assert_eq!(again.pages, Some(412));

        let (updated, created) = unwrap_outcome(
            books
                .update_or_create(&cx, &[("pages", 500.into())], &lookup)
                .await,
        )
        .expect("update_or_create existing");
        assert!(!created);
        assert_eq!(updated.pages, Some(500));
        let stored = unwrap_outcome(books.get(&cx, &lookup).await).expect("reload");
        assert_eq!(stored.pages, Some(500));

        let (_, created) = unwrap_outcome(
            books
                .update_or_create(&cx, &[("pages", 320.into())], &[Predicate::eq("title", "Emma")])
                .await,
        )
        .expect("update_or_create new");
        assert!(created);
        assert_eq!(unwrap_outcome(books.count(&cx).await).expect("count"), 2);
    });
}

#[test]
fn filters_orderings_and_windows() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        seed(&cx, &db).await;
        let books = db.manager::<Book>();

        let long = unwrap_outcome(books.filter(&cx, &[Predicate::gt("pages", 400)]).await)
            .expect("filter");
        assert_eq!(titles(&long), ["Dune", "Ulysses"]);

        let rest = unwrap_outcome(books.exclude(&cx, &[Predicate::eq("title", "Emma")]).await)
            .expect("exclude");
        assert_eq!(titles(&rest), ["Dune", "Ulysses"]);

        unwrap_outcome(books.create(&cx, &[("title", "Untold".into())]).await)
            .expect("create without pages");
        let short_or_unknown =
            unwrap_outcome(books.exclude(&cx, &[Predicate::gt("pages", 400)]).await)
                .expect("exclude over a NULL column");
        assert_eq!(titles(&short_or_unknown), ["Emma", "Untold"]);
        unwrap_outcome(books.query().filter([Predicate::eq("title", "Untold")]).delete(&cx).await)
            .expect("remove the extra book");

        let by_length = unwrap_outcome(books.order_by(["-pages"]).all(&cx).await).expect("order");
        assert_eq!(titles(&by_length), ["Ulysses", "Dune", "Emma"]);

        let first = unwrap_outcome(books.first(&cx).await).expect("first");
        assert_eq!(first.map(|b| b.title), Some("Dune".to_string()));
        let last = unwrap_outcome(books.last(&cx).await).expect("last");
        assert_eq!(last.map(|b| b.title), Some("Ulysses".to_string()));
        let shortest = unwrap_outcome(books.earliest(&cx, "pages").await).expect("earliest");
        assert_eq!(shortest.map(|b| b.title), Some("Emma".to_string()));
        let longest = unwrap_outcome(books.latest(&cx, "pages").await).expect("latest");
        assert_eq!(longest.map(|b| b.title), Some("Ulysses".to_string()));

        let with_u = books
            .query()
            .filter([Predicate::icontains("title", "U")])
            .count(&cx)
            .await;
        assert_eq!(unwrap_outcome(with_u).expect("icontains count"), 2);

        let second = unwrap_outcome(
            books
                .query()
                .order_by(["title"])
                .limit(1)
                .offset(1)
                .all(&cx)
                .await,
        )
        .expect("window");
        assert_eq!(titles(&second), ["Emma"]);

        let unordered_last = unwrap_outcome(books.query().last(&cx).await).expect("query last");
        assert_eq!(unordered_last.map(|b| b.title), Some("Ulysses".to_string()));

        let exists = unwrap_outcome(books.exists(&cx, &[Predicate::lt("pages", 100)]).await)
            .expect("exists");
        assert!(!exists);
    });
}

#[test]
fn values_and_values_list_project_fields() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        seed(&cx, &db).await;
        let books = db.manager::<Book>();

        let rows: Vec<Row> =
            unwrap_outcome(books.values(&["title"]).order_by(["pages"]).all(&cx).await)
                .expect("values");
        let names: Vec<Option<&Value>> = rows.iter().map(|r| r.get_named("title")).collect();
        assert_eq!(
            names,
            [
                Some(&Value::from("Emma")),
                Some(&Value::from("Dune")),
                Some(&Value::from("Ulysses")),
            ]
        );
        assert!(rows.iter().all(|r| r.len() == 1));

        let tuples = unwrap_outcome(
            books
                .values_list(&["title", "pages"])
                .filter([Predicate::eq("title", "Emma")])
                .all(&cx)
                .await,
        )
        .expect("values_list");
        assert_eq!(tuples, vec![vec![Value::from("Emma"), Value::Int(320)]]);

        let keys = unwrap_outcome(books.values_list(&["pk"]).flat(&cx).await).expect("flat");
        assert_eq!(keys.len(), 3);

        let err = expect_err(books.values_list(&["title", "pages"]).flat(&cx).await);
        assert!(matches!(err, Error::Query(_)));
    });
}

#[test]
fn aggregates_and_in_bulk() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        seed(&cx, &db).await;
        let books = db.manager::<Book>();

        let totals = unwrap_outcome(
            books
                .aggregate(
                    &cx,
                    &[
                        Aggregate::Sum("pages".to_string()),
                        Aggregate::Max("pages".to_string()),
                        Aggregate::Count("id".to_string()),
                    ],
                )
                .await,
        )
        .expect("aggregate");
        assert_eq!(totals.get_named("pages__sum"), Some(&Value::BigInt(1462)));
        assert_eq!(totals.get_named("pages__max"), Some(&Value::Int(730)));
        assert_eq!(totals.get_named("id__count"), Some(&Value::BigInt(3)));

        let all = unwrap_outcome(books.in_bulk(&cx, None, "pk").await).expect("in_bulk all");
        assert_eq!(all.len(), 3);

        let dune = unwrap_outcome(books.get(&cx, &[Predicate::eq("title", "Dune")]).await)
            .expect("dune");
        let dune_id = Value::from(dune.id);
        let picked = unwrap_outcome(
            books
                .in_bulk(&cx, Some(&[dune_id.clone()]), "pk")
                .await,
        )
        .expect("in_bulk subset");
        assert_eq!(picked.len(), 1);
        assert_eq!(picked.get(&dune_id).map(|b| b.title.as_str()), Some("Dune"));

        let by_title = unwrap_outcome(books.in_bulk(&cx, None, "title").await).expect("by title");
        assert!(by_title.contains_key(&Value::from("Emma")));

        let by_pages = unwrap_outcome(books.in_bulk(&cx, None, "pages").await).expect("by pages");
        let key = Value::from(320_i32).normalized();
        assert_eq!(key, Value::BigInt(320));
        assert_eq!(by_pages.get(&key).map(|b| b.title.as_str()), Some("Emma"));

        let no_ids: &[Value] = &[];
        let empty = unwrap_outcome(books.in_bulk(&cx, Some(no_ids), "pk").await).expect("empty ids");
        assert!(empty.is_empty());
    });
}

#[test]
fn bulk_update_and_delete_through_query_sets() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        seed(&cx, &db).await;
        let books = db.manager::<Book>();

        let touched = unwrap_outcome(
            books
                .query()
                .filter([Predicate::gt("pages", 400)])
                .update(&cx, &[("in_print", false.into())])
                .await,
        )
        .expect("update");
        assert_eq!(touched, 2);
        let out_of_print = books
            .query()
            .filter([Predicate::eq("in_print", false)])
            .count(&cx)
            .await;
        assert_eq!(unwrap_outcome(out_of_print).expect("count"), 2);

        let windowed = expect_err(books.query().limit(1).delete(&cx).await);
        assert!(matches!(windowed, Error::Query(_)));

        let removed = unwrap_outcome(
            books
                .query()
                .filter([Predicate::eq("title", "Emma")])
                .delete(&cx)
                .await,
        )
        .expect("delete");
        assert_eq!(removed, 1);

        assert_eq!(unwrap_outcome(books.delete(&cx).await).expect("delete all"), 2);
        assert_eq!(unwrap_outcome(books.count(&cx).await).expect("count"), 0);
    });
}

#[test]
fn unknown_fields_are_rejected_with_choices() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        let books = db.manager::<Book>();

        let err = expect_err(books.filter(&cx, &[Predicate::eq("author", "x")]).await);
        let message = err.to_string();
        assert!(message.contains("Cannot resolve keyword 'author'"), "{message}");
        assert!(message.contains("title"), "{message}");

        let err = expect_err(books.create(&cx, &[("author", "x".into())]).await);
        assert!(matches!(err, Error::Query(_)));
    });
}

#[test]
fn instance_save_refresh_and_delete() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        let mut book = Book {
            title: "Dune".to_string(),
            pages: Some(400),
            in_print: true,
            ..Default::default()
        };

        unwrap_outcome(book.async_save(&cx, &db).await).expect("insert");
        let id = book.id.expect("key assigned on insert");
        let stamped = book.created_at.expect("created_at assigned on insert");

        book.pages = Some(412);
        unwrap_outcome(book.async_save(&cx, &db).await).expect("update");
        assert_eq!(book.id, Some(id));
        assert_eq!(book.created_at, Some(stamped));

        let books = Book::objects(&db);
        assert_eq!(unwrap_outcome(books.count(&cx).await).expect("count"), 1);

        let mut stale = unwrap_outcome(books.get(&cx, &[Predicate::eq("pk", id)]).await)
            .expect("get");
        unwrap_outcome(
            books
                .update(&cx, &[("title", "Dune Messiah".into())])
                .await,
        )
        .expect("bulk update");

        unwrap_outcome(stale.async_refresh(&cx, &db, Some(&["pages"])).await)
            .expect("partial refresh");
        assert_eq!(stale.title, "Dune", "unlisted fields keep their value");
        assert_eq!(stale.pages, Some(412));
        unwrap_outcome(stale.async_refresh(&cx, &db, None).await).expect("full refresh");
        assert_eq!(stale.title, "Dune Messiah");

        let removed = unwrap_outcome(stale.async_delete(&cx, &db).await).expect("delete");
        assert_eq!(removed, 1);
        assert_eq!(stale.id, None);
        assert_eq!(
            unwrap_outcome(stale.async_delete(&cx, &db).await).expect("delete again"),
            0
        );

        let err = expect_err(book.async_refresh(&cx, &db, None).await);
        assert!(err.is_not_found());
    });
}

#[test]
fn save_with_update_fields_writes_only_those_fields() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        let mut book = Book {
            title: "Emma".to_string(),
            pages: Some(300),
            ..Default::default()
        };
        unwrap_outcome(book.async_save(&cx, &db).await).expect("insert");

        book.title = "Persuasion".to_string();
        book.pages = Some(320);
        let options = SaveOptions::new().update_fields(["pages"]);
        unwrap_outcome(book.async_save_with(&cx, &db, &options).await).expect("partial save");

        let stored = unwrap_outcome(
            Book::objects(&db)
                .get(&cx, &[Predicate::eq("pk", book.id)])
                .await,
        )
        .expect("reload");
        assert_eq!(stored.title, "Emma");
        assert_eq!(stored.pages, Some(320));

        let mut ghost = Book {
            id: Some(9_999),
            title: "Ghost".to_string(),
            pages: Some(1),
            ..Default::default()
        };
        let err = expect_err(ghost.async_save_with(&cx, &db, &options).await);
        assert!(matches!(err, Error::Query(_)));

        unwrap_outcome(ghost.async_save(&cx, &db).await).expect("keyed save falls back to insert");
        assert_eq!(ghost.id, Some(9_999));
        assert_eq!(unwrap_outcome(Book::objects(&db).count(&cx).await).expect("count"), 2);
    });
}

#[test]
fn managers_are_shared_per_model() {
    let db = library();
    let first = db.manager::<Book>();
    let second = Book::objects(&db);
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(first.shadow().qualified_name(), "library.Book");
    assert!(!db.is_ready());
}

#[test]
fn uuid_keys_are_assigned_on_insert() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        let tickets = db.manager::<Ticket>();

        let first = unwrap_outcome(tickets.create(&cx, &[("label", "x".into())]).await)
            .expect("create");
        let second = unwrap_outcome(tickets.create(&cx, &[("label", "y".into())]).await)
            .expect("create again");
        assert_ne!(first.id, [0; 16]);
        assert_ne!(first.id, second.id);

        let fetched = unwrap_outcome(tickets.get(&cx, &[Predicate::eq("pk", first.id)]).await)
            .expect("get by uuid");
        assert_eq!(fetched, first);

        let batch: Vec<Ticket> = ["a", "b", "c"]
            .into_iter()
            .map(|label| Ticket {
                label: label.to_string(),
                ..Default::default()
            })
            .collect();
        let stored = unwrap_outcome(tickets.bulk_create(&cx, &batch, None).await)
            .expect("bulk_create");
        let mut ids: Vec<[u8; 16]> = stored.iter().map(|t| t.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&[0; 16]));

        let mut fresh = Ticket {
            label: "saved".to_string(),
            ..Default::default()
        };
        unwrap_outcome(fresh.async_save(&cx, &db).await).expect("save unkeyed");
        assert_ne!(fresh.id, [0; 16]);

        let mut chosen = Ticket {
            id: [7; 16],
            label: "chosen".to_string(),
        };
        unwrap_outcome(chosen.async_save(&cx, &db).await).expect("save with a chosen key");
        assert_eq!(chosen.id, [7; 16]);
        let reloaded = unwrap_outcome(tickets.get(&cx, &[Predicate::eq("pk", [7_u8; 16])]).await)
            .expect("get chosen key");
        assert_eq!(reloaded.label, "chosen");

        assert_eq!(unwrap_outcome(tickets.count(&cx).await).expect("count"), 7);
    });
}

#[test]
fn save_skips_stamps_the_source_field_cannot_hold() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = library();
        let mut note = Note {
            body: "draft".to_string(),
            ..Default::default()
        };
        unwrap_outcome(note.async_save(&cx, &db).await).expect("insert");
        let id = note.id.expect("generated key");
        assert!(!note.touched);

        note.body = "final".to_string();
        unwrap_outcome(note.async_save(&cx, &db).await).expect("update");
        assert!(!note.touched);

        let stored = unwrap_outcome(Note::objects(&db).get(&cx, &[Predicate::eq("pk", id)]).await)
            .expect("reload");
        assert_eq!(stored.body, "final");
        assert_eq!(unwrap_outcome(Note::objects(&db).count(&cx).await).expect("count"), 1);
    });
}
