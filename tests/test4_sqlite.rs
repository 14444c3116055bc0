#![cfg(feature = "sqlite")]

use serde_json::json;
use straw_model::prelude::*;

fn sqlite_ctx(dir: &std::path::Path, debug: bool) -> std::sync::Arc<StrawContext> {
    let config = StrawConfig::new()
        .with_database(
            DEFAULT_DB_TAG,
            DatabaseConfig::builder(DriverKind::Sqlite, dir.to_string_lossy())
                .database("shop")
                .prefix("s_")
                .finish(),
        )
        .with_debug(debug);
    StrawContext::builder(config).build().unwrap()
}

#[test]
fn sqlite_model_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let ctx = sqlite_ctx(dir.path(), false);
        let mut products = ctx.model("products").build()?;
        assert_eq!(products.table(), "s_products");

        products
            .query("CREATE TABLE s_products (id INTEGER PRIMARY KEY, name TEXT, price REAL, stock INTEGER)")
            .run_raw_query()
            .await?;
        assert!(dir.path().join("shop.sqlite3").exists());

        let res = products
            .insert(json!([
                {"name": "apple", "price": 1.25, "stock": 10},
                {"name": "pear", "price": 2.0, "stock": 0},
                {"name": "plum", "price": 0.5, "stock": null}
            ]))
            .await?;
        assert_eq!(res.affected, 3);
        assert_eq!(res.normalized_ids(), vec![json!(1), json!(2), json!(3)]);

        let cheap = products
            .query("price < :max")
            .data(json!({"max": 1.5}))
            .field("name")
            .order("price desc")
            .get_all()
            .await?;
        assert_eq!(cheap, vec![json!({"name": "apple"}), json!({"name": "plum"})]);

        let page = products.order("id").offset(1).limit(1).get_all().await?;
        assert_eq!(page[0]["name"], json!("pear"));

        let one = products.query(json!({"name": "pear"})).get_one().await?.unwrap();
        assert_eq!(one["price"], json!(2.0));
        assert!(products.last_query_text().unwrap().contains("LIMIT 1"));

        assert_eq!(products.count("*").await?, 3);
        assert_eq!(products.count("stock").await?, 2);

        let updated = products
            .update(json!({"stock": 5}), json!({"name": "pear"}), None)
            .await?;
        assert_eq!(updated.matched, 1);

        let deleted = products.delete("stock IS NULL", None).await?;
        assert_eq!(deleted, 1);

        let total = products
            .query("SELECT SUM(stock) AS total FROM s_products")
            .run_raw_query()
            .await?;
        assert_eq!(total, json!([{"total": 15}]));

        assert_eq!(
            products.list_fields(None).await?,
            vec!["id", "name", "price", "stock"]
        );
        Ok(())
    })
}

#[test]
fn sqlite_errors_propagate_and_clear_state() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let ctx = sqlite_ctx(dir.path(), false);
        let mut missing = ctx.model("missing").build()?;
        let err = missing.limit(3).get_all().await.unwrap_err();
        assert!(err.is_backend(), "{err}");
        assert!(missing.pending().is_empty());

        let err = missing.query("id = :id").get_one().await.unwrap_err();
        assert!(err.is_backend());
        Ok(())
    })
}

#[test]
fn list_fields_cache_respects_debug_mode() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let ctx = sqlite_ctx(dir.path(), false);
        let mut t = ctx.model("t").build()?;
        t.query("CREATE TABLE s_t (a INTEGER)").run_raw_query().await?;
        assert_eq!(t.list_fields(None).await?, vec!["a"]);

        t.query("ALTER TABLE s_t ADD COLUMN b TEXT").run_raw_query().await?;
        // Served from the schema cache until it expires.
        assert_eq!(t.list_fields(None).await?, vec!["a"]);

        let debug_ctx = sqlite_ctx(dir.path(), true);
        let mut fresh = debug_ctx.model("t").build()?;
        assert_eq!(fresh.list_fields(None).await?, vec!["a", "b"]);
        fresh.query("ALTER TABLE s_t ADD COLUMN c TEXT").run_raw_query().await?;
        assert_eq!(fresh.list_fields(Some("s_t")).await?, vec!["a", "b", "c"]);
        Ok(())
    })
}

#[test]
fn operator_filters_agree_with_document_store() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let sqlite = sqlite_ctx(dir.path(), true);
        let memory = StrawContext::builder(StrawConfig::new().with_database(
            DEFAULT_DB_TAG,
            DatabaseConfig::builder(DriverKind::Memory, "mem").database("shop").finish(),
        ))
        .build()?;

        let mut people = sqlite.model("people").build()?;
        people
            .query("CREATE TABLE s_people (name TEXT, age INTEGER, team TEXT)")
            .run_raw_query()
            .await?;
        let mut docs = memory.model("people").build()?;

        let rows = json!([
            {"name": "ann", "age": 30, "team": "red"},
            {"name": "bob", "age": 10, "team": "blue"},
            {"name": "cyd", "age": 45, "team": null}
        ]);
        people.insert(rows.clone()).await?;
        docs.insert(rows).await?;

        let filters = [
            json!({"age": {"$gte": 18}}),
            json!({"age": {"$gt": 10, "$lte": 30}}),
            json!({"team": {"$ne": "red"}}),
            json!({"team": {"$in": ["red", "blue"]}}),
            json!({"team": {"$nin": ["red"]}}),
            json!({"team": {"$exists": false}}),
        ];
        for filter in filters {
            let from_sql: Vec<_> = people
                .query(filter.clone())
                .field("name")
                .order("name")
                .get_all()
                .await?
                .into_iter()
                .map(|row| row["name"].clone())
                .collect();
            let from_docs: Vec<_> = docs
                .query(filter.clone())
                .field("name")
                .order("name")
                .get_all()
                .await?
                .into_iter()
                .map(|row| row["name"].clone())
                .collect();
            assert!(!from_sql.is_empty(), "no rows for {filter}");
            assert_eq!(from_sql, from_docs, "filter {filter}");
        }

        let err = people
            .query(json!({"age": {"$regex": "1"}}))
            .get_all()
            .await
            .unwrap_err();
        assert!(matches!(err, StrawDbError::BackendError(_)));
        Ok(())
    })
}
