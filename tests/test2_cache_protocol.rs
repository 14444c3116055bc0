mod common;

use serde_json::json;
use straw_model::prelude::*;

use common::{harness, single_host};

#[test]
fn explicit_key_serves_second_read_from_cache() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let h = harness(single_host(), false);
        let mut users = h.model("users");
        users.insert(json!([{"n": 1}, {"n": 2}])).await?;
        h.events.clear();

        let first = users.order("n desc").cache("users:all", Some(60)).get_all().await?;
        let second = users.order("n desc").cache("users:all", Some(60)).get_all().await?;
        assert_eq!(first, second);
        assert_eq!(h.events.count("driver.get_all"), 1);
        assert_eq!(h.events.count("cache.set:users:all"), 1);
        Ok(())
    })
}

#[test]
fn empty_results_are_cached_too() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let h = harness(single_host(), false);
        let mut users = h.model("users");

        for _ in 0..2 {
            let row = users.query(json!({"id": 404})).cache(true, None).get_one().await?;
            assert!(row.is_none());
            let n = users.query(json!({"id": 404})).cache(true, None).count("*").await?;
            assert_eq!(n, 0);
            let rows = users.query(json!({"id": 404})).cache(true, None).get_all().await?;
            assert!(rows.is_empty());
        }
        assert_eq!(h.events.count("driver.get_one"), 1);
        assert_eq!(h.events.count("driver.count"), 1);
        assert_eq!(h.events.count("driver.get_all"), 1);
        Ok(())
    })
}

#[test]
fn derived_keys_depend_on_state_and_operation() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let h = harness(single_host(), false);
        let mut users = h.model("users");
        users.insert(json!([{"n": 1}, {"n": 2}])).await?;

        users.query(json!({"n": 1})).cache(true, Some(30)).get_all().await?;
        users.query(json!({"n": 2})).cache(true, Some(30)).get_all().await?;
        users.query(json!({"n": 1})).cache(true, Some(30)).count("*").await?;
        users.query(json!({"n": 1})).cache(true, Some(30)).get_all().await?;
        assert_eq!(h.events.count("driver.get_all"), 2);
        assert_eq!(h.events.count("driver.count"), 1);

        // A TTL with mode Off reserves a slot but caches nothing.
        users.cache(CacheMode::Off, Some(30)).get_all().await?;
        users.cache(CacheMode::Off, Some(30)).get_all().await?;
        assert_eq!(h.events.count("driver.get_all"), 4);
        Ok(())
    })
}

#[test]
fn multi_host_get_one_scenario() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let db = DatabaseConfig::builder(DriverKind::Memory, "a,b")
            .port("10")
            .database("app")
            .write_master(true)
            .finish();
        let h = harness(db, false);
        let mut items = h.model("items");
        items.insert(json!({"id": 1, "name": "first"})).await?;
        h.events.clear();

        let first = items.query(json!({"id": 1})).cache(true, Some(60)).get_one().await?;
        let second = items.query(json!({"id": 1})).cache(true, Some(60)).get_one().await?;
        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(h.events.count("driver."), 1);
        assert_eq!(h.events.count("driver.get_one@b"), 1);
        Ok(())
    })
}

#[test]
fn invalidation_happens_before_the_write() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let h = harness(single_host(), false);
        let mut items = h.model("items");
        items.insert(json!({"id": 5})).await?;
        items.query(json!({"id": 5})).cache("cache:item:5", Some(60)).get_one().await?;
        h.events.clear();

        let removed = items.delete(json!({"id": 5}), Some("cache:item:5")).await?;
        assert_eq!(removed, 1);
        let invalidated = h.events.position("cache.delete:cache:item:5").unwrap();
        let deleted = h.events.position("driver.delete").unwrap();
        assert!(invalidated < deleted);

        let row = items.query(json!({"id": 5})).cache("cache:item:5", Some(60)).get_one().await?;
        assert!(row.is_none());

        items.insert(json!({"id": 6})).await?;
        h.events.clear();
        items
            .update(json!({"v": 1}), json!({"id": 6}), Some("cache:item:6"))
            .await?;
        assert_eq!(
            h.events.all(),
            vec!["cache.delete:cache:item:6".to_string(), "driver.update@solo".to_string()]
        );

        // An empty key invalidates nothing.
        h.events.clear();
        items.delete(json!({"id": 6}), Some("")).await?;
        assert_eq!(h.events.count("cache."), 0);
        Ok(())
    })
}

#[test]
fn unbounded_ttl_caches_without_expiry() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let h = harness(single_host(), false);
        let mut users = h.model("users");
        users.insert(json!([{"n": 1}])).await?;

        let first = users.cache("users:forever", Some(u64::MAX)).get_all().await?;
        let second = users.cache("users:forever", Some(u64::MAX)).get_all().await?;
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert_eq!(h.events.count("driver.get_all"), 1);
        Ok(())
    })
}
