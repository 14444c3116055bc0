mod common;

use serde_json::json;
use straw_model::prelude::*;

use common::{harness, single_host};

#[test]
fn zero_limit_reaches_driver_as_no_limit() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let h = harness(single_host(), false);
        let mut users = h.model("users");
        for i in 0..3 {
            users.insert(json!({"n": i})).await?;
        }

        let rows = users.limit(0).get_all().await?;
        assert_eq!(rows.len(), 3);
        assert_eq!(h.events.count("driver.limit="), 0);

        let rows = users.limit(2).get_all().await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(h.events.count("driver.limit=2"), 1);
        Ok(())
    })
}

#[test]
fn get_one_without_query_touches_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let h = harness(single_host(), false);
        let mut users = h.model("users");

        let err = users.cache("user:1", Some(60)).get_one().await.unwrap_err();
        assert!(matches!(err, StrawDbError::PreconditionError(_)));
        assert!(h.events.all().is_empty());
        assert!(users.pending().is_empty());

        let err = users.query("").get_one().await.unwrap_err();
        assert!(matches!(err, StrawDbError::PreconditionError(_)));

        let err = users.run_raw_query().await.unwrap_err();
        assert!(matches!(err, StrawDbError::PreconditionError(_)));
        assert!(h.events.all().is_empty());
        Ok(())
    })
}

#[test]
fn state_never_leaks_into_the_next_call() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let h = harness(single_host(), false);
        let mut users = h.model("users");
        users.insert(json!([{"name": "ann"}, {"name": "bob"}])).await?;

        let rows = users.query(json!({"name": "ann"})).get_all().await?;
        assert_eq!(rows.len(), 1);
        assert!(users.pending().is_empty());

        let rows = users.get_all().await?;
        assert_eq!(rows.len(), 2);

        // A failing driver call clears state as well.
        users.query("not json").limit(1);
        assert!(users.get_all().await.is_err());
        assert!(users.pending().is_empty());
        assert_eq!(users.get_all().await?.len(), 2);
        Ok(())
    })
}

#[test]
fn results_are_normalized() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let h = harness(single_host(), false);
        let mut events = h.model("events");
        let inserted = events
            .insert(json!({"title": "launch", "at": {"$date": "2024-05-01T12:30:00Z"}}))
            .await?;
        let ids = inserted.normalized_ids();
        let id = ids[0].as_str().unwrap().to_string();
        assert_eq!(id.len(), 24);

        let row = events
            .query(json!({"_id": {"$oid": id.clone()}}))
            .get_one()
            .await?
            .unwrap();
        assert_eq!(row["_id"], json!(id));
        let at = row["at"].as_str().unwrap();
        assert_eq!(at.len(), "YYYY-MM-DD HH:MM:SS".len());
        assert_eq!(&at[4..5], "-");
        assert!(events.last_query_text().unwrap().contains("findOne"));
        Ok(())
    })
}

#[test]
fn count_update_delete_round() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let h = harness(single_host(), false);
        let mut items = h.model("items");
        items
            .insert(json!([{"k": 1, "tag": "a"}, {"k": 2}, {"k": 3, "tag": "b"}]))
            .await?;

        assert_eq!(items.count("*").await?, 3);
        assert_eq!(items.count("tag").await?, 2);
        assert_eq!(items.query(json!({"k": {"$gt": 1}})).count("").await?, 2);

        let res = items
            .update(json!({"$set": {"tag": "z"}}), json!({"k": 2}), None)
            .await?;
        assert_eq!((res.matched, res.modified), (1, 1));
        assert_eq!(items.count("tag").await?, 3);

        let removed = items
            .data(json!({"min": 2}))
            .delete(json!({"k": {"$gte": ":min"}}), None)
            .await?;
        assert_eq!(removed, 2);
        assert_eq!(items.count("*").await?, 1);

        assert!(matches!(
            items.update(json!({}), json!({"k": 1}), None).await,
            Err(StrawDbError::PreconditionError(_))
        ));
        Ok(())
    })
}
