mod common;

use common::create_test_dir;
use kvmigrate::migration::migrations::{backfill_record_ids, rebuild_record_index, schema_init};
use kvmigrate::utils::compute_hash;
use kvmigrate::{
    create_registry, EngineConfig, InMemoryStore, JsonFileStore, KeyValueStore, MigrationRunner,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

fn builtin_runner(store: Arc<dyn KeyValueStore>, domains: &[&str]) -> MigrationRunner {
    let domains: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    let registry = create_registry(Arc::clone(&store), domains.clone())
        .expect("Built-in migrations should register");
    let config = EngineConfig {
        record_domains: domains,
        ..EngineConfig::default()
    };
    MigrationRunner::new(Arc::new(registry), store, config)
}

#[tokio::test]
async fn test_builtins_bring_store_up_to_date() {
    let store = Arc::new(InMemoryStore::with_entries([
        (
            "records:incidents",
            json!([
                {"title": "disk full"},
                {"id": "inc-1", "title": "network down"},
            ]),
        ),
        ("index:incidents", json!({"removed-long-ago": "deadbeef"})),
    ]));
    let runner = builtin_runner(store.clone(), &["incidents"]);

    let report = runner.run().await.expect("Run should succeed");

    assert!(report.is_success());
    assert_eq!(
        report.completed,
        vec![
            schema_init::NAME,
            backfill_record_ids::NAME,
            rebuild_record_index::NAME,
        ]
    );
    assert_eq!(
        store.get(schema_init::SCHEMA_VERSION_KEY).await.unwrap(),
        Some(json!(1))
    );

    let records = store.get("records:incidents").await.unwrap().unwrap();
    let records = records.as_array().unwrap();
    let ids: BTreeSet<String> = records
        .iter()
        .map(|r| r["id"].as_str().expect("Every record should have an id").to_string())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains("inc-1"));

    let index = store.get("index:incidents").await.unwrap().unwrap();
    let index = index.as_object().unwrap();
    assert_eq!(index.keys().cloned().collect::<BTreeSet<_>>(), ids);
    for record in records {
        let id = record["id"].as_str().unwrap();
        assert_eq!(index[id], Value::String(compute_hash(&record.to_string())));
    }
}

#[tokio::test]
async fn test_builtins_tolerate_non_object_records() {
    let store = Arc::new(InMemoryStore::with_entries([(
        "records:notes",
        json!(["free-form note", {"body": "structured"}]),
    )]));
    let runner = builtin_runner(store.clone(), &["notes"]);

    let report = runner.run().await.unwrap();

    assert!(report.is_success(), "failure: {:?}", report.failure);
    let records = store.get("records:notes").await.unwrap().unwrap();
    assert_eq!(records[0], json!("free-form note"));
    let id = records[1]["id"].as_str().unwrap().to_string();
    let index = store.get("index:notes").await.unwrap().unwrap();
    assert_eq!(index.as_object().unwrap().len(), 1);
    assert!(index.get(&id).is_some());
}

#[tokio::test]
async fn test_builtins_rerun_changes_nothing() {
    let store = Arc::new(InMemoryStore::with_entries([(
        "records:shares",
        json!([{"path": "/a"}]),
    )]));
    let runner = builtin_runner(store.clone(), &["shares"]);

    runner.run().await.unwrap();
    let records_after_first = store.get("records:shares").await.unwrap();

    let report = runner.run().await.unwrap();
    assert!(report.completed.is_empty());
    assert_eq!(report.skipped.len(), 3);
    assert_eq!(store.get("records:shares").await.unwrap(), records_after_first);
}

#[tokio::test]
async fn test_builtins_without_domains_only_init_schema() {
    let store = Arc::new(InMemoryStore::new());
    let runner = builtin_runner(store.clone(), &[]);

    let report = runner.run().await.unwrap();

    assert_eq!(report.completed.len(), 3);
    let mut keys = store.keys().await;
    keys.retain(|k| k != "migrations");
    assert_eq!(keys, vec![schema_init::SCHEMA_VERSION_KEY.to_string()]);
}

#[tokio::test]
async fn test_builtins_on_file_store() {
    let temp_dir = create_test_dir();
    let path = temp_dir.path().join("store.json");
    tokio::fs::write(
        &path,
        serde_json::to_string(&json!({
            "migrations": {"store.schema.init.v1": true},
            "records:notes": [{"body": "hello"}],
        }))
        .unwrap(),
    )
    .await
    .unwrap();

    let store: Arc<dyn KeyValueStore> =
        Arc::new(JsonFileStore::open(&path).await.expect("Should open store"));
    let runner = builtin_runner(store, &["notes"]);
    let report = runner.run().await.expect("Run should succeed");

    assert_eq!(report.skipped, vec![schema_init::NAME]);
    assert_eq!(
        report.completed,
        vec![backfill_record_ids::NAME, rebuild_record_index::NAME]
    );

    let reopened = JsonFileStore::open(&path).await.unwrap();
    let ledger = reopened.get("migrations").await.unwrap().unwrap();
    assert_eq!(
        ledger,
        json!([
            backfill_record_ids::NAME,
            rebuild_record_index::NAME,
            schema_init::NAME,
        ])
    );
    // Skipped migrations do not run
    assert_eq!(
        reopened.get(schema_init::SCHEMA_VERSION_KEY).await.unwrap(),
        None
    );
    let notes = reopened.get("records:notes").await.unwrap().unwrap();
    assert!(notes[0]["id"].is_string());
}
