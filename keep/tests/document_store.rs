mod common;

use std::collections::HashMap;

use keep::store::{DocumentStore, ImportDocument, LibsqlDocumentStore, OrderBy, PartInput, VersionInfo};

async fn store() -> LibsqlDocumentStore {
    LibsqlDocumentStore::new(common::test_database().await)
}

#[tokio::test]
async fn upsert_then_get_round_trips() {
    let store = store().await;
    let tags = HashMap::from([("project".to_string(), "keep".to_string())]);

    let (doc, created) = store
        .upsert("default", "note-1", "first summary", &tags, "hash1", "hash1full", None)
        .await
        .unwrap();
    assert!(created);
    assert_eq!(doc.summary, "first summary");

    let fetched = store.get("default", "note-1").await.unwrap().unwrap();
    assert_eq!(fetched.id, "note-1");
    assert_eq!(fetched.tags.get("project").unwrap(), "keep");
}

#[tokio::test]
async fn second_upsert_pushes_a_version_instead_of_creating() {
    let store = store().await;
    let tags = HashMap::new();

    let (_, created_first) = store
        .upsert("default", "note-2", "v1", &tags, "h1", "h1full", None)
        .await
        .unwrap();
    assert!(created_first);

    let (_, created_second) = store
        .upsert("default", "note-2", "v2", &tags, "h2", "h2full", None)
        .await
        .unwrap();
    assert!(!created_second);

    let versions = store.list_versions("default", "note-2").await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].summary, "v1");

    let current = store.get("default", "note-2").await.unwrap().unwrap();
    assert_eq!(current.summary, "v2");
}

#[tokio::test]
async fn delete_removes_document_and_optionally_versions() {
    let store = store().await;
    let tags = HashMap::new();
    store
        .upsert("default", "note-3", "v1", &tags, "h1", "h1full", None)
        .await
        .unwrap();
    store
        .upsert("default", "note-3", "v2", &tags, "h2", "h2full", None)
        .await
        .unwrap();

    let deleted = store.delete("default", "note-3", false).await.unwrap();
    assert!(deleted);
    assert!(store.get("default", "note-3").await.unwrap().is_none());
    assert_eq!(store.version_count("default", "note-3").await.unwrap(), 1);

    store.delete("default", "note-3", true).await.unwrap();
    assert_eq!(store.version_count("default", "note-3").await.unwrap(), 0);
}

#[tokio::test]
async fn list_recent_orders_by_requested_column() {
    let store = store().await;
    let tags = HashMap::new();
    for id in ["a", "b", "c"] {
        store
            .upsert("default", id, "summary", &tags, "h", "hfull", None)
            .await
            .unwrap();
    }

    let recent = store.list_recent("default", OrderBy::Updated, 10).await.unwrap();
    assert_eq!(recent.len(), 3);
}

#[tokio::test]
async fn query_by_tag_key_finds_matching_documents() {
    let store = store().await;
    let tagged = HashMap::from([("status".to_string(), "open".to_string())]);
    let untagged = HashMap::new();

    store
        .upsert("default", "with-tag", "s", &tagged, "h1", "h1full", None)
        .await
        .unwrap();
    store
        .upsert("default", "without-tag", "s", &untagged, "h2", "h2full", None)
        .await
        .unwrap();

    let matches = store.query_by_tag_key("default", "status", None, None).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, "with-tag");
}

#[tokio::test]
async fn parts_round_trip_through_upsert_and_list() {
    let store = store().await;
    let tags = HashMap::new();
    store
        .upsert("default", "doc-with-parts", "head", &tags, "h", "hfull", None)
        .await
        .unwrap();

    let parts = vec![
        PartInput { part_num: 1, summary: "part one".into(), tags: HashMap::new(), content: "content one".into() },
        PartInput { part_num: 2, summary: "part two".into(), tags: HashMap::new(), content: "content two".into() },
    ];
    store.upsert_parts("default", "doc-with-parts", parts).await.unwrap();

    let listed = store.list_parts("default", "doc-with-parts").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(store.part_count("default", "doc-with-parts").await.unwrap(), 2);
}

#[tokio::test]
async fn import_batch_is_idempotent_on_conflict() {
    let store = store().await;
    let doc = ImportDocument {
        id: "imported-1".to_string(),
        summary: "imported summary".to_string(),
        tags: HashMap::new(),
        content_hash: "hash".to_string(),
        content_hash_full: "hashfull".to_string(),
        created_at: "2026-01-01T00:00:00Z".to_string(),
        updated_at: "2026-01-01T00:00:00Z".to_string(),
        accessed_at: None,
        versions: vec![VersionInfo {
            version: 1,
            summary: "older".to_string(),
            tags: HashMap::new(),
            content_hash: "oldhash".to_string(),
            created_at: "2025-12-01T00:00:00Z".to_string(),
        }],
        parts: Vec::new(),
    };

    store.import_batch("default", vec![doc.clone()]).await.unwrap();
    store.import_batch("default", vec![doc]).await.unwrap();

    let fetched = store.get("default", "imported-1").await.unwrap().unwrap();
    assert_eq!(fetched.summary, "imported summary");
    assert_eq!(store.version_count("default", "imported-1").await.unwrap(), 1);
}

#[tokio::test]
async fn query_fts_finds_documents_by_summary_text() {
    let store = store().await;
    let tags = HashMap::new();
    store
        .upsert("default", "searchable", "a note about rust ownership", &tags, "h", "hfull", None)
        .await
        .unwrap();

    let hits = store.query_fts("default", "ownership", 10).await.unwrap();
    assert!(hits.iter().any(|hit| hit.base_id == "searchable"));
}
