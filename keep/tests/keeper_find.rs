mod common;

use std::collections::HashMap;

use keep::keeper::{GetContextOptions, GetOptions, PutOptions};
use keep::models::FindRequest;

#[tokio::test]
async fn find_with_fulltext_matches_on_summary_text() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("a note about rust ownership and borrowing", PutOptions { id: Some("doc-a".to_string()), ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("a note about cooking pasta", PutOptions { id: Some("doc-b".to_string()), ..Default::default() })
        .await
        .unwrap();

    let results = keeper
        .find(FindRequest {
            query: Some("ownership".to_string()),
            fulltext: true,
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(results.iter().any(|item| item.id == "doc-a"));
    assert!(!results.iter().any(|item| item.id == "doc-b"));
}

#[tokio::test]
async fn find_filters_by_tags() {
    let keeper = common::test_keeper("default").await;
    let tagged = HashMap::from([("project".to_string(), "keep".to_string())]);
    keeper
        .put("tagged content", PutOptions { id: Some("doc-c".to_string()), tags: tagged.clone(), ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("untagged content", PutOptions { id: Some("doc-d".to_string()), ..Default::default() })
        .await
        .unwrap();

    let results = keeper
        .find(FindRequest { tags: tagged, limit: 10, ..Default::default() })
        .await
        .unwrap();

    assert!(results.iter().any(|item| item.id == "doc-c"));
    assert!(!results.iter().any(|item| item.id == "doc-d"));
}

#[tokio::test]
async fn find_excludes_hidden_dot_documents_by_default() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("visible content", PutOptions { id: Some("doc-e".to_string()), ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("tag definition", PutOptions { id: Some(".tag/project".to_string()), ..Default::default() })
        .await
        .unwrap();

    let results = keeper.find(FindRequest::new(10)).await.unwrap();
    assert!(!results.iter().any(|item| item.id == ".tag/project"));

    let with_hidden = keeper
        .find(FindRequest { include_hidden: true, limit: 10, ..Default::default() })
        .await
        .unwrap();
    assert!(with_hidden.iter().any(|item| item.id == ".tag/project"));
}

#[tokio::test]
async fn get_returns_none_for_a_missing_document() {
    let keeper = common::test_keeper("default").await;
    assert!(keeper.get("nope", GetOptions::default()).await.unwrap().is_none());
}

#[tokio::test]
async fn get_with_version_offset_returns_an_archived_version() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("first", PutOptions { id: Some("doc-f".to_string()), ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("second", PutOptions { id: Some("doc-f".to_string()), ..Default::default() })
        .await
        .unwrap();

    let archived = keeper
        .get("doc-f", GetOptions { version: Some(1) })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(archived.summary, "first");
}

#[tokio::test]
async fn list_returns_documents_matching_tags() {
    let keeper = common::test_keeper("default").await;
    let tags = HashMap::from([("kind".to_string(), "memo".to_string())]);
    keeper
        .put("memo content", PutOptions { id: Some("doc-g".to_string()), tags: tags.clone(), ..Default::default() })
        .await
        .unwrap();

    let results = keeper.list(tags, 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "doc-g");
}

#[tokio::test]
async fn get_context_includes_parts_and_versions() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("first", PutOptions { id: Some("doc-h".to_string()), ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("second", PutOptions { id: Some("doc-h".to_string()), ..Default::default() })
        .await
        .unwrap();

    let context = keeper
        .get_context("doc-h", GetContextOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(context.item.summary, "second");
}
