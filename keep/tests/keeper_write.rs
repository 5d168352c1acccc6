mod common;

use std::collections::HashMap;

use keep::keeper::{AnalyzeOptions, MoveOptions, PutOptions};

#[tokio::test]
async fn put_creates_a_document_and_is_idempotent_on_unchanged_content() {
    let keeper = common::test_keeper("default").await;

    let (item, changed) = keeper
        .put("hello world", PutOptions { id: Some("note-1".to_string()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(item.id, "note-1");
    assert!(changed);

    let (_, changed_again) = keeper
        .put("hello world", PutOptions { id: Some("note-1".to_string()), ..Default::default() })
        .await
        .unwrap();
    assert!(!changed_again);
}

#[tokio::test]
async fn put_without_id_on_non_uri_content_is_rejected() {
    let keeper = common::test_keeper("default").await;
    let result = keeper.put("no id given", PutOptions::default()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn overwriting_content_archives_a_version() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("version one", PutOptions { id: Some("note-2".to_string()), ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("version two", PutOptions { id: Some("note-2".to_string()), ..Default::default() })
        .await
        .unwrap();

    let item = keeper.get("note-2", Default::default()).await.unwrap().unwrap();
    assert_eq!(item.summary, "version two");
}

#[tokio::test]
async fn tag_updates_tags_without_changing_summary() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("content", PutOptions { id: Some("note-3".to_string()), ..Default::default() })
        .await
        .unwrap();

    let tags = HashMap::from([("project".to_string(), "keep".to_string())]);
    let item = keeper.tag("note-3", tags).await.unwrap();
    assert_eq!(item.tags.get("project").unwrap(), "keep");
    assert_eq!(item.summary, "content");
}

#[tokio::test]
async fn tag_on_missing_document_is_not_found() {
    let keeper = common::test_keeper("default").await;
    let result = keeper.tag("missing-doc", HashMap::new()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn delete_removes_a_document() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("to delete", PutOptions { id: Some("note-4".to_string()), ..Default::default() })
        .await
        .unwrap();

    let deleted = keeper.delete("note-4", false).await.unwrap();
    assert!(deleted);
    assert!(keeper.get("note-4", Default::default()).await.unwrap().is_none());
}

#[tokio::test]
async fn revert_restores_the_previous_version() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("first", PutOptions { id: Some("note-5".to_string()), ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("second", PutOptions { id: Some("note-5".to_string()), ..Default::default() })
        .await
        .unwrap();

    let reverted = keeper.revert("note-5").await.unwrap().unwrap();
    assert_eq!(reverted.summary, "first");
}

#[tokio::test]
async fn revert_with_no_history_deletes_the_document() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("only version", PutOptions { id: Some("note-6".to_string()), ..Default::default() })
        .await
        .unwrap();

    let reverted = keeper.revert("note-6").await.unwrap();
    assert!(reverted.is_none());
    assert!(keeper.get("note-6", Default::default()).await.unwrap().is_none());
}

#[tokio::test]
async fn move_doc_relocates_content_under_a_new_id() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("movable content", PutOptions { id: Some("note-7".to_string()), ..Default::default() })
        .await
        .unwrap();

    let moved = keeper.move_doc("note-7-renamed", MoveOptions { source_id: Some("note-7".to_string()), ..Default::default() }).await.unwrap();
    assert_eq!(moved.id, "note-7-renamed");
}

#[tokio::test]
async fn move_into_existing_target_archives_its_prior_head() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("destination content", PutOptions { id: Some("dest-1".to_string()), ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("movable content 2", PutOptions { id: Some("note-9".to_string()), ..Default::default() })
        .await
        .unwrap();

    let moved = keeper
        .move_doc("dest-1", MoveOptions { source_id: Some("note-9".to_string()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(moved.summary, "movable content 2");

    let ctx = keeper.get_context("dest-1", Default::default()).await.unwrap().unwrap();
    assert_eq!(ctx.prev.len(), 1);
}

#[tokio::test]
async fn move_with_a_tag_filter_only_extracts_matching_versions() {
    let keeper = common::test_keeper("default").await;
    let tagged = HashMap::from([("project".to_string(), "x".to_string())]);
    keeper
        .put("tagged version", PutOptions { id: Some("note-10".to_string()), tags: tagged.clone(), ..Default::default() })
        .await
        .unwrap();
    let retagged = HashMap::from([("project".to_string(), "y".to_string())]);
    keeper
        .put("untagged head", PutOptions { id: Some("note-10".to_string()), tags: retagged, ..Default::default() })
        .await
        .unwrap();

    let moved = keeper
        .move_doc(
            "history",
            MoveOptions { source_id: Some("note-10".to_string()), tags: Some(tagged), only_current: false },
        )
        .await
        .unwrap();
    assert_eq!(moved.summary, "tagged version");

    let remaining = keeper.get("note-10", Default::default()).await.unwrap().unwrap();
    assert_eq!(remaining.summary, "untagged head");
}

#[tokio::test]
async fn analyze_splits_content_into_parts() {
    let keeper = common::test_keeper("default").await;
    let long_content = "# Heading\n\n".to_string() + &"word ".repeat(2000);
    keeper
        .put(&long_content, PutOptions { id: Some("note-8".to_string()), ..Default::default() })
        .await
        .unwrap();

    let parts = keeper.analyze("note-8", AnalyzeOptions::default()).await.unwrap();
    assert!(!parts.is_empty());
}

#[tokio::test]
async fn analyze_on_missing_document_is_not_found() {
    let keeper = common::test_keeper("default").await;
    let result = keeper.analyze("missing-doc", AnalyzeOptions::default()).await;
    assert!(result.is_err());
}
