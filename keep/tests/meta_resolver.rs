mod common;

use std::collections::HashMap;

use keep::keeper::{AnalyzeOptions, PutOptions};

#[tokio::test]
async fn resolve_meta_runs_a_persistent_query_against_the_anchors_tags() {
    let keeper = common::test_keeper("default").await;

    keeper
        .put("related-tasks query", PutOptions {
            id: Some(".meta/related".to_string()),
            summary: Some("status=".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let open_tags = HashMap::from([("status".to_string(), "open".to_string())]);
    keeper
        .put("the anchor task", PutOptions { id: Some("task-a".to_string()), tags: open_tags.clone(), ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("a sibling open task", PutOptions { id: Some("task-b".to_string()), tags: open_tags, ..Default::default() })
        .await
        .unwrap();

    let sections = keeper.resolve_meta("task-a", 10).await.unwrap();
    let related = sections.get("related").expect("related section present");
    assert!(related.iter().any(|item| item.id == "task-b"));
    assert!(!related.iter().any(|item| item.id == "task-a"));
}

#[tokio::test]
async fn resolve_meta_skips_meta_docs_with_no_usable_query() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("nothing parseable here", PutOptions {
            id: Some(".meta/noop".to_string()),
            summary: Some("just some freeform text".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    keeper
        .put("anchor content", PutOptions { id: Some("anchor-1".to_string()), ..Default::default() })
        .await
        .unwrap();

    let sections = keeper.resolve_meta("anchor-1", 10).await.unwrap();
    assert!(sections.is_empty());
}

#[tokio::test]
async fn resolve_meta_on_missing_anchor_returns_empty() {
    let keeper = common::test_keeper("default").await;
    let sections = keeper.resolve_meta("does-not-exist", 10).await.unwrap();
    assert!(sections.is_empty());
}

#[tokio::test]
async fn resolve_inline_meta_honors_a_prerequisite_key() {
    let keeper = common::test_keeper("default").await;
    let tags = HashMap::from([
        ("status".to_string(), "open".to_string()),
        ("urgent".to_string(), "".to_string()),
    ]);
    keeper
        .put("anchor without urgent flag set", PutOptions { id: Some("anchor-2".to_string()), tags, ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("a candidate match", PutOptions {
            id: Some("candidate-1".to_string()),
            tags: HashMap::from([("status".to_string(), "open".to_string())]),
            ..Default::default()
        })
        .await
        .unwrap();

    let matches = keeper
        .resolve_inline_meta(
            "anchor-2",
            &[HashMap::from([("status".to_string(), "open".to_string())])],
            &[],
            &["urgent".to_string()],
            10,
        )
        .await
        .unwrap();

    assert!(matches.is_empty());
}

#[tokio::test]
async fn resolve_meta_routes_an_unmatched_parts_parent_to_a_provisional_section() {
    let keeper = common::test_keeper("default").await;

    keeper
        .put("open-items query", PutOptions {
            id: Some(".meta/open-items".to_string()),
            summary: Some("status=open".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    keeper
        .put("the anchor task", PutOptions { id: Some("task-a".to_string()), ..Default::default() })
        .await
        .unwrap();

    // `doc-c` itself is never tagged status=open, so it can never be a direct
    // match; only its parts are tagged that way once analyzed.
    let long_content = "# Heading\n\n".to_string() + &"word ".repeat(2000);
    keeper
        .put(&long_content, PutOptions { id: Some("doc-c".to_string()), ..Default::default() })
        .await
        .unwrap();
    keeper
        .analyze("doc-c", AnalyzeOptions {
            tags: HashMap::from([("status".to_string(), "open".to_string())]),
            force: false,
        })
        .await
        .unwrap();

    let sections = keeper.resolve_meta("task-a", 10).await.unwrap();
    assert!(sections.get("open-items").is_none());
    let provisional = sections.get("open-items/provisional").expect("provisional section present");
    assert!(provisional.iter().any(|item| item.id == "doc-c@p1"));
}

#[tokio::test]
async fn resolve_inline_meta_runs_an_ad_hoc_query() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("anchor content", PutOptions { id: Some("anchor-3".to_string()), ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("matching candidate", PutOptions {
            id: Some("candidate-2".to_string()),
            tags: HashMap::from([("kind".to_string(), "reference".to_string())]),
            ..Default::default()
        })
        .await
        .unwrap();

    let matches = keeper
        .resolve_inline_meta(
            "anchor-3",
            &[HashMap::from([("kind".to_string(), "reference".to_string())])],
            &[],
            &[],
            10,
        )
        .await
        .unwrap();

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, "candidate-2");
}
