mod common;

use std::collections::HashMap;

use keep::keeper::{GetContextOptions, PutOptions};

#[tokio::test]
async fn tagging_a_document_with_an_inverse_tagdoc_materializes_an_edge() {
    let keeper = common::test_keeper("default").await;

    keeper
        .put("performed by relationship", PutOptions {
            id: Some(".tag/author".to_string()),
            tags: HashMap::from([("_inverse".to_string(), "written_by".to_string())]),
            ..Default::default()
        })
        .await
        .unwrap();

    keeper
        .put("a note about Melanie", PutOptions {
            id: Some("note-1".to_string()),
            tags: HashMap::from([("author".to_string(), "melanie".to_string())]),
            ..Default::default()
        })
        .await
        .unwrap();

    let target = keeper.get_context("melanie", GetContextOptions::default()).await.unwrap().unwrap();
    let inbound = target.inverses.get("written_by").expect("inverse edge present");
    assert!(inbound.contains(&"note-1".to_string()));
}

#[tokio::test]
async fn retagging_replaces_rather_than_accumulates_edges() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("owns relationship", PutOptions {
            id: Some(".tag/owner".to_string()),
            tags: HashMap::from([("_inverse".to_string(), "owned_by".to_string())]),
            ..Default::default()
        })
        .await
        .unwrap();

    keeper
        .put("item one", PutOptions {
            id: Some("item-1".to_string()),
            tags: HashMap::from([("owner".to_string(), "alice".to_string())]),
            ..Default::default()
        })
        .await
        .unwrap();

    keeper
        .tag("item-1", HashMap::from([("owner".to_string(), "bob".to_string())]))
        .await
        .unwrap();

    let alice = keeper.get_context("alice", GetContextOptions::default()).await.unwrap().unwrap();
    let alice_still_owns_it = alice
        .inverses
        .get("owned_by")
        .map(|v| v.contains(&"item-1".to_string()))
        .unwrap_or(false);
    assert!(!alice_still_owns_it);

    let bob = keeper.get_context("bob", GetContextOptions::default()).await.unwrap().unwrap();
    assert!(bob.inverses.get("owned_by").unwrap().contains(&"item-1".to_string()));
}

#[tokio::test]
async fn non_dot_edge_targets_are_auto_vivified_as_stub_documents() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("mentions relationship", PutOptions {
            id: Some(".tag/mentions".to_string()),
            tags: HashMap::from([("_inverse".to_string(), "mentioned_in".to_string())]),
            ..Default::default()
        })
        .await
        .unwrap();

    keeper
        .put("references a brand new entity", PutOptions {
            id: Some("note-2".to_string()),
            tags: HashMap::from([("mentions".to_string(), "new-entity".to_string())]),
            ..Default::default()
        })
        .await
        .unwrap();

    let stub = keeper.get("new-entity", Default::default()).await.unwrap();
    assert!(stub.is_some());
}
