mod common;

use std::collections::HashMap;

use keep::keeper::PutOptions;
use keep::models::FindRequest;

#[tokio::test]
async fn deep_augments_results_with_co_tagged_documents() {
    let keeper = common::test_keeper("default").await;
    let tags = HashMap::from([("project".to_string(), "keep".to_string())]);

    keeper
        .put(
            "the anchor note about rust ownership",
            PutOptions { id: Some("anchor".to_string()), tags: tags.clone(), ..Default::default() },
        )
        .await
        .unwrap();
    keeper
        .put(
            "a sibling note sharing the same project tag",
            PutOptions { id: Some("sibling".to_string()), tags, ..Default::default() },
        )
        .await
        .unwrap();

    let plain = keeper
        .find(FindRequest { query: Some("ownership".to_string()), limit: 10, ..Default::default() })
        .await
        .unwrap();
    assert!(plain.iter().any(|i| i.id == "anchor"));
    assert!(!plain.iter().any(|i| i.id == "sibling"));

    let deep = keeper
        .find(FindRequest { query: Some("ownership".to_string()), deep: true, limit: 10, ..Default::default() })
        .await
        .unwrap();
    assert!(deep.iter().any(|i| i.id == "sibling"));
}

#[tokio::test]
async fn deep_is_a_no_op_for_pure_fulltext_queries() {
    let keeper = common::test_keeper("default").await;
    let tags = HashMap::from([("project".to_string(), "keep".to_string())]);
    keeper
        .put("fulltext anchor content", PutOptions { id: Some("ft-anchor".to_string()), tags: tags.clone(), ..Default::default() })
        .await
        .unwrap();
    keeper
        .put("fulltext sibling content", PutOptions { id: Some("ft-sibling".to_string()), tags, ..Default::default() })
        .await
        .unwrap();

    let results = keeper
        .find(FindRequest {
            query: Some("anchor".to_string()),
            fulltext: true,
            deep: true,
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(results.iter().any(|i| i.id == "ft-anchor"));
    assert!(!results.iter().any(|i| i.id == "ft-sibling"));
}
