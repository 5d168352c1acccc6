mod common;

use keep::keeper::PutOptions;

#[tokio::test]
async fn reconcile_without_an_embedding_provider_is_a_no_op() {
    let keeper = common::test_keeper("default").await;
    keeper
        .put("some content", PutOptions { id: Some("doc-1".to_string()), ..Default::default() })
        .await
        .unwrap();

    let report = keeper.reconcile_now(false).await.unwrap();
    assert_eq!(report.missing, 0);
    assert_eq!(report.reconciled, 0);
    assert_eq!(report.failed, 0);

    let fixed = keeper.reconcile_now(true).await.unwrap();
    assert_eq!(fixed.missing, 0);
    assert_eq!(fixed.reconciled, 0);
}

#[tokio::test]
async fn start_reconciliation_completes_without_blocking_forever() {
    let keeper = common::test_keeper("default").await;
    keeper.start_reconciliation().await.unwrap();

    // No embedding provider means nothing to reconcile; a subsequent write
    // must not hang behind `wait_for_reconcile`.
    let result = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        keeper.put("content", PutOptions { id: Some("doc-2".to_string()), ..Default::default() }),
    )
    .await;
    assert!(result.is_ok());
}
