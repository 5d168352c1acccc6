mod common;

use std::collections::HashMap;

use keep::models::TaskStatus;
use keep::queue::{LibsqlPendingQueue, PendingQueue};

async fn queue() -> LibsqlPendingQueue {
    LibsqlPendingQueue::new(common::test_database().await, common::memory_limits())
}

#[tokio::test]
async fn enqueue_then_dequeue_claims_the_task() {
    let queue = queue().await;
    queue
        .enqueue("doc-1", "default", "summarize", "content", HashMap::new())
        .await
        .unwrap();

    assert_eq!(queue.count(Some(TaskStatus::Pending)).await.unwrap(), 1);

    let claimed = queue.dequeue("worker-a", 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, "doc-1");
    assert_eq!(queue.count(Some(TaskStatus::Processing)).await.unwrap(), 1);
}

#[tokio::test]
async fn complete_removes_the_task_from_the_queue() {
    let queue = queue().await;
    queue
        .enqueue("doc-2", "default", "summarize", "content", HashMap::new())
        .await
        .unwrap();
    queue.dequeue("worker-a", 10).await.unwrap();

    queue.complete("doc-2", "default", "summarize").await.unwrap();
    assert_eq!(queue.count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn fail_reschedules_to_pending_before_the_attempt_ceiling() {
    let queue = queue().await;
    queue
        .enqueue("doc-3", "default", "summarize", "content", HashMap::new())
        .await
        .unwrap();
    queue.dequeue("worker-a", 10).await.unwrap();

    queue.fail("doc-3", "default", "summarize", "transient boom").await.unwrap();

    assert_eq!(queue.get_status("doc-3", "default", "summarize").await.unwrap(), Some(TaskStatus::Pending));
}

#[tokio::test]
async fn fail_dead_letters_once_attempts_reach_the_ceiling() {
    let mut limits = common::memory_limits();
    limits.max_summary_attempts = 1;
    let queue = LibsqlPendingQueue::new(common::test_database().await, limits);

    queue
        .enqueue("doc-3b", "default", "summarize", "content", HashMap::new())
        .await
        .unwrap();
    queue.dequeue("worker-a", 10).await.unwrap();
    queue.fail("doc-3b", "default", "summarize", "boom").await.unwrap();

    let failed = queue.list_failed(Some("default")).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "doc-3b");
    assert_eq!(queue.get_status("doc-3b", "default", "summarize").await.unwrap(), Some(TaskStatus::Failed));
}

#[tokio::test]
async fn abandon_dead_letters_immediately() {
    let queue = queue().await;
    queue
        .enqueue("doc-4", "default", "ocr", "content", HashMap::new())
        .await
        .unwrap();
    queue.dequeue("worker-a", 10).await.unwrap();

    queue.abandon("doc-4", "default", "ocr", "unrecoverable").await.unwrap();
    assert_eq!(queue.get_status("doc-4", "default", "ocr").await.unwrap(), Some(TaskStatus::Failed));
}

#[tokio::test]
async fn retry_failed_resets_dead_lettered_tasks_to_pending() {
    let queue = queue().await;
    queue
        .enqueue("doc-5", "default", "embed", "content", HashMap::new())
        .await
        .unwrap();
    queue.dequeue("worker-a", 10).await.unwrap();
    queue.abandon("doc-5", "default", "embed", "boom").await.unwrap();

    let reset = queue.retry_failed(Some("default")).await.unwrap();
    assert_eq!(reset, 1);
    assert_eq!(queue.get_status("doc-5", "default", "embed").await.unwrap(), Some(TaskStatus::Pending));
}

#[tokio::test]
async fn stats_by_type_counts_by_status() {
    let queue = queue().await;
    queue
        .enqueue("doc-6", "default", "summarize", "content", HashMap::new())
        .await
        .unwrap();
    queue
        .enqueue("doc-7", "default", "summarize", "content", HashMap::new())
        .await
        .unwrap();
    queue.dequeue("worker-a", 1).await.unwrap();

    let stats = queue.stats_by_type("summarize").await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.processing, 1);
}

#[tokio::test]
async fn clear_removes_every_task_in_a_collection() {
    let queue = queue().await;
    queue
        .enqueue("doc-8", "scratch", "summarize", "content", HashMap::new())
        .await
        .unwrap();

    queue.clear("scratch").await.unwrap();
    assert_eq!(queue.count(None).await.unwrap(), 0);
}
