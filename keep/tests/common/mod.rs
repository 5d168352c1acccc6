use std::sync::Arc;

use keep::config::{Config, MemoryLimitsConfig, StoreConfig};
use keep::keeper::Keeper;
use keep::processors::LlmProvider;
use keep::queue::LibsqlPendingQueue;
use keep::store::{Database, LibsqlDocumentStore, LibsqlVectorStore};

pub const TEST_EMBEDDING_DIM: usize = 8;

pub fn store_config() -> StoreConfig {
    StoreConfig {
        url: ":memory:".to_string(),
        auth_token: None,
        local_path: None,
        busy_timeout_ms: 5000,
        journal_mode: "WAL".to_string(),
        synchronous: "NORMAL".to_string(),
    }
}

pub fn memory_limits() -> MemoryLimitsConfig {
    MemoryLimitsConfig {
        max_summary_length: 500,
        max_id_length: 1024,
        max_tag_key_length: 128,
        max_tag_value_length: 4096,
        recency_half_life_days: 30.0,
        max_summary_attempts: 3,
        stale_claim_secs: 600,
        retry_backoff_base_secs: 30,
        retry_backoff_max_secs: 3600,
        reconcile_wait_secs: 10,
        version_path_edges: false,
    }
}

pub async fn test_database() -> Database {
    Database::new(&store_config(), TEST_EMBEDDING_DIM).await.unwrap()
}

/// A `Keeper` with no embedding/LLM/remote provider wired in — exercises
/// the document/tag/version/edge/queue pipeline the way a store with
/// semantic search disabled degrades to its full-text-only path, without
/// needing a downloaded embedding model.
pub async fn test_keeper(collection: &str) -> Arc<Keeper> {
    let db = test_database().await;
    let documents = Arc::new(LibsqlDocumentStore::new(db.clone()));
    let vectors = Arc::new(LibsqlVectorStore::new(db.clone(), TEST_EMBEDDING_DIM));
    let queue = Arc::new(LibsqlPendingQueue::new(db, memory_limits()));
    let llm = Arc::new(LlmProvider::new(None));

    let mut config = Config::default();
    config.store = store_config();
    config.memory = memory_limits();

    Arc::new(Keeper::new(
        collection.to_string(),
        documents,
        vectors,
        queue,
        None,
        llm,
        None,
        Arc::new(config),
    ))
}
