pub mod cli;
pub mod config;
pub mod error;
pub mod keeper;
pub mod models;
pub mod processors;
pub mod queue;
pub mod store;

use std::sync::Arc;

use config::Config;
use error::Result;
use keeper::Keeper;
use processors::{EmbeddingProvider, LlmProvider, TaskClient};
use queue::LibsqlPendingQueue;
use store::{Database, LibsqlDocumentStore, LibsqlVectorStore};

/// Wires up one collection's `Database`/`DocumentStore`/`VectorStore`/
/// `PendingQueue`/providers into a `Keeper` and starts its background
/// reconciliation pass.
pub async fn open_keeper(collection: impl Into<String>, config: Arc<Config>) -> Result<Arc<Keeper>> {
    let embeddings = match EmbeddingProvider::new(&config.embeddings) {
        Ok(provider) => Some(Arc::new(provider)),
        Err(error) => {
            tracing::warn!(%error, "embedding provider unavailable; semantic search disabled");
            None
        }
    };
    let embedding_dim = embeddings
        .as_ref()
        .map(|p| p.dimensions())
        .unwrap_or(config.embeddings.dimensions);

    let db = Database::new(&config.store, embedding_dim).await?;

    let documents: Arc<dyn store::DocumentStore> = Arc::new(LibsqlDocumentStore::new(db.clone()));
    let vectors: Arc<dyn store::VectorStore> = Arc::new(LibsqlVectorStore::new(db.clone(), embedding_dim));
    let queue: Arc<dyn queue::PendingQueue> =
        Arc::new(LibsqlPendingQueue::new(db.clone(), config.memory.clone()));

    let llm = Arc::new(LlmProvider::new(config.llm.as_ref()));
    let remote = match &config.remote {
        Some(remote_config) => match TaskClient::new(remote_config) {
            Ok(client) => Some(Arc::new(client)),
            Err(error) => {
                tracing::warn!(%error, "remote task client unavailable");
                None
            }
        },
        None => None,
    };

    let keeper = Arc::new(Keeper::new(
        collection, documents, vectors, queue, embeddings, llm, remote, config,
    ));
    keeper.start_reconciliation().await?;
    Ok(keeper)
}
