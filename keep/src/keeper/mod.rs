mod deep;
mod meta;
mod reconcile;
mod system_docs;
mod write;

pub mod read;

pub use read::{GetContextOptions, GetOptions};
pub use write::{AnalyzeOptions, MoveOptions, PutOptions};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::Config;
use crate::error::Result;
use crate::processors::{EmbeddingProvider, LlmProvider, TaskClient};
use crate::queue::PendingQueue;
use crate::store::{DocumentStore, VectorStore};

/// Facade over the store/queue/provider layer implementing the read/write
/// pipelines. One `Keeper` serves one collection; callers that need several
/// collections hold several `Keeper`s sharing the same `Database`/`Arc`
/// handles.
pub struct Keeper {
    pub(crate) collection: String,
    pub(crate) documents: Arc<dyn DocumentStore>,
    pub(crate) vectors: Arc<dyn VectorStore>,
    pub(crate) queue: Arc<dyn PendingQueue>,
    pub(crate) embeddings: Option<Arc<EmbeddingProvider>>,
    pub(crate) llm: Arc<LlmProvider>,
    pub(crate) remote: Option<Arc<TaskClient>>,
    pub(crate) config: Arc<Config>,
    /// Reconciliation barrier: writes wait on this (bounded) before running.
    /// Set when a background reconcile pass (section 4.8) is in flight.
    pub(crate) reconciling: Arc<AtomicBool>,
    pub(crate) reconcile_done: Arc<Notify>,
    /// Non-blocking "file lock" stand-in for the processor lock (section
    /// 4.4 step 9): true while a background task-processing loop is running
    /// for this collection so a second `put` doesn't spawn a second one.
    pub(crate) processor_running: Arc<AtomicBool>,
    /// Set once the bundled system documents (section 4.8) have been
    /// migrated into this collection. `maybe_migrate_system_docs` checks
    /// this before every write and retries the migration until it succeeds.
    pub(crate) sysdoc_migrated: Arc<AtomicBool>,
}

impl Keeper {
    pub fn new(
        collection: impl Into<String>,
        documents: Arc<dyn DocumentStore>,
        vectors: Arc<dyn VectorStore>,
        queue: Arc<dyn PendingQueue>,
        embeddings: Option<Arc<EmbeddingProvider>>,
        llm: Arc<LlmProvider>,
        remote: Option<Arc<TaskClient>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            collection: collection.into(),
            documents,
            vectors,
            queue,
            embeddings,
            llm,
            remote,
            config,
            reconciling: Arc::new(AtomicBool::new(false)),
            reconcile_done: Arc::new(Notify::new()),
            processor_running: Arc::new(AtomicBool::new(false)),
            sysdoc_migrated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Spawns the startup reconciliation pass (section 4.8) in the
    /// background; writes block on it via `wait_for_reconcile` with a
    /// bounded timeout rather than failing outright if it runs long.
    pub async fn start_reconciliation(self: &Arc<Self>) -> Result<()> {
        reconcile::spawn_reconcile(Arc::clone(self)).await
    }

    pub(crate) async fn wait_for_reconcile(&self) {
        if !self.reconciling.load(Ordering::SeqCst) {
            return;
        }
        let timeout = Duration::from_secs(self.config.memory.reconcile_wait_secs);
        let _ = tokio::time::timeout(timeout, self.reconcile_done.notified()).await;
    }

    /// Runs the bundled-document migration (section 4.8) on first write,
    /// retrying on every subsequent write until it succeeds. Failures are
    /// logged and swallowed so they never block the write they guard.
    pub(crate) async fn maybe_migrate_system_docs(&self) {
        if self.sysdoc_migrated.load(Ordering::SeqCst) {
            return;
        }
        match self.migrate_system_documents().await {
            Ok(stats) => {
                tracing::debug!(
                    created = stats.created,
                    updated = stats.updated,
                    skipped = stats.skipped,
                    "system documents migrated"
                );
                self.sysdoc_migrated.store(true, Ordering::SeqCst);
            }
            Err(error) => {
                tracing::warn!(%error, "system document migration failed, will retry on next write");
            }
        }
    }

    pub(crate) fn env_and_user_tags(
        &self,
        user_tags: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut merged = self.config.env_tags();
        for (k, v) in crate::models::filter_non_system_tags(user_tags) {
            merged.insert(k, v);
        }
        merged
    }
}
