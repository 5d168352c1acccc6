use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::Result;
use crate::store::EmbeddingKind;

use super::Keeper;

/// Outcome of a foreground `reconcile` pass, as surfaced by the
/// `reconcile --fix` CLI verb.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileReport {
    pub missing: u64,
    pub reconciled: u64,
    pub failed: u64,
}

impl Keeper {
    /// Runs reconciliation inline and returns a report instead of spawning
    /// it in the background. With `fix = false` this only counts drift
    /// without re-embedding, matching `reconcile` (detect) vs.
    /// `reconcile --fix` (repair).
    pub async fn reconcile_now(&self, fix: bool) -> Result<ReconcileReport> {
        let Some(provider) = self.embeddings.clone() else {
            return Ok(ReconcileReport::default());
        };

        let doc_ids = self.documents.list_ids(&self.collection).await?;
        let mut missing = Vec::new();
        for id in &doc_ids {
            let has = self
                .vectors
                .has_embedding(EmbeddingKind::Document, &self.collection, id, None)
                .await?;
            if !has {
                missing.push(id.clone());
            }
        }

        let mut report = ReconcileReport {
            missing: missing.len() as u64,
            ..Default::default()
        };
        if !fix {
            return Ok(report);
        }

        let keeper = self;
        for id in missing {
            match reconcile_one_ref(keeper, &provider, &id).await {
                Ok(true) => report.reconciled += 1,
                Ok(false) => {}
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(%error, id = %id, "failed to reconcile missing embedding");
                }
            }
        }
        Ok(report)
    }
}

async fn reconcile_one_ref(
    keeper: &Keeper,
    provider: &crate::processors::EmbeddingProvider,
    id: &str,
) -> Result<bool> {
    let Some(doc) = keeper.documents.get(&keeper.collection, id).await? else {
        return Ok(false);
    };
    let vector = provider.embed_passage(&doc.summary).await?;
    if keeper.documents.get(&keeper.collection, id).await?.is_none() {
        return Ok(false);
    }
    keeper
        .vectors
        .upsert_embedding(EmbeddingKind::Document, &keeper.collection, id, None, &vector)
        .await?;
    Ok(true)
}

/// Spawns the startup reconciliation pass. Compares
/// `DocumentStore`'s head id set against which of those ids already carry
/// an embedding and re-embeds the gap in the background; `wait_for_reconcile`
/// is what makes writes block on this (with a bounded timeout) rather than
/// racing a concurrent reconcile pass.
///
/// Unlike the original's separate Chroma-backed vector store, embeddings
/// here live as columns on the same `documents`/`versions`/`parts` rows
/// `DocumentStore` writes metadata into, so there is no id that can exist
/// in the vector store without a corresponding document row — the orphan
/// side of the original's id-set diff has no counterpart in this schema.
/// Only "missing" (a document row with no embedding yet) is possible.
pub(crate) async fn spawn_reconcile(keeper: Arc<Keeper>) -> Result<()> {
    let Some(_) = &keeper.embeddings else {
        return Ok(());
    };

    let doc_ids = keeper.documents.list_ids(&keeper.collection).await?;
    let mut missing = Vec::new();
    for id in &doc_ids {
        let has = keeper
            .vectors
            .has_embedding(EmbeddingKind::Document, &keeper.collection, id, None)
            .await?;
        if !has {
            missing.push(id.clone());
        }
    }

    if missing.is_empty() {
        return Ok(());
    }

    keeper.reconciling.store(true, Ordering::SeqCst);
    tokio::spawn(run_reconcile(keeper, missing));
    Ok(())
}

async fn run_reconcile(keeper: Arc<Keeper>, missing: Vec<String>) {
    let Some(provider) = keeper.embeddings.clone() else {
        keeper.reconciling.store(false, Ordering::SeqCst);
        keeper.reconcile_done.notify_waiters();
        return;
    };

    let mut reconciled = 0u64;
    let mut failed = 0u64;

    for id in missing {
        let outcome = reconcile_one(&keeper, &provider, &id).await;
        match outcome {
            Ok(true) => reconciled += 1,
            Ok(false) => {}
            Err(error) => {
                failed += 1;
                tracing::warn!(%error, id = %id, "failed to reconcile missing embedding");
            }
        }
    }

    tracing::info!(reconciled, failed, "auto-reconcile complete");
    keeper.reconciling.store(false, Ordering::SeqCst);
    keeper.reconcile_done.notify_waiters();
}

/// Re-embeds one document's summary and writes it back, re-checking the
/// document still exists after the (potentially slow) embed call.
async fn reconcile_one(
    keeper: &Arc<Keeper>,
    provider: &crate::processors::EmbeddingProvider,
    id: &str,
) -> Result<bool> {
    let Some(doc) = keeper.documents.get(&keeper.collection, id).await? else {
        return Ok(false);
    };
    let vector = provider.embed_passage(&doc.summary).await?;
    if keeper.documents.get(&keeper.collection, id).await?.is_none() {
        return Ok(false);
    }
    keeper
        .vectors
        .upsert_embedding(EmbeddingKind::Document, &keeper.collection, id, None, &vector)
        .await?;
    Ok(true)
}
