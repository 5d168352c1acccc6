use sha2::{Digest, Sha256};
use text_splitter::{ChunkConfig, CodeSplitter, MarkdownSplitter};

use crate::error::Result;
use crate::store::{DocumentStore, EmbeddingKind, VectorStore};

use super::{EmbeddingProvider, LlmProvider};

/// Outcome of processing one task (original_source
/// `processors.py::ProcessorResult`), applied to the stores by the caller.
#[derive(Debug, Clone)]
pub struct ProcessorResult {
    pub task_type: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub content_hash: Option<String>,
    pub content_hash_full: Option<String>,
}

fn content_hash_full(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn content_hash_short(full: &str) -> String {
    full[full.len().saturating_sub(10)..].to_string()
}

/// Summarize content via the configured LLM. Pure: no store access
/// (original_source `processors.py::process_summarize`).
pub async fn process_summarize(
    content: &str,
    context: Option<&str>,
    llm: &LlmProvider,
) -> Result<ProcessorResult> {
    let prompt = match context {
        Some(ctx) => format!(
            "Summarize the following content concisely.\n\nContext: {ctx}\n\nContent:\n{content}"
        ),
        None => format!("Summarize the following content concisely.\n\nContent:\n{content}"),
    };
    let summary = llm.complete(&prompt, None).await?;
    Ok(ProcessorResult {
        task_type: "summarize".to_string(),
        summary: Some(summary),
        content: None,
        content_hash: None,
        content_hash_full: None,
    })
}

/// Finalize OCR'd text: summarize it if it's over `max_summary_length`,
/// compute hashes over the full extracted content. Pure: no store access
/// (original_source `processors.py::process_ocr`). The extraction step
/// itself (`ocr_image`/`ocr_pdf` in the original) has no counterpart here —
/// concrete OCR backends are out of scope, same as concrete embedding/LLM
/// providers beyond the local/remote default.
pub async fn process_ocr(
    full_content: &str,
    max_summary_length: usize,
    context: Option<&str>,
    llm: Option<&LlmProvider>,
) -> Result<ProcessorResult> {
    let summary = if full_content.chars().count() <= max_summary_length {
        full_content.to_string()
    } else if let Some(llm) = llm {
        process_summarize(full_content, context, llm)
            .await?
            .summary
            .unwrap_or_default()
    } else {
        let truncated: String = full_content.chars().take(max_summary_length).collect();
        format!("{truncated}...")
    };

    let full_hash = content_hash_full(full_content);
    Ok(ProcessorResult {
        task_type: "ocr".to_string(),
        summary: Some(summary),
        content: Some(full_content.to_string()),
        content_hash: Some(content_hash_short(&full_hash)),
        content_hash_full: Some(full_hash),
    })
}

/// Splits text into analyzer parts for `analyze`.
/// Source files are split with tree-sitter's Rust grammar so a part never
/// cuts through a function body; everything else goes through the markdown
/// splitter, which already treats fenced code blocks as atomic. Both keep
/// parts close to `TARGET_LEN` but never split inside a semantic unit.
pub fn split_into_chunks(text: &str, is_code_source: bool) -> Vec<String> {
    const TARGET_LEN: usize = 800;
    let target = if is_code_source { TARGET_LEN * 2 } else { TARGET_LEN };

    if is_code_source {
        if let Ok(splitter) = CodeSplitter::new(tree_sitter_rust::LANGUAGE.into(), target) {
            let chunks: Vec<String> = splitter.chunks(text).map(str::to_string).collect();
            if !chunks.is_empty() {
                return chunks;
            }
        }
    }

    let splitter = MarkdownSplitter::new(ChunkConfig::new(target));
    let chunks: Vec<String> = splitter.chunks(text).map(str::to_string).collect();
    if chunks.is_empty() {
        vec![text.to_string()]
    } else {
        chunks
    }
}

/// Drains up to `limit` ready tasks from `queue` and applies each directly
/// to `documents`/`vectors`, except `analyze`: that task type calls back
/// into a `Keeper`, which owns this loop's caller, so it is dispatched by
/// the Keeper's own processor spawn rather than here — see
/// `keeper::write::Keeper::maybe_spawn_processor`.
pub async fn run_pending_tasks(
    queue: &dyn crate::queue::PendingQueue,
    documents: &dyn DocumentStore,
    vectors: &dyn VectorStore,
    embeddings: Option<&EmbeddingProvider>,
    llm: &LlmProvider,
    collection: &str,
) {
    loop {
        let tasks = match queue.dequeue("background-processor", 10).await {
            Ok(tasks) => tasks,
            Err(error) => {
                tracing::warn!(%error, "failed to dequeue pending tasks");
                return;
            }
        };
        if tasks.is_empty() {
            return;
        }

        for task in tasks {
            if task.collection != collection {
                continue;
            }
            let outcome = dispatch_one(&task, documents, vectors, embeddings, llm).await;
            match outcome {
                Ok(()) => {
                    if let Err(error) = queue.complete(&task.id, &task.collection, &task.task_type).await {
                        tracing::warn!(%error, task_id = %task.id, "failed to complete task");
                    }
                }
                Err(error) => {
                    let transient = error.is_transient();
                    tracing::warn!(%error, task_id = %task.id, task_type = %task.task_type, "task processing failed");
                    let result = if transient {
                        queue.fail(&task.id, &task.collection, &task.task_type, &error.to_string()).await
                    } else {
                        queue
                            .abandon(&task.id, &task.collection, &task.task_type, &error.to_string())
                            .await
                    };
                    if let Err(error) = result {
                        tracing::warn!(%error, task_id = %task.id, "failed to record task failure");
                    }
                }
            }
        }
    }
}

async fn dispatch_one(
    task: &crate::models::PendingTask,
    documents: &dyn DocumentStore,
    vectors: &dyn VectorStore,
    embeddings: Option<&EmbeddingProvider>,
    llm: &LlmProvider,
) -> Result<()> {
    match task.task_type.as_str() {
        "summarize" => {
            let result = process_summarize(&task.content, None, llm).await?;
            if let Some(summary) = result.summary {
                if let Some(doc) = documents.get(&task.collection, &task.id).await? {
                    documents
                        .upsert(
                            &task.collection,
                            &task.id,
                            &summary,
                            &doc.tags,
                            &doc.content_hash,
                            &doc.content_hash_full,
                            Some(&doc.created_at),
                        )
                        .await?;
                    if let Some(provider) = embeddings {
                        let vector = provider.embed_passage(&summary).await?;
                        vectors
                            .upsert_embedding(EmbeddingKind::Document, &task.collection, &task.id, None, &vector)
                            .await?;
                    }
                }
            }
            Ok(())
        }
        "embed" | "reindex" => {
            let Some(provider) = embeddings else {
                return Err(crate::error::KeepError::ProviderUnavailable(
                    "no embedding provider configured".to_string(),
                ));
            };
            let Some(doc) = documents.get(&task.collection, &task.id).await? else {
                return Ok(());
            };
            let content_changed = task
                .metadata
                .get("content_changed")
                .map(|v| v == "true")
                .unwrap_or(false);
            if content_changed {
                if let Some(old_vector) = vectors
                    .get_vector(EmbeddingKind::Document, &task.collection, &task.id, None)
                    .await?
                {
                    let version = documents.max_version(&task.collection, &task.id).await?;
                    vectors
                        .upsert_embedding(
                            EmbeddingKind::Version,
                            &task.collection,
                            &task.id,
                            Some(&version.to_string()),
                            &old_vector,
                        )
                        .await?;
                }
            }
            let vector = provider.embed_passage(&doc.summary).await?;
            vectors
                .upsert_embedding(EmbeddingKind::Document, &task.collection, &task.id, None, &vector)
                .await?;
            Ok(())
        }
        other => Err(crate::error::KeepError::invalid(format!(
            "unsupported background task type: {other}"
        ))),
    }
}
