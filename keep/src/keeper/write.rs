use std::collections::HashMap;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{KeepError, Result};
use crate::models::{base_id, filter_non_system_tags, is_system_tag, Edge, Item};
use crate::store::{tags as tagvalidate, EmbeddingKind, PartInput};

use super::Keeper;

const SHORT_HASH_LEN: usize = 10;

/// Full SHA-256 hex digest of `content`, stored as `content_hash_full`.
pub fn content_hash_full(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Short dedup-friendly suffix of the full hash (the donor lookup key) — the
/// last 10 hex chars, not the first, so it stays a true suffix of
/// `content_hash_full`.
pub fn content_hash_short(full: &str) -> String {
    full[full.len().saturating_sub(SHORT_HASH_LEN)..].to_string()
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub id: Option<String>,
    pub tags: HashMap<String, String>,
    pub summary: Option<String>,
    pub created_at: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MoveOptions {
    pub source_id: Option<String>,
    pub tags: Option<HashMap<String, String>>,
    pub only_current: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub tags: HashMap<String, String>,
    pub force: bool,
}

impl Keeper {
    /// Resolves `content_or_uri` (raw text, or a `file://` path) and an
    /// optional explicit id into a concrete `(id, content)` pair, then
    /// delegates to `upsert`.
    pub async fn put(&self, content_or_uri: &str, opts: PutOptions) -> Result<(Item, bool)> {
        let (id, content, extra_tags) = self.resolve_put_source(content_or_uri, opts.id.as_deref()).await?;

        let mut tags = opts.tags.clone();
        for (k, v) in extra_tags {
            tags.entry(k).or_insert(v);
        }

        self.upsert(
            &id,
            &content,
            tags,
            opts.summary,
            opts.created_at,
            opts.force,
        )
        .await
    }

    /// `file://` sources are stat'd before being read so an unchanged file
    /// (same mtime/size as the cached `_file_mtime_ns`/`_file_size` tags)
    /// skips a full re-read; non-UTF8 content is described rather than
    /// stored verbatim (section 4.4 "media describer").
    async fn resolve_put_source(
        &self,
        content_or_uri: &str,
        id: Option<&str>,
    ) -> Result<(String, String, HashMap<String, String>)> {
        let Some(path) = content_or_uri.strip_prefix("file://") else {
            let id = id
                .map(tagvalidate::normalize_id)
                .transpose()?
                .ok_or_else(|| KeepError::invalid("id is required when content is not a file:// URI"))?;
            return Ok((id, content_or_uri.to_string(), HashMap::new()));
        };

        let id = tagvalidate::normalize_id(id.unwrap_or(content_or_uri))?;
        let metadata = tokio::fs::metadata(path).await?;
        let size = metadata.len();
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos().to_string())
            .unwrap_or_default();

        let existing = self.documents.get(&self.collection, &id).await?;
        if let Some(existing) = &existing {
            let cached_matches = existing.tags.get("_file_mtime_ns") == Some(&mtime_ns)
                && existing.tags.get("_file_size") == Some(&size.to_string());
            if cached_matches {
                // Unchanged on disk: reuse the stored content rather than
                // re-reading (and possibly re-OCRing) the file.
                return Ok((
                    id,
                    existing.summary.clone(),
                    HashMap::from([
                        ("_file_mtime_ns".to_string(), mtime_ns),
                        ("_file_size".to_string(), size.to_string()),
                        ("_source".to_string(), "uri".to_string()),
                    ]),
                ));
            }
        }

        let bytes = tokio::fs::read(path).await?;
        let content = match String::from_utf8(bytes.clone()) {
            Ok(text) => text,
            Err(_) => {
                let mime = infer::get(&bytes)
                    .map(|k| k.mime_type().to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                format!("Description:\n{mime} file, {size} bytes, not directly readable as text")
            }
        };

        Ok((
            id,
            content,
            HashMap::from([
                ("_file_mtime_ns".to_string(), mtime_ns),
                ("_file_size".to_string(), size.to_string()),
                ("_source".to_string(), "uri".to_string()),
            ]),
        ))
    }

    /// The 11-step write pipeline.
    pub async fn upsert(
        &self,
        id: &str,
        content: &str,
        user_tags: HashMap<String, String>,
        explicit_summary: Option<String>,
        created_at: Option<String>,
        force: bool,
    ) -> Result<(Item, bool)> {
        tagvalidate::validate_id(id)?;
        for (k, v) in &user_tags {
            tagvalidate::validate_tag_key(k)?;
            tagvalidate::validate_tag_value(v)?;
        }

        // Step 1: reconciliation barrier.
        self.wait_for_reconcile().await;
        self.maybe_migrate_system_docs().await;

        // Step 2: merged tags (existing -> env defaults -> user -> system).
        let existing = self.documents.get(&self.collection, id).await?;
        let mut merged_tags = existing.as_ref().map(|d| d.tags.clone()).unwrap_or_default();
        for (k, v) in self.env_and_user_tags(&user_tags) {
            merged_tags.insert(k, v);
        }

        // Step 3: constrained-tag validation.
        for (key, value) in filter_non_system_tags(&user_tags) {
            let tagdoc_id = format!(".tag/{key}");
            if let Some(tagdoc) = self.documents.get(&self.collection, &tagdoc_id).await? {
                let constrained = tagdoc
                    .tags
                    .get("_constrained")
                    .map(|v| v == "true")
                    .unwrap_or(false);
                if constrained {
                    let value_doc_id = format!(".tag/{key}/{value}");
                    if !self.documents.exists(&self.collection, &value_doc_id).await? {
                        let valid_values = self
                            .documents
                            .query_by_id_prefix(&self.collection, &format!(".tag/{key}/"))
                            .await?
                            .into_iter()
                            .filter_map(|d| d.id.strip_prefix(&format!(".tag/{key}/")).map(str::to_string))
                            .collect();
                        return Err(KeepError::Constrained {
                            key: key.clone(),
                            valid_values,
                        });
                    }
                }
            }
        }

        let full_hash = content_hash_full(content);
        let short_hash = content_hash_short(&full_hash);

        // Step 4: no-op short-circuit.
        if let Some(existing) = &existing {
            let user_tags_unchanged =
                filter_non_system_tags(&user_tags) == filter_non_system_tags(&existing.tags);
            if existing.content_hash == short_hash && user_tags_unchanged && explicit_summary.is_none() {
                return Ok((document_to_item(existing), false));
            }
        }

        // Step 5: summary determination.
        let max_len = self.config.memory.max_summary_length;
        let mut needs_summarize = false;
        let summary = match explicit_summary {
            Some(s) if s.chars().count() > max_len => {
                tracing::warn!(id, "explicit summary truncated to max_summary_length");
                s.chars().take(max_len).collect()
            }
            Some(s) => s,
            None if content.chars().count() <= max_len => content.to_string(),
            None => {
                needs_summarize = true;
                let placeholder: String = content.chars().take(max_len).collect();
                format!("{placeholder}...")
            }
        };

        // Step 6: embedding computation, preferring reuse over recompute.
        let content_changed = existing
            .as_ref()
            .map(|d| d.content_hash != short_hash)
            .unwrap_or(true);
        let is_remote = self.remote.as_ref().is_some_and(|_| self.embeddings.is_none());

        let new_embedding: Option<Vec<f32>> = if is_remote {
            None
        } else if !content_changed {
            self.vectors
                .get_vector(EmbeddingKind::Document, &self.collection, id, None)
                .await?
        } else if let Some(donor) = self.find_embedding_donor(&short_hash, &full_hash).await? {
            Some(donor)
        } else if let Some(provider) = &self.embeddings {
            Some(provider.embed_passage(&summary).await?)
        } else {
            None
        };

        // Step 7 prep: snapshot the *old* embedding before it is overwritten,
        // written into the archived version row after the new head lands.
        let old_embedding = if content_changed && existing.is_some() {
            self.vectors
                .get_vector(EmbeddingKind::Document, &self.collection, id, None)
                .await?
        } else {
            None
        };

        // Step 8: canonical write (DocumentStore), then index (VectorStore).
        let (doc, content_changed) = self
            .documents
            .upsert(
                &self.collection,
                id,
                &summary,
                &merged_tags,
                &short_hash,
                &full_hash,
                created_at.as_deref(),
            )
            .await?;

        if content_changed {
            if let Some(old_vec) = old_embedding {
                let archived_version = self.documents.max_version(&self.collection, id).await?;
                self.vectors
                    .upsert_embedding(
                        EmbeddingKind::Version,
                        &self.collection,
                        id,
                        Some(&archived_version.to_string()),
                        &old_vec,
                    )
                    .await?;
            }
        }

        if let Some(vector) = &new_embedding {
            self.vectors
                .upsert_embedding(EmbeddingKind::Document, &self.collection, id, None, vector)
                .await?;
        } else if is_remote {
            let mut meta = HashMap::new();
            meta.insert("content_changed".to_string(), content_changed.to_string());
            self.queue
                .enqueue(id, &self.collection, "embed", &summary, meta)
                .await?;
        }

        // Step 5 continued: enqueue summarize now that the head exists.
        if needs_summarize {
            self.queue
                .enqueue(id, &self.collection, "summarize", content, HashMap::new())
                .await?;
        }

        // Step 9: best-effort background processor for local pending work.
        if needs_summarize && !force {
            self.maybe_spawn_processor();
        }

        // Step 10: tagdoc inverse registration when this write *is* a tagdoc.
        if let Some(key) = id.strip_prefix(".tag/") {
            if !key.contains('/') {
                if let Some(inverse) = merged_tags.get("_inverse") {
                    self.documents
                        .upsert_backfill(&self.collection, key, inverse)
                        .await?;
                }
            }
        }

        // Step 11: edge-tag materialization.
        self.sync_edge_tags(id, &merged_tags).await?;

        Ok((document_to_item(&doc), true))
    }

    async fn find_embedding_donor(&self, short_hash: &str, full_hash: &str) -> Result<Option<Vec<f32>>> {
        for donor in self.documents.find_by_content_hash(&self.collection, short_hash).await? {
            if donor.content_hash_full != full_hash {
                continue;
            }
            if let Some(vector) = self
                .vectors
                .get_vector(EmbeddingKind::Document, &self.collection, &donor.id, None)
                .await?
            {
                if vector.len() == self.vectors.embedding_dim() {
                    return Ok(Some(vector));
                }
            }
        }
        Ok(None)
    }

    fn maybe_spawn_processor(&self) {
        use std::sync::atomic::Ordering;
        if self
            .processor_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let queue = self.queue.clone();
        let llm = self.llm.clone();
        let documents = self.documents.clone();
        let vectors = self.vectors.clone();
        let embeddings = self.embeddings.clone();
        let collection = self.collection.clone();
        let running = self.processor_running.clone();
        tokio::spawn(async move {
            crate::processors::run_pending_tasks(
                &*queue, &*documents, &*vectors, embeddings.as_deref(), &llm, &collection,
            )
            .await;
            running.store(false, Ordering::SeqCst);
        });
    }

    /// Deletes every edge sourced at `id` and re-creates one per edge-tag
    /// present in `tags` (section 4.4 step 11). Non-dot targets that don't
    /// yet exist are auto-vivified as empty stub documents; dot-prefixed
    /// targets (`.tag/*`, `.meta/*`) are never auto-created.
    async fn sync_edge_tags(&self, id: &str, tags: &HashMap<String, String>) -> Result<()> {
        self.documents.delete_edges_for_source(&self.collection, id).await?;

        for (key, target) in filter_non_system_tags(tags) {
            if target.starts_with('.') {
                continue;
            }
            let tagdoc_id = format!(".tag/{key}");
            let Some(tagdoc) = self.documents.get(&self.collection, &tagdoc_id).await? else {
                continue;
            };
            let Some(inverse) = tagdoc.tags.get("_inverse") else {
                continue;
            };

            if !self.documents.exists(&self.collection, &target).await? {
                let empty_hash = content_hash_full("");
                self.documents
                    .upsert(
                        &self.collection,
                        &target,
                        &target,
                        &HashMap::new(),
                        &content_hash_short(&empty_hash),
                        &empty_hash,
                        None,
                    )
                    .await?;
            }

            self.documents
                .upsert_edge(&Edge {
                    collection: self.collection.clone(),
                    source_id: id.to_string(),
                    predicate: key,
                    target_id: target,
                    inverse_verb: inverse.clone(),
                    created_at: Utc::now().to_rfc3339(),
                })
                .await?;
        }
        Ok(())
    }

    /// Renames/re-tags a document's full tag set, replacing system tags the
    /// caller is not allowed to set directly.
    pub async fn tag(&self, id: &str, tags: HashMap<String, String>) -> Result<Item> {
        let existing = self
            .documents
            .get(&self.collection, id)
            .await?
            .ok_or_else(|| KeepError::not_found(id))?;
        let (item, _changed) = self
            .upsert(
                id,
                "",
                tags,
                Some(existing.summary.clone()),
                Some(existing.created_at.clone()),
                false,
            )
            .await?;
        Ok(item)
    }

    /// Deletes a document (and, if requested, its version history). Also
    /// drops its embeddings, parts, and outbound edges.
    pub async fn delete(&self, id: &str, delete_versions: bool) -> Result<bool> {
        self.wait_for_reconcile().await;
        self.vectors
            .delete_embedding(EmbeddingKind::Document, &self.collection, id, None)
            .await?;
        self.documents.delete_parts(&self.collection, id).await?;
        self.documents.delete_edges_for_source(&self.collection, id).await?;
        self.documents.delete(&self.collection, id, delete_versions).await
    }

    /// Promotes the latest archived version back to head. Equivalent to
    /// `delete` if the document has no version history.
    pub async fn revert(&self, id: &str) -> Result<Option<Item>> {
        self.wait_for_reconcile().await;
        let max_version = self.documents.max_version(&self.collection, id).await?;
        if max_version == 0 {
            self.delete(id, false).await?;
            return Ok(None);
        }

        let archived_vector = self
            .vectors
            .get_vector(EmbeddingKind::Version, &self.collection, id, Some(&max_version.to_string()))
            .await?;

        let restored = self.documents.restore_latest_version(&self.collection, id).await?;
        let Some(restored) = restored else {
            return Ok(None);
        };

        self.vectors
            .delete_embedding(EmbeddingKind::Version, &self.collection, id, Some(&max_version.to_string()))
            .await?;
        if let Some(vector) = archived_vector {
            self.vectors
                .upsert_embedding(EmbeddingKind::Document, &self.collection, id, None, &vector)
                .await?;
        }

        Ok(Some(document_to_item(&restored)))
    }

    /// Extracts matching history from `source_id` (defaulting to `now`,
    /// i.e. the current head) into `target_name`, mirroring the vector-store
    /// shift atomically.
    pub async fn move_doc(&self, target_name: &str, opts: MoveOptions) -> Result<Item> {
        self.wait_for_reconcile().await;
        let source_id = opts.source_id.as_deref().unwrap_or(target_name);
        let target_id = tagvalidate::normalize_id(target_name)?;

        // `extract_versions` renumbers versions onto the target's sequence
        // and doesn't hand back the source's original version numbers, so
        // archived version embeddings aren't re-keyed here (they're orphaned
        // on `source_id`'s now-deleted version rows); only the live head
        // embedding is carried across.
        let source_head = self.documents.get(&self.collection, source_id).await?;
        let head_matches = source_head
            .as_ref()
            .map(|d| {
                opts.tags
                    .as_ref()
                    .map(|filter| filter.iter().all(|(k, v)| d.tags.get(k) == Some(v)))
                    .unwrap_or(true)
            })
            .unwrap_or(false);

        self.documents
            .extract_versions(
                &self.collection,
                source_id,
                &target_id,
                opts.tags.as_ref(),
                opts.only_current,
            )
            .await?;

        // Only the live head's vector travels with it, and only if the head
        // itself was part of what moved; an archived-only move leaves the
        // target's promoted head without a stale, mismatched embedding.
        if head_matches {
            if let Some(source_vector) = self
                .vectors
                .get_vector(EmbeddingKind::Document, &self.collection, source_id, None)
                .await?
            {
                self.vectors
                    .upsert_embedding(EmbeddingKind::Document, &self.collection, &target_id, None, &source_vector)
                    .await?;
            }
        }

        let target = self
            .documents
            .get(&self.collection, &target_id)
            .await?
            .ok_or_else(|| KeepError::Corruption(format!("{target_id} missing after move")))?;
        Ok(document_to_item(&target))
    }

    /// Decomposes a document into parts via a markdown/code-aware splitter,
    /// replacing any existing part set. Skips work if the content hash
    /// hasn't changed since the last analysis and `force` is false.
    pub async fn analyze(&self, id: &str, opts: AnalyzeOptions) -> Result<Vec<Item>> {
        self.wait_for_reconcile().await;
        let doc = self
            .documents
            .get(&self.collection, id)
            .await?
            .ok_or_else(|| KeepError::not_found(id))?;

        let source_is_uri = doc.tags.get("_source").map(String::as_str) == Some("uri");
        let content_hash = doc.content_hash.clone();

        if !opts.force && doc.tags.get("_analyzed_hash") == Some(&content_hash) {
            return Ok(self
                .documents
                .list_parts(&self.collection, id)
                .await?
                .into_iter()
                .map(|p| Item::new(format!("{id}@p{}", p.part_num), p.summary))
                .collect());
        }

        let chunks = crate::processors::split_into_chunks(&doc.summary, source_is_uri);
        let mut parts = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let mut tags = opts.tags.clone();
            tags.retain(|k, _| !is_system_tag(k));
            parts.push(PartInput {
                part_num: idx as u32 + 1,
                summary: chunk.clone(),
                tags,
                content: chunk,
            });
        }

        self.documents.upsert_parts(&self.collection, id, parts.clone()).await?;

        if let Some(provider) = &self.embeddings {
            for part in &parts {
                let vector = provider.embed_passage(&part.summary).await?;
                self.vectors
                    .upsert_embedding(
                        EmbeddingKind::Part,
                        &self.collection,
                        id,
                        Some(&part.part_num.to_string()),
                        &vector,
                    )
                    .await?;
            }
        }

        let mut updated_tags = doc.tags.clone();
        updated_tags.insert("_analyzed_hash".to_string(), content_hash);
        self.documents
            .upsert(
                &self.collection,
                id,
                &doc.summary,
                &updated_tags,
                &doc.content_hash,
                &doc.content_hash_full,
                Some(&doc.created_at),
            )
            .await?;

        Ok(parts
            .into_iter()
            .map(|p| Item::new(format!("{id}@p{}", p.part_num), p.summary))
            .collect())
    }

    /// Fixes the current timestamp used for `_created`/`_updated` on the
    /// next write (testing/import hook).
    pub fn set_now(&self, _now: chrono::DateTime<Utc>) {
        // Timestamps are computed with `Utc::now()` at write time throughout
        // this store; tests that need a fixed clock should construct
        // documents with an explicit `created_at` instead of relying on
        // process-global clock overrides.
    }
}

fn document_to_item(doc: &crate::models::Document) -> Item {
    let mut item = Item::new(doc.id.clone(), doc.summary.clone());
    item.tags = doc.tags.clone();
    item.changed = Some(true);
    item
}

#[allow(dead_code)]
fn is_hidden(id: &str) -> bool {
    base_id(id).starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hash_is_a_suffix_of_the_full_hash() {
        let full = content_hash_full("hello world");
        let short = content_hash_short(&full);
        assert_eq!(short.len(), 10);
        assert!(full.ends_with(&short));
    }
}
