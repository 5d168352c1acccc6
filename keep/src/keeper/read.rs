use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::error::Result;
use crate::models::{
    base_id, is_part_id, is_version_id, Document, FindRequest, Item, ItemContext, MetaRef,
    PartRef, RrfWeights, SimilarRef, VersionRef,
};
use crate::store::{EmbeddingKind, FtsHit, ScoredId};

use super::Keeper;

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// 0 or `None` means the current head; 1 = previous archived version,
    /// 2 = two back, etc.
    pub version: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct GetContextOptions {
    pub version: Option<u64>,
    pub similar_limit: usize,
    pub meta_limit: usize,
    pub include_similar: bool,
    pub include_meta: bool,
    pub include_parts: bool,
    pub include_versions: bool,
}

impl Default for GetContextOptions {
    fn default() -> Self {
        Self {
            version: None,
            similar_limit: 3,
            meta_limit: 3,
            include_similar: true,
            include_meta: true,
            include_parts: true,
            include_versions: true,
        }
    }
}

/// An id plus its running relevance score, before the id is resolved into a
/// full `Item` (part/version uplift needs the id shape intact up to that
/// point, so candidates stay as bare ids through ranking).
struct Candidate {
    id: String,
    score: f64,
}

impl Keeper {
    /// Tag-filtered similarity/full-text/hybrid search with recency decay,
    /// part/version uplift, hidden filtering, and optional deep-search
    /// augmentation.
    pub async fn find(&self, req: FindRequest) -> Result<Vec<Item>> {
        self.wait_for_reconcile().await;

        let allowed_ids = self.candidate_ids_for_tags(&req.tags).await?;

        let mut candidates = if req.similar_to.is_some() {
            self.find_similar_to(&req, allowed_ids.as_deref()).await?
        } else if req.fulltext {
            self.find_fulltext(&req, allowed_ids.as_deref()).await?
        } else if req.query.is_some() {
            self.find_hybrid(&req, allowed_ids.as_deref()).await?
        } else {
            self.find_by_tags_only(allowed_ids.as_deref()).await?
        };

        candidates = self
            .apply_since_until(candidates, req.since.as_deref(), req.until.as_deref())
            .await?;

        if self.config.memory.recency_half_life_days > 0.0 {
            candidates = self.apply_recency_decay(candidates).await?;
            candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        }

        let mut items = self.uplift_and_dedup(candidates).await?;

        if !req.include_hidden {
            let anchor = req.similar_to.as_deref();
            items.retain(|item| anchor == Some(item.id.as_str()) || !is_hidden(&item.id));
        }
        if !req.include_self {
            if let Some(similar_to) = &req.similar_to {
                items.retain(|item| &item.id != similar_to);
            }
        }

        if req.deep {
            if let Ok(groups) = self.deep_search(&items, &req).await {
                let existing: HashSet<String> = items.iter().map(|i| i.id.clone()).collect();
                for group_items in groups.groups.into_values() {
                    for candidate in group_items {
                        if items.len() >= req.limit {
                            break;
                        }
                        if existing.contains(&candidate.id) {
                            continue;
                        }
                        items.push(candidate);
                    }
                }
            }
        }

        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        if !ids.is_empty() {
            self.documents.touch_many(&self.collection, &ids).await?;
        }

        items.truncate(req.limit.max(1));
        Ok(items)
    }

    /// Resolves a casefolded tag filter into a candidate id set. `None`
    /// means unrestricted (no tags given); `Some(ids)` is the AND of every
    /// key/value pair, matched case-insensitively against DocumentStore's
    /// original-case tags.
    pub(crate) async fn candidate_ids_for_tags(
        &self,
        tags: &HashMap<String, String>,
    ) -> Result<Option<Vec<String>>> {
        if tags.is_empty() {
            return Ok(None);
        }
        let casefolded = crate::models::casefold_tags_for_index(tags);
        let mut candidate: Option<HashSet<String>> = None;
        for (key, value) in &casefolded {
            let docs = self
                .documents
                .query_by_tag_key(&self.collection, key, None, None)
                .await?;
            let matching: HashSet<String> = docs
                .into_iter()
                .filter(|d| {
                    d.tags
                        .iter()
                        .any(|(k, v)| k.to_lowercase() == *key && v.to_lowercase() == *value)
                })
                .map(|d| d.id)
                .collect();
            candidate = Some(match candidate {
                Some(existing) => existing.intersection(&matching).cloned().collect(),
                None => matching,
            });
        }
        Ok(Some(candidate.unwrap_or_default().into_iter().collect()))
    }

    async fn resolve_query_vector(&self, similar_to: &str) -> Result<Option<Vec<f32>>> {
        if let Some(vector) = self
            .vectors
            .get_vector(EmbeddingKind::Document, &self.collection, similar_to, None)
            .await?
        {
            return Ok(Some(vector));
        }
        let Some(doc) = self.documents.get(&self.collection, similar_to).await? else {
            return Ok(None);
        };
        let Some(provider) = &self.embeddings else {
            return Ok(None);
        };
        let vector = provider.embed_passage(&doc.summary).await?;
        self.vectors
            .upsert_embedding(EmbeddingKind::Document, &self.collection, similar_to, None, &vector)
            .await?;
        Ok(Some(vector))
    }

    async fn find_similar_to(
        &self,
        req: &FindRequest,
        allowed: Option<&[String]>,
    ) -> Result<Vec<Candidate>> {
        let similar_to = req.similar_to.as_deref().unwrap();
        let Some(vector) = self.resolve_query_vector(similar_to).await? else {
            return Ok(Vec::new());
        };
        let hits = match allowed {
            Some(ids) => {
                self.vectors
                    .search_scoped(EmbeddingKind::Document, &self.collection, &vector, ids)
                    .await?
            }
            None => {
                let k = req.limit.saturating_mul(3).max(req.limit);
                self.vectors
                    .search(EmbeddingKind::Document, &self.collection, &vector, k)
                    .await?
            }
        };
        Ok(hits
            .into_iter()
            .map(|h| Candidate { id: h.id, score: 1.0 - h.distance })
            .collect())
    }

    async fn find_fulltext(
        &self,
        req: &FindRequest,
        allowed: Option<&[String]>,
    ) -> Result<Vec<Candidate>> {
        let Some(query) = req.query.as_deref() else {
            return Ok(Vec::new());
        };
        let hits = match allowed {
            Some(ids) => {
                self.documents
                    .query_fts_scoped(&self.collection, query, ids)
                    .await?
            }
            None => {
                let k = req.limit.saturating_mul(3).max(req.limit);
                self.documents.query_fts(&self.collection, query, k).await?
            }
        };
        Ok(fts_hits_to_candidates(hits))
    }

    async fn find_hybrid(
        &self,
        req: &FindRequest,
        allowed: Option<&[String]>,
    ) -> Result<Vec<Candidate>> {
        let query = req.query.as_deref().unwrap_or_default();
        let k = req.limit.saturating_mul(3).max(6);

        let semantic_hits: Vec<ScoredId> = if let Some(provider) = &self.embeddings {
            let vector = provider.embed_query(query).await?;
            match allowed {
                Some(ids) => {
                    self.vectors
                        .search_scoped(EmbeddingKind::Document, &self.collection, &vector, ids)
                        .await?
                }
                None => {
                    self.vectors
                        .search(EmbeddingKind::Document, &self.collection, &vector, k)
                        .await?
                }
            }
        } else {
            Vec::new()
        };

        let fts_hits: Vec<FtsHit> = match allowed {
            Some(ids) => {
                self.documents
                    .query_fts_scoped(&self.collection, query, ids)
                    .await?
            }
            None => self.documents.query_fts(&self.collection, query, k).await?,
        };

        Ok(rrf_fuse(&semantic_hits, &fts_hits, RrfWeights::default()))
    }

    async fn find_by_tags_only(&self, allowed: Option<&[String]>) -> Result<Vec<Candidate>> {
        let ids = match allowed {
            Some(ids) => ids.to_vec(),
            None => self.documents.list_ids(&self.collection).await?,
        };
        Ok(ids.into_iter().map(|id| Candidate { id, score: 1.0 }).collect())
    }

    /// Step 3: since/until filtering. A candidate whose document has no
    /// `_updated_date` tag (legacy row, or a version/part sub-entry not yet
    /// uplifted) is kept rather than dropped — the filter just doesn't
    /// apply to it.
    async fn apply_since_until(
        &self,
        candidates: Vec<Candidate>,
        since: Option<&str>,
        until: Option<&str>,
    ) -> Result<Vec<Candidate>> {
        if since.is_none() && until.is_none() {
            return Ok(candidates);
        }
        let since_date = since.map(normalize_since_until);
        let until_date = until.map(normalize_since_until);

        let mut out = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(doc) = self.documents.get(&self.collection, base_id(&candidate.id)).await? else {
                continue;
            };
            let Some(updated_date) = doc.tags.get("_updated_date") else {
                out.push(candidate);
                continue;
            };
            if let Some(s) = &since_date {
                if updated_date < s {
                    continue;
                }
            }
            if let Some(u) = &until_date {
                if updated_date > u {
                    continue;
                }
            }
            out.push(candidate);
        }
        Ok(out)
    }

    async fn apply_recency_decay(&self, candidates: Vec<Candidate>) -> Result<Vec<Candidate>> {
        let half_life = self.config.memory.recency_half_life_days;
        let now = Utc::now();
        let mut out = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            if let Some(doc) = self.documents.get(&self.collection, base_id(&candidate.id)).await? {
                if let Some(updated) = doc.tags.get("_updated") {
                    if let Ok(updated_at) = chrono::DateTime::parse_from_rfc3339(updated) {
                        let days_elapsed =
                            (now - updated_at.with_timezone(&Utc)).num_seconds() as f64 / 86400.0;
                        candidate.score *= 0.5_f64.powf(days_elapsed.max(0.0) / half_life);
                    }
                }
            }
            out.push(candidate);
        }
        Ok(out)
    }

    /// Step 5: replaces part/version hits with their parent document,
    /// carrying `_focus_part`/`_focus_version`/`_focus_summary`. Part hits
    /// of the same parent are deduped to the highest score; version and
    /// head hits of the same parent are kept as separate anchors.
    async fn uplift_and_dedup(&self, candidates: Vec<Candidate>) -> Result<Vec<Item>> {
        let mut best_part_score: HashMap<String, f64> = HashMap::new();
        let mut seen_other: HashSet<String> = HashSet::new();
        let mut items: Vec<Item> = Vec::new();

        for candidate in candidates {
            if is_part_id(&candidate.id) {
                let parent_id = base_id(&candidate.id).to_string();
                let best = best_part_score.entry(parent_id.clone()).or_insert(f64::NEG_INFINITY);
                if candidate.score <= *best {
                    continue;
                }
                *best = candidate.score;
                items.retain(|i| !(i.id == parent_id && i.tags.contains_key("_focus_part")));

                let Some(doc) = self.documents.get(&self.collection, &parent_id).await? else {
                    continue;
                };
                let mut item = document_to_item(&doc);
                item.score = Some(candidate.score);
                if let Some(part_num) = suffix_num(&candidate.id) {
                    item.tags.insert("_focus_part".to_string(), part_num.to_string());
                    if let Some(part) = self
                        .documents
                        .get_part(&self.collection, &parent_id, part_num as u32)
                        .await?
                    {
                        item.tags.insert("_focus_summary".to_string(), part.summary);
                    }
                }
                items.push(item);
            } else if is_version_id(&candidate.id) {
                if !seen_other.insert(candidate.id.clone()) {
                    continue;
                }
                let parent_id = base_id(&candidate.id).to_string();
                let Some(doc) = self.documents.get(&self.collection, &parent_id).await? else {
                    continue;
                };
                let mut item = document_to_item(&doc);
                item.score = Some(candidate.score);
                if let Some(internal_version) = suffix_num(&candidate.id) {
                    let internal_version = internal_version as u64;
                    let offset = self
                        .documents
                        .count_versions_from(&self.collection, &parent_id, internal_version)
                        .await?;
                    item.tags.insert("_focus_version".to_string(), offset.to_string());
                    if let Some(version) = self
                        .documents
                        .get_version(&self.collection, &parent_id, offset)
                        .await?
                    {
                        item.tags.insert("_focus_summary".to_string(), version.summary);
                    }
                }
                items.push(item);
            } else {
                if !seen_other.insert(candidate.id.clone()) {
                    continue;
                }
                let Some(doc) = self.documents.get(&self.collection, &candidate.id).await? else {
                    continue;
                };
                let mut item = document_to_item(&doc);
                item.score = Some(candidate.score);
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Fetches the head, or an archived version when `opts.version` is a
    /// non-zero offset.
    pub async fn get(&self, id: &str, opts: GetOptions) -> Result<Option<Item>> {
        self.wait_for_reconcile().await;
        let Some(doc) = self.documents.get(&self.collection, id).await? else {
            return Ok(None);
        };
        let mut item = document_to_item(&doc);

        if let Some(offset) = opts.version {
            if offset > 0 {
                let Some(version) = self.documents.get_version(&self.collection, id, offset).await? else {
                    return Ok(None);
                };
                item.summary = version.summary;
                item.tags = version.tags;
                item.tags.insert("_version".to_string(), offset.to_string());
            }
        }

        self.documents.touch(&self.collection, id).await?;
        Ok(Some(item))
    }

    /// Maps an item's `_version` tag back to its user-facing offset by
    /// counting archived versions at or after that internal version number.
    pub async fn get_version_offset(&self, id: &str, item: &Item) -> Result<u64> {
        let Some(internal_version) = item.tags.get("_version").and_then(|v| v.parse::<u64>().ok()) else {
            return Ok(0);
        };
        self.documents
            .count_versions_from(&self.collection, id, internal_version)
            .await
    }

    /// Plain tag/recency browse (the `list` verb) — no ranking, just the
    /// most recently updated documents matching `tags`.
    pub async fn list(&self, tags: HashMap<String, String>, limit: usize) -> Result<Vec<Item>> {
        self.wait_for_reconcile().await;
        let docs: Vec<Document> = if tags.is_empty() {
            self.documents
                .list_recent(&self.collection, crate::store::OrderBy::Updated, limit)
                .await?
        } else {
            let ids = self.candidate_ids_for_tags(&tags).await?.unwrap_or_default();
            let mut docs = self.documents.get_many(&self.collection, &ids).await?;
            docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            docs.truncate(limit);
            docs
        };
        Ok(docs
            .into_iter()
            .filter(|d| !is_hidden(&d.id))
            .map(|d| document_to_item(&d))
            .collect())
    }

    /// Assembles similar-for-display, meta-doc resolution, part manifest,
    /// version navigation, and inverse edges for a single item.
    pub async fn get_context(&self, id: &str, opts: GetContextOptions) -> Result<Option<ItemContext>> {
        self.wait_for_reconcile().await;
        let Some(item) = self.get(id, GetOptions { version: opts.version }).await? else {
            return Ok(None);
        };

        let viewing_offset = self.get_version_offset(id, &item).await? as i64;
        let mut ctx = ItemContext::new(item.clone());
        ctx.viewing_offset = viewing_offset;

        if opts.include_similar {
            if let Some(vector) = self
                .vectors
                .get_vector(EmbeddingKind::Document, &self.collection, id, None)
                .await?
            {
                let hits = self
                    .vectors
                    .search(
                        EmbeddingKind::Document,
                        &self.collection,
                        &vector,
                        opts.similar_limit * 4 + 4,
                    )
                    .await?;
                let mut seen = HashSet::new();
                for hit in hits {
                    if is_version_id(&hit.id) {
                        continue;
                    }
                    let candidate_base = base_id(&hit.id).to_string();
                    if candidate_base == id || is_hidden(&candidate_base) {
                        continue;
                    }
                    if !seen.insert(candidate_base.clone()) {
                        continue;
                    }
                    let Some(doc) = self.documents.get(&self.collection, &candidate_base).await? else {
                        continue;
                    };
                    ctx.similar.push(SimilarRef {
                        id: candidate_base,
                        offset: 0,
                        score: Some(1.0 - hit.distance),
                        date: doc.updated_at.clone(),
                        summary: doc.summary,
                    });
                    if ctx.similar.len() >= opts.similar_limit {
                        break;
                    }
                }
            }
        }

        if opts.include_meta {
            let sections = self.resolve_meta(id, opts.meta_limit).await?;
            ctx.meta = sections
                .into_iter()
                .map(|(name, items)| {
                    let refs = items
                        .into_iter()
                        .map(|i| MetaRef { id: i.id, summary: i.summary })
                        .collect();
                    (name, refs)
                })
                .collect();
        }

        if opts.include_parts {
            ctx.focus_part = item.tags.get("_focus_part").and_then(|v| v.parse().ok());
            ctx.parts = self
                .documents
                .list_parts(&self.collection, id)
                .await?
                .into_iter()
                .map(|p| PartRef { part_num: p.part_num, summary: p.summary, tags: p.tags })
                .collect();
        }

        if opts.include_versions {
            let max_version = self.documents.max_version(&self.collection, id).await?;
            let current = viewing_offset.max(0) as u64;

            if current < max_version || (current == 0 && max_version > 0) {
                if let Some(prev) = self
                    .documents
                    .get_version(&self.collection, id, current + 1)
                    .await?
                {
                    ctx.prev.push(VersionRef {
                        offset: (current + 1) as i64,
                        date: prev.created_at,
                        summary: prev.summary,
                    });
                }
            }
            if current >= 1 {
                if current == 1 {
                    if let Some(head) = self.documents.get(&self.collection, id).await? {
                        ctx.next.push(VersionRef { offset: 0, date: head.updated_at, summary: head.summary });
                    }
                } else if let Some(next) = self
                    .documents
                    .get_version(&self.collection, id, current - 1)
                    .await?
                {
                    ctx.next.push(VersionRef {
                        offset: (current - 1) as i64,
                        date: next.created_at,
                        summary: next.summary,
                    });
                }
            }
        }

        for edge in self.documents.get_inverse_edges(&self.collection, id).await? {
            ctx.inverses.entry(edge.inverse_verb).or_default().push(edge.source_id);
        }

        self.documents.touch(&self.collection, id).await?;
        Ok(Some(ctx))
    }
}

fn document_to_item(doc: &Document) -> Item {
    let mut item = Item::new(doc.id.clone(), doc.summary.clone());
    item.tags = doc.tags.clone();
    item
}

fn is_hidden(id: &str) -> bool {
    base_id(id).starts_with('.')
}

/// Parses the `@p{N}`/`@v{N}` numeric suffix off a sub-entry id.
fn suffix_num(id: &str) -> Option<u64> {
    let pos = id.rfind('@')?;
    let suffix = &id[pos + 1..];
    let rest = suffix.trim_start_matches(['p', 'P', 'v', 'V']);
    let rest = rest.trim_start_matches('{').trim_end_matches('}');
    rest.parse().ok()
}

fn fts_hits_to_candidates(hits: Vec<FtsHit>) -> Vec<Candidate> {
    let denom = hits.len().max(1) as f64;
    hits.into_iter()
        .enumerate()
        .map(|(idx, hit)| Candidate { id: hit.id, score: 1.0 - (idx as f64 / denom) })
        .collect()
}

/// Reciprocal rank fusion: `w_semantic=1, w_fts=2, k=60`, normalized so the
/// best possible combined score (rank 1 in both lists) approaches 1.0.
fn rrf_fuse(semantic: &[ScoredId], fts: &[FtsHit], weights: RrfWeights) -> Vec<Candidate> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for (idx, hit) in semantic.iter().enumerate() {
        let rank = (idx + 1) as f64;
        *scores.entry(hit.id.clone()).or_insert(0.0) += weights.w_semantic / (weights.k + rank);
    }
    for (idx, hit) in fts.iter().enumerate() {
        let rank = (idx + 1) as f64;
        *scores.entry(hit.id.clone()).or_insert(0.0) += weights.w_fts / (weights.k + rank);
    }
    let max_score = (weights.w_semantic + weights.w_fts) / (weights.k + 1.0);
    let mut candidates: Vec<Candidate> = scores
        .into_iter()
        .map(|(id, score)| Candidate { id, score: score / max_score })
        .collect();
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

/// Normalizes a since/until bound to `YYYY-MM-DD` so it compares directly
/// against `_updated_date`. Accepts an ISO-8601 duration (`P3D`, `P1W`,
/// `PT1H`, …) measured back from now, or an ISO date/datetime string with
/// its time/offset suffix stripped.
fn normalize_since_until(raw: &str) -> String {
    if raw.starts_with('P') {
        if let Some(duration) = parse_iso8601_duration(raw) {
            return (Utc::now() - duration).to_rfc3339()[0..10].to_string();
        }
    }
    raw.chars().take(10).collect()
}

fn parse_iso8601_duration(raw: &str) -> Option<chrono::Duration> {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(
            r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$",
        )
        .unwrap()
    });
    let caps = re.captures(raw)?;
    let group = |i: usize| caps.get(i).map(|m| m.as_str().parse::<i64>().unwrap_or(0)).unwrap_or(0);
    let years = group(1);
    let months = group(2);
    let weeks = group(3);
    let days = group(4);
    let hours = group(5);
    let minutes = group(6);
    let seconds: f64 = caps.get(7).and_then(|m| m.as_str().parse().ok()).unwrap_or(0.0);

    let total_days = years * 365 + months * 30 + weeks * 7 + days;
    Some(
        chrono::Duration::days(total_days)
            + chrono::Duration::hours(hours)
            + chrono::Duration::minutes(minutes)
            + chrono::Duration::seconds(seconds as i64),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parses_days_weeks_hours() {
        assert_eq!(parse_iso8601_duration("P3D").unwrap(), chrono::Duration::days(3));
        assert_eq!(parse_iso8601_duration("P1W").unwrap(), chrono::Duration::weeks(1));
        assert_eq!(parse_iso8601_duration("PT1H").unwrap(), chrono::Duration::hours(1));
    }

    #[test]
    fn rrf_fuse_prefers_items_ranked_best_in_both_lists() {
        let semantic = vec![
            ScoredId { id: "a".to_string(), distance: 0.1 },
            ScoredId { id: "b".to_string(), distance: 0.2 },
        ];
        let fts = vec![
            FtsHit {
                id: "a".to_string(),
                base_id: "a".to_string(),
                kind: crate::store::FtsKind::Head,
                summary: String::new(),
                rank: 0,
            },
            FtsHit {
                id: "c".to_string(),
                base_id: "c".to_string(),
                kind: crate::store::FtsKind::Head,
                summary: String::new(),
                rank: 1,
            },
        ];
        let fused = rrf_fuse(&semantic, &fts, RrfWeights::default());
        assert_eq!(fused[0].id, "a");
        assert!(fused[0].score > fused[1].score);
    }
}
