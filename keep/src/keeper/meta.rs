use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::error::Result;
use crate::models::{is_system_tag, Item, Part};
use crate::store::EmbeddingKind;

use super::Keeper;

/// An ad-hoc resolution result: direct matches plus any part-level
/// candidates whose parent document wasn't itself a direct match.
struct MetaMatches {
    direct: Vec<Item>,
    provisional: Vec<Item>,
}

impl Keeper {
    /// Iterates every `.meta/*` document, parses its summary into a
    /// tag-query, and runs it against `anchor_id`'s own tags. Empty
    /// sections are omitted from the result.
    pub async fn resolve_meta(
        &self,
        anchor_id: &str,
        limit_per_doc: usize,
    ) -> Result<HashMap<String, Vec<Item>>> {
        let Some(anchor) = self.documents.get(&self.collection, anchor_id).await? else {
            return Ok(HashMap::new());
        };

        let meta_docs = self.documents.query_by_id_prefix(&self.collection, ".meta/").await?;
        let mut sections = HashMap::new();

        for meta_doc in meta_docs {
            let short_name = meta_doc
                .id
                .strip_prefix(".meta/")
                .unwrap_or(&meta_doc.id)
                .to_string();
            let (query_lines, context_keys, prereq_keys) = parse_meta_summary(&meta_doc.summary);
            if query_lines.is_empty() && context_keys.is_empty() {
                continue;
            }
            let matches = self
                .resolve_meta_queries(
                    anchor_id,
                    &anchor.tags,
                    &query_lines,
                    &context_keys,
                    &prereq_keys,
                    limit_per_doc,
                )
                .await?;
            if !matches.direct.is_empty() {
                sections.insert(short_name.clone(), matches.direct);
            }
            if !matches.provisional.is_empty() {
                sections.insert(format!("{short_name}/provisional"), matches.provisional);
            }
        }

        Ok(sections)
    }

    /// Same resolution logic as `resolve_meta`, for an ad-hoc query instead
    /// of a persistent `.meta/*` document.
    pub async fn resolve_inline_meta(
        &self,
        anchor_id: &str,
        queries: &[HashMap<String, String>],
        context_keys: &[String],
        prereq_keys: &[String],
        limit: usize,
    ) -> Result<Vec<Item>> {
        let Some(anchor) = self.documents.get(&self.collection, anchor_id).await? else {
            return Ok(Vec::new());
        };
        Ok(self
            .resolve_meta_queries(anchor_id, &anchor.tags, queries, context_keys, prereq_keys, limit)
            .await?
            .direct)
    }

    async fn resolve_meta_queries(
        &self,
        anchor_id: &str,
        anchor_tags: &HashMap<String, String>,
        query_lines: &[HashMap<String, String>],
        context_keys: &[String],
        prereq_keys: &[String],
        limit: usize,
    ) -> Result<MetaMatches> {
        if !prereq_keys.is_empty() && !prereq_keys.iter().all(|k| is_truthy(anchor_tags.get(k))) {
            return Ok(MetaMatches { direct: Vec::new(), provisional: Vec::new() });
        }

        let mut context_values: Vec<(String, String)> = Vec::new();
        for key in context_keys {
            if is_system_tag(key) {
                continue;
            }
            if let Some(value) = anchor_tags.get(key) {
                if !value.is_empty() {
                    context_values.push((key.clone(), value.clone()));
                }
            }
        }

        let expanded: Vec<HashMap<String, String>> = if !context_values.is_empty() && !query_lines.is_empty() {
            let mut out = Vec::new();
            for query in query_lines {
                for (ctx_key, ctx_val) in &context_values {
                    let mut merged = query.clone();
                    merged.insert(ctx_key.clone(), ctx_val.clone());
                    out.push(merged);
                }
            }
            out
        } else if !context_values.is_empty() {
            context_values
                .into_iter()
                .map(|(k, v)| HashMap::from([(k, v)]))
                .collect()
        } else {
            query_lines.to_vec()
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut matches: Vec<Item> = Vec::new();
        for query in &expanded {
            let items = self.list(query.clone(), 100).await?;
            for item in items {
                if item.id == anchor_id || !seen.insert(item.id.clone()) {
                    continue;
                }
                matches.push(item);
            }
        }

        let mut provisional_seen: HashSet<String> = HashSet::new();
        let mut provisional_candidates: Vec<Item> = Vec::new();
        for query in &expanded {
            for part in self.part_candidates_for_query(query).await? {
                let part_id = format!("{}@p{}", part.base_id, part.part_num);
                if part_id == anchor_id || seen.contains(&part.base_id) {
                    continue;
                }
                if !provisional_seen.insert(part_id.clone()) {
                    continue;
                }
                let mut item = Item::new(part_id, part.summary);
                item.tags = part.tags;
                provisional_candidates.push(item);
            }
        }

        if matches.is_empty() && provisional_candidates.is_empty() {
            return Ok(MetaMatches { direct: Vec::new(), provisional: Vec::new() });
        }

        let mut direct = if matches.is_empty() {
            Vec::new()
        } else {
            self.rank_by_relevance(anchor_id, matches).await?
        };
        direct.truncate(limit);

        let mut provisional = if provisional_candidates.is_empty() {
            Vec::new()
        } else {
            self.rank_by_relevance(anchor_id, provisional_candidates).await?
        };
        provisional.truncate(limit);

        Ok(MetaMatches { direct, provisional })
    }

    /// AND-intersects part candidates across every key/value pair in
    /// `query`, mirroring `candidate_ids_for_tags` but over the `parts`
    /// table instead of `documents`.
    async fn part_candidates_for_query(&self, query: &HashMap<String, String>) -> Result<Vec<Part>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut candidate: Option<HashMap<(String, u32), Part>> = None;
        for (key, value) in query {
            let parts = self.documents.query_parts_by_tag_key(&self.collection, key).await?;
            let matching: HashMap<(String, u32), Part> = parts
                .into_iter()
                .filter(|p| p.tags.get(key) == Some(value))
                .map(|p| ((p.base_id.clone(), p.part_num), p))
                .collect();
            candidate = Some(match candidate {
                Some(existing) => existing
                    .into_iter()
                    .filter(|(k, _)| matching.contains_key(k))
                    .collect(),
                None => matching,
            });
        }
        Ok(candidate.unwrap_or_default().into_values().collect())
    }

    /// Ranks candidates by cosine similarity to the anchor's stored
    /// embedding, scaled by recency decay; falls back to recency-only
    /// ordering when the anchor has no embedding.
    async fn rank_by_relevance(&self, anchor_id: &str, candidates: Vec<Item>) -> Result<Vec<Item>> {
        let anchor_vector = self
            .vectors
            .get_vector(EmbeddingKind::Document, &self.collection, anchor_id, None)
            .await?;

        let mut scored = Vec::with_capacity(candidates.len());
        for mut item in candidates {
            let sim = match &anchor_vector {
                Some(anchor_vec) => {
                    let candidate_vec = self
                        .vectors
                        .get_vector(EmbeddingKind::Document, &self.collection, &item.id, None)
                        .await?;
                    candidate_vec
                        .map(|v| cosine_similarity(anchor_vec, &v))
                        .unwrap_or(0.0)
                }
                None => 1.0,
            };
            item.score = Some(sim);
            scored.push(item);
        }

        let mut decayed = self.apply_recency(scored);
        decayed.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(decayed)
    }

    fn apply_recency(&self, mut items: Vec<Item>) -> Vec<Item> {
        let half_life = self.config.memory.recency_half_life_days;
        if half_life <= 0.0 {
            return items;
        }
        let now = Utc::now();
        for item in &mut items {
            if let Some(updated) = item.tags.get("_updated") {
                if let Ok(updated_at) = chrono::DateTime::parse_from_rfc3339(updated) {
                    let days_elapsed = (now - updated_at.with_timezone(&Utc)).num_seconds() as f64 / 86400.0;
                    let decay = 0.5_f64.powf(days_elapsed.max(0.0) / half_life);
                    item.score = Some(item.score.unwrap_or(1.0) * decay);
                }
            }
        }
        items
    }
}

fn is_truthy(value: Option<&String>) -> bool {
    value.map(|v| !v.is_empty()).unwrap_or(false)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses a `.meta/*` document summary into `(query_lines, context_keys,
/// prereq_keys)`. Each line is one of: `key=*` (prerequisite), `key=` (bare
/// context match), or a space-separated run of `key=value` pairs (one AND
/// query); a line mixing either form with plain text is ignored.
fn parse_meta_summary(content: &str) -> (Vec<HashMap<String, String>>, Vec<String>, Vec<String>) {
    let mut query_lines = Vec::new();
    let mut context_keys = Vec::new();
    let mut prereq_keys = Vec::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(key) = line.strip_suffix("=*") {
            if is_identifier(key) {
                prereq_keys.push(key.to_string());
                continue;
            }
        }

        if let Some(key) = line.strip_suffix('=') {
            if is_identifier(key) {
                context_keys.push(key.to_string());
                continue;
            }
        }

        let mut pairs = HashMap::new();
        let mut is_query = true;
        for token in line.split_whitespace() {
            match token.split_once('=') {
                Some((k, v)) if is_identifier(k) && !v.is_empty() => {
                    pairs.insert(k.to_string(), v.to_string());
                }
                _ => {
                    is_query = false;
                    break;
                }
            }
        }
        if is_query && !pairs.is_empty() {
            query_lines.push(pairs);
        }
    }

    (query_lines, context_keys, prereq_keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prereq_context_and_query_lines() {
        let (queries, context, prereq) = parse_meta_summary(
            "status=open\nproject=\nurgent=*\nstatus=open priority=high",
        );
        assert_eq!(prereq, vec!["urgent".to_string()]);
        assert_eq!(context, vec!["project".to_string()]);
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].get("priority").map(String::as_str), Some("high"));
    }

    #[test]
    fn ignores_lines_that_are_not_pure_key_value() {
        let (queries, context, prereq) = parse_meta_summary("this is freeform text\nstatus=open");
        assert!(context.is_empty());
        assert!(prereq.is_empty());
        assert_eq!(queries.len(), 1);
    }
}
