use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::Result;
use crate::models::{base_id, filter_non_system_tags, is_part_id, is_version_id, DeepGroups, Document, FindRequest, Item, RrfWeights};
use crate::store::{EmbeddingKind, FtsHit, ScoredId};

use super::Keeper;

struct FusedId {
    id: String,
    score: f64,
}

impl Keeper {
    /// Augments an already-ranked `find` result with edge- or tag-following
    /// groups. Silently returns nothing for pure-FTS queries and for
    /// `similar_to` queries with no embedding provider.
    pub(crate) async fn deep_search(&self, items: &[Item], req: &FindRequest) -> Result<DeepGroups> {
        if req.fulltext {
            return Ok(DeepGroups::default());
        }
        let query = match (&req.query, &req.similar_to) {
            (Some(q), _) => q.clone(),
            (None, Some(_)) if self.embeddings.is_none() => return Ok(DeepGroups::default()),
            (None, Some(similar_to)) => similar_to.clone(),
            (None, None) => return Ok(DeepGroups::default()),
        };

        if self.documents.has_edges(&self.collection).await? {
            self.deep_search_edges(items, &query).await
        } else {
            self.deep_search_tags(items).await
        }
    }

    async fn deep_search_edges(&self, items: &[Item], query: &str) -> Result<DeepGroups> {
        let tokens = tokenize_query(query);
        let lower_tokens: HashSet<String> = tokens.iter().map(|t| t.to_lowercase()).collect();

        let edge_target_ids = self.documents.find_edge_targets(&self.collection, query).await?;
        let mut primaries: Vec<Item> = items.to_vec();
        let mut primary_ids: HashSet<String> = primaries.iter().map(|i| i.id.clone()).collect();

        for target_id in edge_target_ids {
            if !lower_tokens.contains(&target_id.to_lowercase()) {
                continue;
            }
            if primary_ids.insert(target_id.clone()) {
                if let Some(doc) = self.documents.get(&self.collection, &target_id).await? {
                    let mut item = document_to_item(&doc);
                    item.score = Some(1.0);
                    primaries.push(item);
                }
            }
        }

        let entity_names: Vec<String> = primaries.iter().map(|i| i.id.clone()).collect();
        let mut groups: HashMap<String, Vec<Item>> = HashMap::new();

        for primary in &primaries {
            let mut candidate_ids: HashSet<String> = HashSet::new();
            for edge in self.documents.get_inverse_edges(&self.collection, &primary.id).await? {
                candidate_ids.insert(edge.source_id.clone());
                for two_hop in self.documents.get_inverse_edges(&self.collection, &edge.source_id).await? {
                    candidate_ids.insert(two_hop.source_id);
                }
            }
            if candidate_ids.is_empty() {
                continue;
            }
            let ids: Vec<String> = candidate_ids.into_iter().collect();

            let stripped_query = strip_entity_tokens(query, &entity_names);
            let fts_hits: Vec<FtsHit> = if stripped_query.trim().is_empty() {
                Vec::new()
            } else {
                self.documents
                    .query_fts_scoped(&self.collection, &stripped_query, &ids)
                    .await?
            };

            let embedding_hits: Vec<ScoredId> = if let Some(provider) = &self.embeddings {
                let vector = provider.embed_query(query).await?;
                self.vectors
                    .search_scoped(EmbeddingKind::Document, &self.collection, &vector, &ids)
                    .await?
            } else {
                Vec::new()
            };

            let fused = rrf_fuse_simple(&embedding_hits, &fts_hits, RrfWeights::default());

            let mut group_items = Vec::new();
            for candidate in fused {
                let candidate_base = base_id(&candidate.id).to_string();
                if primary_ids.contains(&candidate_base) {
                    continue;
                }
                let Some(doc) = self.documents.get(&self.collection, &candidate_base).await? else {
                    continue;
                };
                let mut item = document_to_item(&doc);
                item.score = Some(candidate.score);
                item.tags.insert("_anchor_type".to_string(), anchor_type(&candidate.id).to_string());
                item.tags.insert("_anchor_id".to_string(), primary.id.clone());
                item.tags.insert("_lane".to_string(), "authoritative".to_string());
                group_items.push(item);
            }
            if !group_items.is_empty() {
                groups.insert(primary.id.clone(), group_items);
            }
        }

        Ok(DeepGroups { primaries, groups })
    }

    /// IDF-weighted co-tag fallback for collections with no edges yet.
    async fn deep_search_tags(&self, items: &[Item]) -> Result<DeepGroups> {
        let total_docs = self.documents.count(&self.collection).await?.max(1) as f64;
        let primary_ids: HashSet<String> = items.iter().map(|i| i.id.clone()).collect();

        let mut candidate_weight: HashMap<String, HashMap<String, f64>> = HashMap::new();

        for primary in items {
            for (key, value) in filter_non_system_tags(&primary.tags) {
                let matches = self
                    .documents
                    .query_by_tag_key(&self.collection, &key, None, None)
                    .await?;
                let df = matches.len().max(1) as f64;
                let idf = ((total_docs + 1.0) / (df + 1.0)).ln();
                for doc in matches {
                    if primary_ids.contains(&doc.id) || doc.id == primary.id {
                        continue;
                    }
                    let matches_value = doc
                        .tags
                        .get(&key)
                        .map(|v| v.eq_ignore_ascii_case(&value))
                        .unwrap_or(false);
                    if !matches_value {
                        continue;
                    }
                    *candidate_weight
                        .entry(doc.id.clone())
                        .or_default()
                        .entry(primary.id.clone())
                        .or_insert(0.0) += idf;
                }
            }
        }

        let mut groups: HashMap<String, Vec<Item>> = HashMap::new();
        for (candidate_id, per_primary) in candidate_weight {
            let Some((best_primary, &best_weight)) = per_primary
                .iter()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            else {
                continue;
            };
            let Some(doc) = self.documents.get(&self.collection, &candidate_id).await? else {
                continue;
            };
            let mut item = document_to_item(&doc);
            item.score = Some(best_weight);
            groups.entry(best_primary.clone()).or_default().push(item);
        }

        for group in groups.values_mut() {
            group.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        }

        Ok(DeepGroups { primaries: items.to_vec(), groups })
    }
}

fn document_to_item(doc: &Document) -> Item {
    let mut item = Item::new(doc.id.clone(), doc.summary.clone());
    item.tags = doc.tags.clone();
    item
}

fn anchor_type(id: &str) -> &'static str {
    if is_part_id(id) {
        "part"
    } else if is_version_id(id) {
        "version"
    } else {
        "head"
    }
}

/// Splits a query into alphanumeric-run tokens and standalone punctuation
/// runs, so a trailing `?` or `,` never glues onto the preceding word.
fn tokenize_query(query: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+|[^\s\p{L}\p{N}]+").unwrap());
    re.find_iter(query).map(|m| m.as_str().to_string()).collect()
}

/// Removes each entity name (as a phrase, then token-by-token) from `query`,
/// leaving the residual full-text query.
fn strip_entity_tokens(query: &str, entities: &[String]) -> String {
    let mut residual = query.to_string();
    for entity in entities {
        residual = residual.replace(entity.as_str(), " ");
    }
    let entity_tokens: HashSet<String> = entities
        .iter()
        .flat_map(|e| tokenize_query(e))
        .map(|t| t.to_lowercase())
        .collect();

    tokenize_query(&residual)
        .into_iter()
        .filter(|t| t.chars().any(|c| c.is_alphanumeric()))
        .filter(|t| !entity_tokens.contains(&t.to_lowercase()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn rrf_fuse_simple(semantic: &[ScoredId], fts: &[FtsHit], weights: RrfWeights) -> Vec<FusedId> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for (idx, hit) in semantic.iter().enumerate() {
        let rank = (idx + 1) as f64;
        *scores.entry(hit.id.clone()).or_insert(0.0) += weights.w_semantic / (weights.k + rank);
    }
    for (idx, hit) in fts.iter().enumerate() {
        let rank = (idx + 1) as f64;
        *scores.entry(hit.id.clone()).or_insert(0.0) += weights.w_fts / (weights.k + rank);
    }
    let mut fused: Vec<FusedId> = scores.into_iter().map(|(id, score)| FusedId { id, score }).collect();
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_trailing_punctuation() {
        let tokens = tokenize_query("How many hikes has Melanie been on?");
        assert_eq!(tokens.last().map(String::as_str), Some("?"));
        assert!(tokens.iter().any(|t| t == "Melanie"));
    }

    #[test]
    fn strip_entity_tokens_removes_phrase_and_words() {
        let stripped = strip_entity_tokens(
            "How many hikes has Melanie been on?",
            &["Melanie".to_string()],
        );
        assert!(!stripped.to_lowercase().contains("melanie"));
        assert!(stripped.to_lowercase().contains("hikes"));
    }
}
