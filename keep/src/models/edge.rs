use serde::{Deserialize, Serialize};

/// A materialized directed relationship `(source, predicate, target)`.
/// Primary key is `(collection, source_id, predicate)` — at most one edge
/// per predicate per source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub collection: String,
    pub source_id: String,
    pub predicate: String,
    pub target_id: String,
    pub inverse_verb: String,
    pub created_at: String,
}

/// Derived view of a `.tag/{predicate}` document: makes `predicate` an
/// edge-tag when it carries `_inverse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tagdoc {
    pub collection: String,
    pub key: String,
    pub inverse: Option<String>,
    pub constrained: bool,
}

impl Tagdoc {
    pub fn doc_id(key: &str) -> String {
        format!(".tag/{}", key)
    }

    pub fn is_edge_tag(&self) -> bool {
        self.inverse.is_some()
    }
}
