use super::Item;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parameters for `Keeper::find`.
#[derive(Debug, Clone, Default)]
pub struct FindRequest {
    pub query: Option<String>,
    pub similar_to: Option<String>,
    pub tags: HashMap<String, String>,
    pub fulltext: bool,
    pub deep: bool,
    pub include_self: bool,
    pub include_hidden: bool,
    pub limit: usize,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl FindRequest {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }
}

/// RRF fusion weights: defaults to `w_semantic=1, w_fts=2, k=60`.
#[derive(Debug, Clone, Copy)]
pub struct RrfWeights {
    pub w_semantic: f64,
    pub w_fts: f64,
    pub k: f64,
}

impl Default for RrfWeights {
    fn default() -> Self {
        Self {
            w_semantic: 1.0,
            w_fts: 2.0,
            k: 60.0,
        }
    }
}

/// Output of a deep-search pass: primaries plus per-primary grouped items,
/// exposed as both shapes rather than a single flat ranked list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepGroups {
    pub primaries: Vec<Item>,
    pub groups: HashMap<String, Vec<Item>>,
}
