use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Read-only snapshot returned by `find`/`get`/`list`. Timestamps and other
/// system metadata live in `tags`, not as explicit fields (original_source
/// `types.py::Item`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    pub summary: String,
    pub tags: HashMap<String, String>,
    pub score: Option<f64>,
    pub changed: Option<bool>,
}

impl Item {
    pub fn new(id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
            tags: HashMap::new(),
            score: None,
            changed: None,
        }
    }

    pub fn created(&self) -> Option<&str> {
        self.tags.get("_created").map(String::as_str)
    }

    pub fn updated(&self) -> Option<&str> {
        self.tags.get("_updated").map(String::as_str)
    }

    pub fn accessed(&self) -> Option<&str> {
        self.tags.get("_accessed").map(String::as_str)
    }
}

/// A similar-item reference for `ItemContext::similar`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarRef {
    pub id: String,
    pub offset: i64,
    pub score: Option<f64>,
    pub date: String,
    pub summary: String,
}

/// A meta-doc reference for `ItemContext::meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaRef {
    pub id: String,
    pub summary: String,
}

/// A version reference for navigation; offset 0 = current, 1 = previous
/// archived, 2 = two archived back, etc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRef {
    pub offset: i64,
    pub date: String,
    pub summary: String,
}

/// A part reference for the part manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRef {
    pub part_num: u32,
    pub summary: String,
    pub tags: HashMap<String, String>,
}

/// Complete display context for a single item, assembled by
/// `Keeper::get_context`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemContext {
    pub item: Item,
    pub viewing_offset: i64,
    pub similar: Vec<SimilarRef>,
    pub meta: HashMap<String, Vec<MetaRef>>,
    pub parts: Vec<PartRef>,
    pub focus_part: Option<u32>,
    pub expand_parts: bool,
    pub prev: Vec<VersionRef>,
    pub next: Vec<VersionRef>,
    /// Inverse edges targeting this item, grouped by inverse verb.
    pub inverses: HashMap<String, Vec<String>>,
}

impl ItemContext {
    pub fn new(item: Item) -> Self {
        Self {
            item,
            viewing_offset: 0,
            similar: Vec::new(),
            meta: HashMap::new(),
            parts: Vec::new(),
            focus_part: None,
            expand_parts: false,
            prev: Vec::new(),
            next: Vec::new(),
            inverses: HashMap::new(),
        }
    }
}
