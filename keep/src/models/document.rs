use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical document row. Head state; prior states live as `Version` rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub summary: String,
    pub tags: HashMap<String, String>,
    pub content_hash: String,
    pub content_hash_full: String,
    pub created_at: String,
    pub updated_at: String,
    pub accessed_at: Option<String>,
}

/// An archived prior head state, addressed as `{id}@v{N}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub collection: String,
    pub base_id: String,
    pub version: u64,
    pub summary: String,
    pub tags: HashMap<String, String>,
    pub content_hash: String,
    pub content_hash_full: String,
    pub created_at: String,
}

/// An analyzer-produced, content-immutable subunit, addressed as `{id}@p{N}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub collection: String,
    pub base_id: String,
    pub part_num: u32,
    pub summary: String,
    pub tags: HashMap<String, String>,
    pub content: String,
    pub created_at: String,
}

impl Document {
    pub fn part_id(&self, part_num: u32) -> String {
        format!("{}@p{}", self.id, part_num)
    }

    pub fn version_id(&self, version: u64) -> String {
        format!("{}@v{}", self.id, version)
    }
}

/// True if `id` looks like `doc@p3` or `doc@P{3}` — a part sub-entry.
pub fn is_part_id(id: &str) -> bool {
    part_id_re().is_match(id)
}

/// True if `id` looks like `doc@v3` or `doc@V{3}` — a version sub-entry.
pub fn is_version_id(id: &str) -> bool {
    version_id_re().is_match(id)
}

/// Strip a trailing `@p{N}`/`@v{N}` suffix, returning the base document id.
pub fn base_id(id: &str) -> &str {
    if let Some(pos) = id.rfind('@') {
        let suffix = &id[pos + 1..];
        let rest = suffix.trim_start_matches(['p', 'P', 'v', 'V']);
        let rest = rest.trim_start_matches('{').trim_end_matches('}');
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
            return &id[..pos];
        }
    }
    id
}

fn part_id_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"@[pP]\{?\d+\}?$").unwrap())
}

fn version_id_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"@[vV]\{?\d+\}?$").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_and_version_id_detection() {
        assert!(is_part_id("doc@p3"));
        assert!(is_part_id("doc@P{3}"));
        assert!(!is_part_id("doc@v3"));
        assert!(is_version_id("doc@v12"));
        assert!(!is_version_id("plain-id"));
    }

    #[test]
    fn base_id_strips_sub_entry_suffix() {
        assert_eq!(base_id("doc@p3"), "doc");
        assert_eq!(base_id("doc@v12"), "doc");
        assert_eq!(base_id("doc"), "doc");
        assert_eq!(base_id("user@example.com"), "user@example.com");
    }
}
