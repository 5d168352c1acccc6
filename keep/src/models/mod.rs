mod document;
mod edge;
mod item;
mod queue;
mod search;

pub use document::{base_id, is_part_id, is_version_id, Document, Part, Version};
pub use edge::{Edge, Tagdoc};
pub use item::{Item, ItemContext, MetaRef, PartRef, SimilarRef, VersionRef};
pub use queue::{FailedTask, PendingTask, TaskStatus};
pub use search::{DeepGroups, FindRequest, RrfWeights};

/// Tag keys the system manages; never user-writable directly.
pub const SYSTEM_TAG_PREFIX: char = '_';

/// Tags kept for index efficiency but stripped before display.
pub const INTERNAL_TAGS: &[&str] = &["_updated_date", "_accessed_date", "_focus_part"];

pub fn is_system_tag(key: &str) -> bool {
    key.starts_with(SYSTEM_TAG_PREFIX)
}

/// Casefold tag keys (not values) for case-insensitive lookup. System tags
/// are left untouched so `_version`, `_focus_part` etc. stay exact.
pub fn casefold_tags(
    tags: &std::collections::HashMap<String, String>,
) -> std::collections::HashMap<String, String> {
    tags.iter()
        .map(|(k, v)| {
            let key = if is_system_tag(k) {
                k.clone()
            } else {
                k.to_lowercase()
            };
            (key, v.clone())
        })
        .collect()
}

/// Casefold both keys and values, for VectorStore's case-insensitive
/// prefilter index. Canonical-case tags still live in DocumentStore.
pub fn casefold_tags_for_index(
    tags: &std::collections::HashMap<String, String>,
) -> std::collections::HashMap<String, String> {
    tags.iter()
        .map(|(k, v)| {
            if is_system_tag(k) {
                (k.clone(), v.clone())
            } else {
                (k.to_lowercase(), v.to_lowercase())
            }
        })
        .collect()
}

pub fn filter_non_system_tags(
    tags: &std::collections::HashMap<String, String>,
) -> std::collections::HashMap<String, String> {
    tags.iter()
        .filter(|(k, _)| !is_system_tag(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn casefold_preserves_system_tags() {
        let mut tags = HashMap::new();
        tags.insert("Artist".to_string(), "AC/DC".to_string());
        tags.insert("_version".to_string(), "3".to_string());
        let folded = casefold_tags(&tags);
        assert_eq!(folded.get("artist"), Some(&"AC/DC".to_string()));
        assert_eq!(folded.get("_version"), Some(&"3".to_string()));
    }

    #[test]
    fn filter_strips_system_tags_only() {
        let mut tags = HashMap::new();
        tags.insert("project".to_string(), "keep".to_string());
        tags.insert("_created".to_string(), "2024-01-01T00:00:00".to_string());
        let filtered = filter_non_system_tags(&tags);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("project"));
    }
}
