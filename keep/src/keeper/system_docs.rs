use std::collections::HashMap;

use chrono::Utc;
use rust_embed::RustEmbed;

use crate::error::Result;

use super::write::content_hash_full;
use super::Keeper;

#[derive(RustEmbed)]
#[folder = "system_docs"]
struct SystemDocAssets;

struct SystemDocSpec {
    id: &'static str,
    file: &'static str,
    category_tags: &'static [(&'static str, &'static str)],
}

/// Stable ids for bundled reference documents. A reduced subset — tag-act/
/// tag-status sub-values and the prompt templates are left for a future
/// bundle rather than carried here as placeholder content.
const SYSTEM_DOC_SPECS: &[SystemDocSpec] = &[
    SystemDocSpec { id: ".now", file: "now.md", category_tags: &[] },
    SystemDocSpec {
        id: ".tag/act",
        file: "tag-act.md",
        category_tags: &[("_inverse", "performed_by")],
    },
    SystemDocSpec { id: ".tag/status", file: "tag-status.md", category_tags: &[] },
    SystemDocSpec { id: ".meta/todo", file: "meta-todo.md", category_tags: &[] },
];

/// Outcome counts for one migration pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationStats {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
}

/// Short change-detection hash: last 10 hex chars of the content's SHA-256,
/// matching the upstream store's `bundled_hash` convention.
fn bundled_hash(content: &str) -> String {
    let full = content_hash_full(content);
    full.chars().skip(full.len().saturating_sub(10)).collect()
}

impl Keeper {
    /// Loads every bundled reference document that doesn't already exist,
    /// and refreshes any whose bundled content changed since it was last
    /// written here. A document the user has since edited (its stored
    /// `content_hash` no longer matches the `bundled_hash` tag it was
    /// created with) is left alone rather than overwritten.
    ///
    /// Unlike the upstream implementation this has no legacy ids to
    /// rename — `_system:`/`_tag:`/`_now:`/`_text:` prefixes and the
    /// ChromaDB-embedding transfer they required only exist for stores
    /// that predate the current id scheme, which a fresh collection
    /// never does.
    pub(crate) async fn migrate_system_documents(&self) -> Result<MigrationStats> {
        let mut stats = MigrationStats::default();

        for spec in SYSTEM_DOC_SPECS {
            let Some(asset) = SystemDocAssets::get(spec.file) else {
                tracing::warn!(file = spec.file, "bundled system doc missing from binary");
                continue;
            };
            let content = String::from_utf8_lossy(&asset.data).into_owned();
            let hash = bundled_hash(&content);

            let existing = self.documents.get(&self.collection, spec.id).await?;
            if let Some(existing) = &existing {
                if existing.tags.get("bundled_hash") == Some(&hash) {
                    continue;
                }
                if let Some(prev_hash) = existing.tags.get("bundled_hash") {
                    if &existing.content_hash != prev_hash {
                        stats.skipped += 1;
                        continue;
                    }
                }
            }

            let mut tags: HashMap<String, String> = spec
                .category_tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            tags.insert("category".to_string(), "system".to_string());
            tags.insert("bundled_hash".to_string(), hash.clone());
            let now = Utc::now().to_rfc3339();
            tags.insert("_updated".to_string(), now.clone());
            tags.insert("_updated_date".to_string(), now[..10].to_string());
            tags.insert("_source".to_string(), "inline".to_string());
            if existing.is_none() {
                tags.insert("_created".to_string(), now);
            }

            let full_hash = content_hash_full(&content);
            self.documents
                .upsert(&self.collection, spec.id, &content, &tags, &hash, &full_hash, None)
                .await?;

            if self.embeddings.is_some() {
                let _ = self
                    .queue
                    .enqueue(spec.id, &self.collection, "reindex", &content, HashMap::new())
                    .await;
            }

            if existing.is_some() {
                stats.updated += 1;
            } else {
                stats.created += 1;
            }
        }

        Ok(stats)
    }
}
