use async_trait::async_trait;
use chrono::Utc;
use libsql::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{KeepError, Result};
use crate::models::{is_system_tag, Document, Edge, Part, Version};

use super::connection::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Updated,
    Accessed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u64,
    pub summary: String,
    pub tags: HashMap<String, String>,
    pub content_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ExtractResult {
    pub extracted: Vec<VersionInfo>,
    pub new_source_head: Option<Document>,
    pub base_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInput {
    pub part_num: u32,
    pub summary: String,
    pub tags: HashMap<String, String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDocument {
    pub id: String,
    pub summary: String,
    pub tags: HashMap<String, String>,
    pub content_hash: String,
    pub content_hash_full: String,
    pub created_at: String,
    pub updated_at: String,
    pub accessed_at: Option<String>,
    #[serde(default)]
    pub versions: Vec<VersionInfo>,
    #[serde(default)]
    pub parts: Vec<PartInput>,
}

/// A full-text hit across heads, parts, and versions, scored together —
/// `rank` 0 is best.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub id: String,
    pub base_id: String,
    pub kind: FtsKind,
    pub summary: String,
    pub rank: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsKind {
    Head,
    Part,
    Version,
}

impl FtsKind {
    fn as_str(&self) -> &'static str {
        match self {
            FtsKind::Head => "head",
            FtsKind::Part => "part",
            FtsKind::Version => "version",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "part" => FtsKind::Part,
            "version" => FtsKind::Version,
            _ => FtsKind::Head,
        }
    }
}

/// Canonical document/version/part/edge metadata store plus the unified
/// full-text index, backed by libsql. A trait rather than a bare struct so
/// tests and the Keeper can depend on an interface rather than a concrete
/// backend.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        summary: &str,
        tags: &HashMap<String, String>,
        content_hash: &str,
        content_hash_full: &str,
        created_at: Option<&str>,
    ) -> Result<(Document, bool)>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;
    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<Document>>;
    async fn exists(&self, collection: &str, id: &str) -> Result<bool>;
    async fn list_ids(&self, collection: &str) -> Result<Vec<String>>;
    async fn list_recent(
        &self,
        collection: &str,
        order_by: OrderBy,
        limit: usize,
    ) -> Result<Vec<Document>>;
    async fn count(&self, collection: &str) -> Result<u64>;

    async fn get_version(&self, collection: &str, id: &str, offset: u64) -> Result<Option<Version>>;
    async fn list_versions(&self, collection: &str, id: &str) -> Result<Vec<Version>>;
    async fn version_count(&self, collection: &str, id: &str) -> Result<u64>;
    async fn max_version(&self, collection: &str, id: &str) -> Result<u64>;
    async fn count_versions_from(&self, collection: &str, id: &str, from_version: u64) -> Result<u64>;
    async fn restore_latest_version(&self, collection: &str, id: &str) -> Result<Option<Document>>;
    async fn extract_versions(
        &self,
        collection: &str,
        source_id: &str,
        target_id: &str,
        tag_filter: Option<&HashMap<String, String>>,
        only_current: bool,
    ) -> Result<ExtractResult>;

    async fn delete(&self, collection: &str, id: &str, delete_versions: bool) -> Result<bool>;
    async fn delete_parts(&self, collection: &str, base_id: &str) -> Result<()>;
    async fn delete_collection_all(&self, collection: &str) -> Result<()>;
    async fn import_batch(&self, collection: &str, docs: Vec<ImportDocument>) -> Result<()>;

    async fn query_by_tag_key(
        &self,
        collection: &str,
        key: &str,
        since: Option<&str>,
        until: Option<&str>,
    ) -> Result<Vec<Document>>;
    async fn list_distinct_tag_keys(&self, collection: &str) -> Result<Vec<String>>;
    async fn list_distinct_tag_values(&self, collection: &str, key: &str) -> Result<Vec<String>>;
    async fn query_by_id_prefix(&self, collection: &str, prefix: &str) -> Result<Vec<Document>>;
    async fn find_by_content_hash(&self, collection: &str, content_hash: &str) -> Result<Vec<Document>>;

    async fn upsert_parts(&self, collection: &str, base_id: &str, parts: Vec<PartInput>) -> Result<()>;
    async fn list_parts(&self, collection: &str, base_id: &str) -> Result<Vec<Part>>;
    async fn get_part(&self, collection: &str, base_id: &str, part_num: u32) -> Result<Option<Part>>;
    async fn part_count(&self, collection: &str, base_id: &str) -> Result<u64>;
    async fn query_parts_by_tag_key(&self, collection: &str, key: &str) -> Result<Vec<Part>>;
    async fn update_part_tags(
        &self,
        collection: &str,
        base_id: &str,
        part_num: u32,
        tags: &HashMap<String, String>,
    ) -> Result<()>;

    async fn upsert_edge(&self, edge: &Edge) -> Result<()>;
    async fn get_inverse_edges(&self, collection: &str, target: &str) -> Result<Vec<Edge>>;
    async fn delete_edges_for_source(&self, collection: &str, source_id: &str) -> Result<()>;
    async fn delete_edges_for_target(&self, collection: &str, target_id: &str) -> Result<()>;
    async fn delete_edges_for_predicate(
        &self,
        collection: &str,
        source_id: &str,
        predicate: &str,
    ) -> Result<()>;
    async fn has_edges(&self, collection: &str) -> Result<bool>;
    async fn get_inverse_version_edges(&self, collection: &str, target: &str) -> Result<Vec<Edge>>;
    async fn find_edge_targets(&self, collection: &str, text: &str) -> Result<Vec<String>>;

    async fn upsert_backfill(&self, collection: &str, predicate: &str, inverse: &str) -> Result<()>;
    async fn backfill_exists(&self, collection: &str, predicate: &str) -> Result<bool>;
    async fn get_backfill_status(&self, collection: &str, predicate: &str) -> Result<Option<String>>;
    async fn delete_backfill(&self, collection: &str, predicate: &str) -> Result<()>;

    async fn query_fts(&self, collection: &str, q: &str, limit: usize) -> Result<Vec<FtsHit>>;
    async fn query_fts_scoped(
        &self,
        collection: &str,
        q: &str,
        allowed_ids: &[String],
    ) -> Result<Vec<FtsHit>>;

    async fn touch(&self, collection: &str, id: &str) -> Result<()>;
    async fn touch_many(&self, collection: &str, ids: &[String]) -> Result<()>;
}

pub struct LibsqlDocumentStore {
    db: Database,
}

impl LibsqlDocumentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<Connection> {
        self.db.connect()
    }

    fn row_to_document(row: &libsql::Row) -> Result<Document> {
        let tags_json: String = row.get(3)?;
        Ok(Document {
            collection: row.get(0)?,
            id: row.get(1)?,
            summary: row.get(2)?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            content_hash: row.get(4)?,
            content_hash_full: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            accessed_at: row.get(8)?,
        })
    }

    fn row_to_version(row: &libsql::Row) -> Result<Version> {
        let tags_json: String = row.get(4)?;
        Ok(Version {
            collection: row.get(0)?,
            base_id: row.get(1)?,
            version: row.get::<i64>(2)? as u64,
            summary: row.get(3)?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            content_hash: row.get(5)?,
            content_hash_full: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn row_to_part(row: &libsql::Row) -> Result<Part> {
        let tags_json: String = row.get(4)?;
        Ok(Part {
            collection: row.get(0)?,
            base_id: row.get(1)?,
            part_num: row.get::<i64>(2)? as u32,
            summary: row.get(3)?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            content: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn row_to_edge(row: &libsql::Row) -> Result<Edge> {
        Ok(Edge {
            collection: row.get(0)?,
            source_id: row.get(1)?,
            predicate: row.get(2)?,
            target_id: row.get(3)?,
            inverse_verb: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    async fn index_fts(
        conn: &Connection,
        collection: &str,
        id: &str,
        base_id: &str,
        kind: FtsKind,
        summary: &str,
    ) -> Result<()> {
        conn.execute(
            "DELETE FROM content_fts WHERE collection = ?1 AND id = ?2 AND kind = ?3",
            params![collection, id, kind.as_str()],
        )
        .await?;
        conn.execute(
            "INSERT INTO content_fts (collection, id, base_id, kind, summary) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![collection, id, base_id, kind.as_str(), summary],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for LibsqlDocumentStore {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        summary: &str,
        tags: &HashMap<String, String>,
        content_hash: &str,
        content_hash_full: &str,
        created_at: Option<&str>,
    ) -> Result<(Document, bool)> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let existing = self.get(collection, id).await?;

        // No-op short-circuit: unchanged hash and unchanged user tags.
        if let Some(ref existing) = existing {
            let user_tags_unchanged = crate::models::filter_non_system_tags(tags)
                == crate::models::filter_non_system_tags(&existing.tags);
            if existing.content_hash == content_hash && user_tags_unchanged {
                return Ok((existing.clone(), false));
            }
        }

        let mut merged_tags = tags.clone();
        let created = existing
            .as_ref()
            .map(|d| d.created_at.clone())
            .or_else(|| created_at.map(str::to_string))
            .unwrap_or_else(|| now.clone());

        merged_tags.insert("_created".to_string(), created.clone());
        merged_tags.insert("_updated".to_string(), now.clone());
        merged_tags.insert(
            "_updated_date".to_string(),
            now.get(0..10).unwrap_or(&now).to_string(),
        );
        merged_tags.insert("_accessed".to_string(), now.clone());
        merged_tags.insert(
            "_accessed_date".to_string(),
            now.get(0..10).unwrap_or(&now).to_string(),
        );

        let content_changed = existing
            .as_ref()
            .map(|d| d.content_hash != content_hash)
            .unwrap_or(false);

        if let Some(ref existing) = existing {
            if content_changed {
                let next_version = self.max_version(collection, id).await?.saturating_add(1);
                conn.execute(
                    r#"
                    INSERT INTO versions (collection, base_id, version, summary, tags, content_hash, content_hash_full, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        collection,
                        id,
                        next_version as i64,
                        existing.summary.clone(),
                        serde_json::to_string(&existing.tags)?,
                        existing.content_hash.clone(),
                        existing.content_hash_full.clone(),
                        existing.updated_at.clone(),
                    ],
                )
                .await?;
                Self::index_fts(
                    &conn,
                    collection,
                    &format!("{id}@v{next_version}"),
                    id,
                    FtsKind::Version,
                    &existing.summary,
                )
                .await?;
            }
        }

        conn.execute(
            r#"
            INSERT INTO documents (collection, id, summary, tags, content_hash, content_hash_full, created_at, updated_at, accessed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(collection, id) DO UPDATE SET
                summary = excluded.summary,
                tags = excluded.tags,
                content_hash = excluded.content_hash,
                content_hash_full = excluded.content_hash_full,
                updated_at = excluded.updated_at,
                accessed_at = excluded.accessed_at
            "#,
            params![
                collection,
                id,
                summary,
                serde_json::to_string(&merged_tags)?,
                content_hash,
                content_hash_full,
                created,
                now.clone(),
                now.clone(),
            ],
        )
        .await?;

        Self::index_fts(&conn, collection, id, id, FtsKind::Head, summary).await?;

        let doc = self
            .get(collection, id)
            .await?
            .ok_or_else(|| KeepError::Corruption(format!("document {id} vanished after upsert")))?;

        Ok((doc, content_changed))
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT collection, id, summary, tags, content_hash, content_hash_full, created_at, updated_at, accessed_at FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_document(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders: Vec<String> = (2..=ids.len() + 1).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT collection, id, summary, tags, content_hash, content_hash_full, created_at, updated_at, accessed_at FROM documents WHERE collection = ?1 AND id IN ({})",
            placeholders.join(", ")
        );
        let mut bind: Vec<libsql::Value> = vec![libsql::Value::from(collection.to_string())];
        bind.extend(ids.iter().map(|id| libsql::Value::from(id.clone())));
        let mut rows = conn.query(&sql, libsql::params_from_iter(bind)).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::row_to_document(&row)?);
        }
        Ok(out)
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self.get(collection, id).await?.is_some())
    }

    async fn list_ids(&self, collection: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id FROM documents WHERE collection = ?1 ORDER BY id",
                params![collection],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row.get(0)?);
        }
        Ok(out)
    }

    async fn list_recent(
        &self,
        collection: &str,
        order_by: OrderBy,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let col = match order_by {
            OrderBy::Updated => "updated_at",
            OrderBy::Accessed => "accessed_at",
        };
        let sql = format!(
            "SELECT collection, id, summary, tags, content_hash, content_hash_full, created_at, updated_at, accessed_at FROM documents WHERE collection = ?1 ORDER BY {col} DESC LIMIT ?2"
        );
        let mut rows = conn.query(&sql, params![collection, limit as i64]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::row_to_document(&row)?);
        }
        Ok(out)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![collection],
            )
            .await?;
        let count: i64 = rows.next().await?.map(|r| r.get(0)).transpose()?.unwrap_or(0);
        Ok(count as u64)
    }

    async fn get_version(&self, collection: &str, id: &str, offset: u64) -> Result<Option<Version>> {
        if offset == 0 {
            return Ok(None);
        }
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT collection, base_id, version, summary, tags, content_hash, content_hash_full, created_at FROM versions WHERE collection = ?1 AND base_id = ?2 ORDER BY version DESC LIMIT 1 OFFSET ?3",
                params![collection, id, (offset - 1) as i64],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_version(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_versions(&self, collection: &str, id: &str) -> Result<Vec<Version>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT collection, base_id, version, summary, tags, content_hash, content_hash_full, created_at FROM versions WHERE collection = ?1 AND base_id = ?2 ORDER BY version DESC",
                params![collection, id],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::row_to_version(&row)?);
        }
        Ok(out)
    }

    async fn version_count(&self, collection: &str, id: &str) -> Result<u64> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM versions WHERE collection = ?1 AND base_id = ?2",
                params![collection, id],
            )
            .await?;
        let count: i64 = rows.next().await?.map(|r| r.get(0)).transpose()?.unwrap_or(0);
        Ok(count as u64)
    }

    async fn max_version(&self, collection: &str, id: &str) -> Result<u64> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT COALESCE(MAX(version), 0) FROM versions WHERE collection = ?1 AND base_id = ?2",
                params![collection, id],
            )
            .await?;
        let max: i64 = rows.next().await?.map(|r| r.get(0)).transpose()?.unwrap_or(0);
        Ok(max as u64)
    }

    async fn count_versions_from(&self, collection: &str, id: &str, from_version: u64) -> Result<u64> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM versions WHERE collection = ?1 AND base_id = ?2 AND version >= ?3",
                params![collection, id, from_version as i64],
            )
            .await?;
        let count: i64 = rows.next().await?.map(|r| r.get(0)).transpose()?.unwrap_or(0);
        Ok(count as u64)
    }

    async fn restore_latest_version(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let latest = self.get_version(collection, id, 1).await?;
        let Some(latest) = latest else {
            return Ok(None);
        };

        conn.execute(
            r#"
            INSERT INTO documents (collection, id, summary, tags, content_hash, content_hash_full, created_at, updated_at, accessed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(collection, id) DO UPDATE SET
                summary = excluded.summary, tags = excluded.tags,
                content_hash = excluded.content_hash, content_hash_full = excluded.content_hash_full,
                updated_at = excluded.updated_at, accessed_at = excluded.accessed_at
            "#,
            params![
                collection,
                id,
                latest.summary.clone(),
                serde_json::to_string(&latest.tags)?,
                latest.content_hash.clone(),
                latest.content_hash_full.clone(),
                latest.created_at.clone(),
                Utc::now().to_rfc3339(),
            ],
        )
        .await?;

        conn.execute(
            "DELETE FROM versions WHERE collection = ?1 AND base_id = ?2 AND version = ?3",
            params![collection, id, latest.version as i64],
        )
        .await?;

        self.get(collection, id).await
    }

    async fn extract_versions(
        &self,
        collection: &str,
        source_id: &str,
        target_id: &str,
        tag_filter: Option<&HashMap<String, String>>,
        only_current: bool,
    ) -> Result<ExtractResult> {
        let conn = self.conn()?;
        let matches_filter = |tags: &HashMap<String, String>| -> bool {
            tag_filter
                .map(|filter| filter.iter().all(|(k, v)| tags.get(k) == Some(v)))
                .unwrap_or(true)
        };

        let source_head = self.get(collection, source_id).await?;
        let head_matches = source_head
            .as_ref()
            .map(|d| matches_filter(&d.tags))
            .unwrap_or(false);

        struct Candidate {
            summary: String,
            tags: HashMap<String, String>,
            content_hash: String,
            content_hash_full: String,
            created_at: String,
            orig_version: Option<u64>,
        }

        // Chronological order: oldest archived match first, current head
        // (if it matches) last, so the head always lands on the highest
        // renumbered slot — `restore_latest_version` promotes whichever
        // version has the highest number, and that must be the most recent
        // content, not whichever archived row happened to be visited last.
        let mut candidates = Vec::new();
        if !only_current {
            let versions = self.list_versions(collection, source_id).await?;
            for v in versions.into_iter().rev() {
                if matches_filter(&v.tags) {
                    candidates.push(Candidate {
                        summary: v.summary,
                        tags: v.tags,
                        content_hash: v.content_hash,
                        content_hash_full: v.content_hash_full,
                        created_at: v.created_at,
                        orig_version: Some(v.version),
                    });
                }
            }
        }
        if head_matches {
            if let Some(head) = source_head.clone() {
                candidates.push(Candidate {
                    summary: head.summary,
                    tags: head.tags,
                    content_hash: head.content_hash,
                    content_hash_full: head.content_hash_full,
                    created_at: head.created_at,
                    orig_version: None,
                });
            }
        }

        let base_version = self.max_version(collection, target_id).await?;
        let mut extracted = Vec::new();

        if !candidates.is_empty() {
            let mut next_version = base_version;

            // The target's existing head, if any, predates everything being
            // moved in, so it's archived onto the bottom of the new sequence
            // before the incoming content is appended above it.
            if let Some(existing) = self.get(collection, target_id).await? {
                next_version += 1;
                conn.execute(
                    r#"
                    INSERT INTO versions (collection, base_id, version, summary, tags, content_hash, content_hash_full, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        collection,
                        target_id,
                        next_version as i64,
                        existing.summary.clone(),
                        serde_json::to_string(&existing.tags)?,
                        existing.content_hash.clone(),
                        existing.content_hash_full.clone(),
                        existing.created_at.clone(),
                    ],
                )
                .await?;
            }

            for c in candidates {
                next_version += 1;
                extracted.push(VersionInfo {
                    version: next_version,
                    summary: c.summary.clone(),
                    tags: c.tags.clone(),
                    content_hash: c.content_hash.clone(),
                    created_at: c.created_at.clone(),
                });
                conn.execute(
                    r#"
                    INSERT INTO versions (collection, base_id, version, summary, tags, content_hash, content_hash_full, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        collection,
                        target_id,
                        next_version as i64,
                        c.summary,
                        serde_json::to_string(&c.tags)?,
                        c.content_hash,
                        c.content_hash_full,
                        c.created_at,
                    ],
                )
                .await?;
                if let Some(ov) = c.orig_version {
                    conn.execute(
                        "DELETE FROM versions WHERE collection = ?1 AND base_id = ?2 AND version = ?3",
                        params![collection, source_id, ov as i64],
                    )
                    .await?;
                }
            }
        }

        let mut new_source_head = None;
        if head_matches {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, source_id],
            )
            .await?;
            new_source_head = self.restore_latest_version(collection, source_id).await?;
        }

        if !extracted.is_empty() {
            self.restore_latest_version(collection, target_id).await?;
        }

        Ok(ExtractResult {
            extracted,
            new_source_head,
            base_version,
        })
    }

    async fn delete(&self, collection: &str, id: &str, delete_versions: bool) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn
            .execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )
            .await?;
        if delete_versions {
            conn.execute(
                "DELETE FROM versions WHERE collection = ?1 AND base_id = ?2",
                params![collection, id],
            )
            .await?;
        }
        conn.execute(
            "DELETE FROM content_fts WHERE collection = ?1 AND (id = ?2 OR base_id = ?2)",
            params![collection, id],
        )
        .await?;
        Ok(affected > 0)
    }

    async fn delete_parts(&self, collection: &str, base_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM parts WHERE collection = ?1 AND base_id = ?2",
            params![collection, base_id],
        )
        .await?;
        conn.execute(
            "DELETE FROM content_fts WHERE collection = ?1 AND base_id = ?2 AND kind = 'part'",
            params![collection, base_id],
        )
        .await?;
        Ok(())
    }

    async fn delete_collection_all(&self, collection: &str) -> Result<()> {
        let conn = self.conn()?;
        for table in ["documents", "versions", "parts", "edges", "backfill"] {
            let sql = format!("DELETE FROM {table} WHERE collection = ?1");
            conn.execute(&sql, params![collection]).await?;
        }
        conn.execute(
            "DELETE FROM content_fts WHERE collection = ?1",
            params![collection],
        )
        .await?;
        Ok(())
    }

    async fn import_batch(&self, collection: &str, docs: Vec<ImportDocument>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result: Result<()> = async {
            for doc in &docs {
                conn.execute(
                    r#"
                    INSERT INTO documents (collection, id, summary, tags, content_hash, content_hash_full, created_at, updated_at, accessed_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    ON CONFLICT(collection, id) DO NOTHING
                    "#,
                    params![
                        collection,
                        doc.id.clone(),
                        doc.summary.clone(),
                        serde_json::to_string(&doc.tags)?,
                        doc.content_hash.clone(),
                        doc.content_hash_full.clone(),
                        doc.created_at.clone(),
                        doc.updated_at.clone(),
                        doc.accessed_at.clone(),
                    ],
                )
                .await?;
                Self::index_fts(&conn, collection, &doc.id, &doc.id, FtsKind::Head, &doc.summary).await?;

                for v in &doc.versions {
                    conn.execute(
                        r#"
                        INSERT INTO versions (collection, base_id, version, summary, tags, content_hash, content_hash_full, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                        ON CONFLICT(collection, base_id, version) DO NOTHING
                        "#,
                        params![
                            collection,
                            doc.id.clone(),
                            v.version as i64,
                            v.summary.clone(),
                            serde_json::to_string(&v.tags)?,
                            v.content_hash.clone(),
                            v.content_hash.clone(),
                            v.created_at.clone(),
                        ],
                    )
                    .await?;
                }

                for p in &doc.parts {
                    conn.execute(
                        r#"
                        INSERT INTO parts (collection, base_id, part_num, summary, tags, content, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        ON CONFLICT(collection, base_id, part_num) DO NOTHING
                        "#,
                        params![
                            collection,
                            doc.id.clone(),
                            p.part_num as i64,
                            p.summary.clone(),
                            serde_json::to_string(&p.tags)?,
                            p.content.clone(),
                            doc.created_at.clone(),
                        ],
                    )
                    .await?;
                }
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                conn.execute("COMMIT", ()).await?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn query_by_tag_key(
        &self,
        collection: &str,
        key: &str,
        since: Option<&str>,
        until: Option<&str>,
    ) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let sql = "SELECT collection, id, summary, tags, content_hash, content_hash_full, created_at, updated_at, accessed_at FROM documents WHERE collection = ?1 AND json_extract(tags, '$.' || ?2) IS NOT NULL";
        let mut rows = conn.query(sql, params![collection, key]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let doc = Self::row_to_document(&row)?;
            if let Some(since) = since {
                if doc.tags.get("_updated_date").map(|d| d.as_str()) < Some(since) {
                    continue;
                }
            }
            if let Some(until) = until {
                if doc.tags.get("_updated_date").map(|d| d.as_str()) > Some(until) {
                    continue;
                }
            }
            out.push(doc);
        }
        Ok(out)
    }

    async fn list_distinct_tag_keys(&self, collection: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT tags FROM documents WHERE collection = ?1",
                params![collection],
            )
            .await?;
        let mut keys = std::collections::BTreeSet::new();
        while let Some(row) = rows.next().await? {
            let tags_json: String = row.get(0)?;
            if let Ok(tags) = serde_json::from_str::<HashMap<String, String>>(&tags_json) {
                for k in tags.keys() {
                    if !is_system_tag(k) {
                        keys.insert(k.clone());
                    }
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    async fn list_distinct_tag_values(&self, collection: &str, key: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT tags FROM documents WHERE collection = ?1",
                params![collection],
            )
            .await?;
        let mut values = std::collections::BTreeSet::new();
        while let Some(row) = rows.next().await? {
            let tags_json: String = row.get(0)?;
            if let Ok(tags) = serde_json::from_str::<HashMap<String, String>>(&tags_json) {
                if let Some(v) = tags.get(key) {
                    values.insert(v.clone());
                }
            }
        }
        Ok(values.into_iter().collect())
    }

    async fn query_by_id_prefix(&self, collection: &str, prefix: &str) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let pattern = format!("{escaped}%");
        let mut rows = conn
            .query(
                "SELECT collection, id, summary, tags, content_hash, content_hash_full, created_at, updated_at, accessed_at FROM documents WHERE collection = ?1 AND id LIKE ?2 ESCAPE '\\'",
                params![collection, pattern],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::row_to_document(&row)?);
        }
        Ok(out)
    }

    async fn find_by_content_hash(&self, collection: &str, content_hash: &str) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT collection, id, summary, tags, content_hash, content_hash_full, created_at, updated_at, accessed_at FROM documents WHERE collection = ?1 AND content_hash = ?2",
                params![collection, content_hash],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::row_to_document(&row)?);
        }
        Ok(out)
    }

    async fn upsert_parts(&self, collection: &str, base_id: &str, parts: Vec<PartInput>) -> Result<()> {
        let conn = self.conn()?;
        self.delete_parts(collection, base_id).await?;
        let now = Utc::now().to_rfc3339();
        for p in parts {
            conn.execute(
                r#"
                INSERT INTO parts (collection, base_id, part_num, summary, tags, content, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    collection,
                    base_id,
                    p.part_num as i64,
                    p.summary.clone(),
                    serde_json::to_string(&p.tags)?,
                    p.content.clone(),
                    now.clone(),
                ],
            )
            .await?;
            Self::index_fts(
                &conn,
                collection,
                &format!("{base_id}@p{}", p.part_num),
                base_id,
                FtsKind::Part,
                &p.summary,
            )
            .await?;
        }
        Ok(())
    }

    async fn list_parts(&self, collection: &str, base_id: &str) -> Result<Vec<Part>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT collection, base_id, part_num, summary, tags, content, created_at FROM parts WHERE collection = ?1 AND base_id = ?2 ORDER BY part_num",
                params![collection, base_id],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::row_to_part(&row)?);
        }
        Ok(out)
    }

    async fn get_part(&self, collection: &str, base_id: &str, part_num: u32) -> Result<Option<Part>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT collection, base_id, part_num, summary, tags, content, created_at FROM parts WHERE collection = ?1 AND base_id = ?2 AND part_num = ?3",
                params![collection, base_id, part_num as i64],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_part(&row)?)),
            None => Ok(None),
        }
    }

    async fn part_count(&self, collection: &str, base_id: &str) -> Result<u64> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM parts WHERE collection = ?1 AND base_id = ?2",
                params![collection, base_id],
            )
            .await?;
        let count: i64 = rows.next().await?.map(|r| r.get(0)).transpose()?.unwrap_or(0);
        Ok(count as u64)
    }

    async fn query_parts_by_tag_key(&self, collection: &str, key: &str) -> Result<Vec<Part>> {
        let conn = self.conn()?;
        let sql = "SELECT collection, base_id, part_num, summary, tags, content, created_at FROM parts WHERE collection = ?1 AND json_extract(tags, '$.' || ?2) IS NOT NULL";
        let mut rows = conn.query(sql, params![collection, key]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::row_to_part(&row)?);
        }
        Ok(out)
    }

    async fn update_part_tags(
        &self,
        collection: &str,
        base_id: &str,
        part_num: u32,
        tags: &HashMap<String, String>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE parts SET tags = ?1 WHERE collection = ?2 AND base_id = ?3 AND part_num = ?4",
            params![serde_json::to_string(tags)?, collection, base_id, part_num as i64],
        )
        .await?;
        Ok(())
    }

    async fn upsert_edge(&self, edge: &Edge) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO edges (collection, source_id, predicate, target_id, inverse_verb, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(collection, source_id, predicate) DO UPDATE SET
                target_id = excluded.target_id,
                inverse_verb = excluded.inverse_verb,
                created_at = excluded.created_at
            "#,
            params![
                edge.collection.clone(),
                edge.source_id.clone(),
                edge.predicate.clone(),
                edge.target_id.clone(),
                edge.inverse_verb.clone(),
                edge.created_at.clone(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_inverse_edges(&self, collection: &str, target: &str) -> Result<Vec<Edge>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT collection, source_id, predicate, target_id, inverse_verb, created_at FROM edges WHERE collection = ?1 AND target_id = ?2",
                params![collection, target],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::row_to_edge(&row)?);
        }
        Ok(out)
    }

    async fn delete_edges_for_source(&self, collection: &str, source_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM edges WHERE collection = ?1 AND source_id = ?2",
            params![collection, source_id],
        )
        .await?;
        Ok(())
    }

    async fn delete_edges_for_target(&self, collection: &str, target_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM edges WHERE collection = ?1 AND target_id = ?2",
            params![collection, target_id],
        )
        .await?;
        Ok(())
    }

    async fn delete_edges_for_predicate(
        &self,
        collection: &str,
        source_id: &str,
        predicate: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM edges WHERE collection = ?1 AND source_id = ?2 AND predicate = ?3",
            params![collection, source_id, predicate],
        )
        .await?;
        Ok(())
    }

    async fn has_edges(&self, collection: &str) -> Result<bool> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT 1 FROM edges WHERE collection = ?1 LIMIT 1",
                params![collection],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn get_inverse_version_edges(&self, _collection: &str, _target: &str) -> Result<Vec<Edge>> {
        // Off by default. Callers gate this behind
        // `MemoryLimitsConfig::version_path_edges`.
        Ok(Vec::new())
    }

    async fn find_edge_targets(&self, collection: &str, text: &str) -> Result<Vec<String>> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT DISTINCT target_id FROM edges WHERE collection = ?1",
                params![collection],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let target: String = row.get(0)?;
            if tokens.iter().any(|t| t.eq_ignore_ascii_case(&target)) {
                out.push(target);
            }
        }
        Ok(out)
    }

    async fn upsert_backfill(&self, collection: &str, predicate: &str, inverse: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO backfill (collection, predicate, inverse_verb, status, created_at)
            VALUES (?1, ?2, ?3, 'pending', ?4)
            ON CONFLICT(collection, predicate) DO UPDATE SET inverse_verb = excluded.inverse_verb, status = 'pending'
            "#,
            params![collection, predicate, inverse, Utc::now().to_rfc3339()],
        )
        .await?;
        Ok(())
    }

    async fn backfill_exists(&self, collection: &str, predicate: &str) -> Result<bool> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT 1 FROM backfill WHERE collection = ?1 AND predicate = ?2",
                params![collection, predicate],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn get_backfill_status(&self, collection: &str, predicate: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT status FROM backfill WHERE collection = ?1 AND predicate = ?2",
                params![collection, predicate],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn delete_backfill(&self, collection: &str, predicate: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM backfill WHERE collection = ?1 AND predicate = ?2",
            params![collection, predicate],
        )
        .await?;
        Ok(())
    }

    async fn query_fts(&self, collection: &str, q: &str, limit: usize) -> Result<Vec<FtsHit>> {
        let Some(fts_query) = build_fts_query(q) else {
            return Ok(Vec::new());
        };
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                r#"
                SELECT id, base_id, kind, summary, rank
                FROM content_fts
                WHERE collection = ?1 AND content_fts MATCH ?2
                ORDER BY rank
                LIMIT ?3
                "#,
                params![collection, fts_query, limit as i64],
            )
            .await?;
        let mut out = Vec::new();
        let mut rank = 0i64;
        while let Some(row) = rows.next().await? {
            out.push(FtsHit {
                id: row.get(0)?,
                base_id: row.get(1)?,
                kind: FtsKind::parse(&row.get::<String>(2)?),
                summary: row.get(3)?,
                rank,
            });
            rank += 1;
        }
        Ok(out)
    }

    async fn query_fts_scoped(
        &self,
        collection: &str,
        q: &str,
        allowed_ids: &[String],
    ) -> Result<Vec<FtsHit>> {
        if allowed_ids.is_empty() {
            return Ok(Vec::new());
        }
        let Some(fts_query) = build_fts_query(q) else {
            return Ok(Vec::new());
        };
        let conn = self.conn()?;
        let placeholders: Vec<String> = (3..=allowed_ids.len() + 2).map(|i| format!("?{i}")).collect();
        let sql = format!(
            r#"
            SELECT id, base_id, kind, summary, rank
            FROM content_fts
            WHERE collection = ?1 AND content_fts MATCH ?2 AND base_id IN ({})
            ORDER BY rank
            "#,
            placeholders.join(", ")
        );
        let mut bind: Vec<libsql::Value> = vec![
            libsql::Value::from(collection.to_string()),
            libsql::Value::from(fts_query),
        ];
        bind.extend(allowed_ids.iter().map(|id| libsql::Value::from(id.clone())));
        let mut rows = conn.query(&sql, libsql::params_from_iter(bind)).await?;
        let mut out = Vec::new();
        let mut rank = 0i64;
        while let Some(row) = rows.next().await? {
            out.push(FtsHit {
                id: row.get(0)?,
                base_id: row.get(1)?,
                kind: FtsKind::parse(&row.get::<String>(2)?),
                summary: row.get(3)?,
                rank,
            });
            rank += 1;
        }
        Ok(out)
    }

    async fn touch(&self, collection: &str, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE documents SET accessed_at = ?1 WHERE collection = ?2 AND id = ?3",
            params![now, collection, id],
        )
        .await?;
        Ok(())
    }

    async fn touch_many(&self, collection: &str, ids: &[String]) -> Result<()> {
        for id in ids {
            self.touch(collection, id).await?;
        }
        Ok(())
    }
}

/// Tokenize free text by whitespace, trimming leading/trailing punctuation
/// from each token but keeping punctuation inside it, so an id like
/// `anne-marie` or `j.smith` survives as a single token instead of being
/// split at word boundaries. Used by `find_edge_targets` to match entity ids.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

/// Strip quotes and FTS operators, OR-combine quoted tokens; returns `None`
/// if nothing usable survives.
pub fn build_fts_query(q: &str) -> Option<String> {
    let cleaned: String = q
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '*' | '^' | ':'))
        .collect();
    let tokens: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|t| t.chars().any(|c| c.is_alphanumeric()))
        .collect();
    if tokens.is_empty() {
        return None;
    }
    Some(tokens.join(" OR "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts_query_sanitization_rejects_empty_and_punctuation_only() {
        assert!(build_fts_query("").is_none());
        assert!(build_fts_query("\"\" ''").is_none());
        assert!(build_fts_query("...---").is_none());
    }

    #[test]
    fn fts_query_or_combines_tokens() {
        assert_eq!(build_fts_query("hello world").unwrap(), "hello OR world");
    }

    #[test]
    fn tokenize_trims_outer_punctuation() {
        let tokens = tokenize("What did Melanie say?");
        assert_eq!(tokens, vec!["What", "did", "Melanie", "say"]);
    }

    #[test]
    fn tokenize_keeps_internal_punctuation_in_an_id() {
        let tokens = tokenize("ask anne-marie or j.smith about it");
        assert_eq!(tokens, vec!["ask", "anne-marie", "or", "j.smith", "about", "it"]);
    }
}
