use async_trait::async_trait;
use libsql::{params, Connection};

use crate::error::Result;

use super::connection::Database;
use super::schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    Document,
    Version,
    Part,
}

impl EmbeddingKind {
    fn table(&self) -> &'static str {
        match self {
            EmbeddingKind::Document => "documents",
            EmbeddingKind::Version => "versions",
            EmbeddingKind::Part => "parts",
        }
    }

    fn index_name(&self) -> &'static str {
        match self {
            EmbeddingKind::Document => "documents_embedding_idx",
            EmbeddingKind::Version => "versions_embedding_idx",
            EmbeddingKind::Part => "parts_embedding_idx",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredId {
    pub id: String,
    pub distance: f64,
}

fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Embedding storage and nearest-neighbor search over the same
/// documents/versions/parts tables DocumentStore writes metadata into,
/// using F32_BLOB columns plus a `libsql_vector_idx` ANN index generalized
/// across the three embedded row kinds.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert_embedding(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        base_id: &str,
        sub_key: Option<&str>,
        vector: &[f32],
    ) -> Result<()>;

    async fn delete_embedding(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        base_id: &str,
        sub_key: Option<&str>,
    ) -> Result<()>;

    async fn has_embedding(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        base_id: &str,
        sub_key: Option<&str>,
    ) -> Result<bool>;

    /// Nearest neighbors by cosine distance, ascending (closest first).
    async fn search(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredId>>;

    /// Like `search`, but restricted to the given ids — used when combining
    /// with a tag/edge-derived candidate set.
    async fn search_scoped(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        query_vector: &[f32],
        allowed_ids: &[String],
    ) -> Result<Vec<ScoredId>>;

    /// Drops and recreates embedding columns at a new dimension; the caller
    /// must re-enqueue every row for re-embedding afterward.
    async fn reset_embedding_dimension(&self, new_dim: usize) -> Result<()>;

    /// Read back a stored embedding, used for donor dedup (section 4.4 step
    /// 6) and meta/deep cosine re-ranking, which both need the raw vector
    /// rather than just a distance.
    async fn get_vector(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        base_id: &str,
        sub_key: Option<&str>,
    ) -> Result<Option<Vec<f32>>>;

    fn embedding_dim(&self) -> usize;
}

pub struct LibsqlVectorStore {
    db: Database,
    embedding_dim: usize,
}

impl LibsqlVectorStore {
    pub fn new(db: Database, embedding_dim: usize) -> Self {
        Self { db, embedding_dim }
    }

    fn conn(&self) -> Result<Connection> {
        self.db.connect()
    }
}

#[async_trait]
impl VectorStore for LibsqlVectorStore {
    async fn upsert_embedding(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        base_id: &str,
        sub_key: Option<&str>,
        vector: &[f32],
    ) -> Result<()> {
        let conn = self.conn()?;
        let table = kind.table();
        let literal = vector_literal(vector);
        let sql = match (kind, sub_key) {
            (EmbeddingKind::Document, _) => format!(
                "UPDATE {table} SET embedding = vector32(?1) WHERE collection = ?2 AND id = ?3"
            ),
            (EmbeddingKind::Version, Some(_)) => format!(
                "UPDATE {table} SET embedding = vector32(?1) WHERE collection = ?2 AND base_id = ?3 AND version = ?4"
            ),
            (EmbeddingKind::Part, Some(_)) => format!(
                "UPDATE {table} SET embedding = vector32(?1) WHERE collection = ?2 AND base_id = ?3 AND part_num = ?4"
            ),
            _ => {
                return Err(crate::error::KeepError::invalid(
                    "version/part embeddings require a sub_key (version number or part number)",
                ))
            }
        };
        match (kind, sub_key) {
            (EmbeddingKind::Document, _) => {
                conn.execute(&sql, params![literal, collection, base_id]).await?;
            }
            (_, Some(sub)) => {
                let sub_num: i64 = sub.parse().unwrap_or(0);
                conn.execute(&sql, params![literal, collection, base_id, sub_num])
                    .await?;
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    async fn delete_embedding(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        base_id: &str,
        sub_key: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let table = kind.table();
        match (kind, sub_key) {
            (EmbeddingKind::Document, _) => {
                conn.execute(
                    &format!("UPDATE {table} SET embedding = NULL WHERE collection = ?1 AND id = ?2"),
                    params![collection, base_id],
                )
                .await?;
            }
            (EmbeddingKind::Version, Some(sub)) => {
                let version: i64 = sub.parse().unwrap_or(0);
                conn.execute(
                    &format!("UPDATE {table} SET embedding = NULL WHERE collection = ?1 AND base_id = ?2 AND version = ?3"),
                    params![collection, base_id, version],
                )
                .await?;
            }
            (EmbeddingKind::Part, Some(sub)) => {
                let part_num: i64 = sub.parse().unwrap_or(0);
                conn.execute(
                    &format!("UPDATE {table} SET embedding = NULL WHERE collection = ?1 AND base_id = ?2 AND part_num = ?3"),
                    params![collection, base_id, part_num],
                )
                .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn has_embedding(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        base_id: &str,
        sub_key: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let table = kind.table();
        let mut rows = match (kind, sub_key) {
            (EmbeddingKind::Document, _) => {
                conn.query(
                    &format!("SELECT 1 FROM {table} WHERE collection = ?1 AND id = ?2 AND embedding IS NOT NULL"),
                    params![collection, base_id],
                )
                .await?
            }
            (EmbeddingKind::Version, Some(sub)) => {
                let version: i64 = sub.parse().unwrap_or(0);
                conn.query(
                    &format!("SELECT 1 FROM {table} WHERE collection = ?1 AND base_id = ?2 AND version = ?3 AND embedding IS NOT NULL"),
                    params![collection, base_id, version],
                )
                .await?
            }
            (EmbeddingKind::Part, Some(sub)) => {
                let part_num: i64 = sub.parse().unwrap_or(0);
                conn.query(
                    &format!("SELECT 1 FROM {table} WHERE collection = ?1 AND base_id = ?2 AND part_num = ?3 AND embedding IS NOT NULL"),
                    params![collection, base_id, part_num],
                )
                .await?
            }
            _ => return Ok(false),
        };
        Ok(rows.next().await?.is_some())
    }

    async fn search(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredId>> {
        let conn = self.conn()?;
        let table = kind.table();
        let index_name = kind.index_name();
        let literal = vector_literal(query_vector);
        let id_col = match kind {
            EmbeddingKind::Document => "id",
            EmbeddingKind::Version => "base_id || '@v' || version",
            EmbeddingKind::Part => "base_id || '@p' || part_num",
        };

        let ann_sql = format!(
            r#"
            SELECT t.{id_col} AS rid, vector_distance_cos(t.embedding, vector32(?1)) AS dist
            FROM vector_top_k('{index_name}', vector32(?1), ?2) AS v
            JOIN {table} t ON t.rowid = v.id
            WHERE t.collection = ?3
            ORDER BY dist ASC
            "#
        );

        if let Ok(mut rows) = conn
            .query(&ann_sql, params![literal.clone(), k as i64, collection])
            .await
        {
            let mut out = Vec::new();
            while let Some(row) = rows.next().await? {
                out.push(ScoredId {
                    id: row.get(0)?,
                    distance: row.get(1)?,
                });
            }
            if !out.is_empty() {
                return Ok(out);
            }
        }

        // ANN index unavailable (e.g. small/new table); fall back to a full
        // scan ordered by distance.
        let scan_sql = format!(
            r#"
            SELECT {id_col} AS rid, vector_distance_cos(embedding, vector32(?1)) AS dist
            FROM {table}
            WHERE collection = ?2 AND embedding IS NOT NULL
            ORDER BY dist ASC
            LIMIT ?3
            "#
        );
        let mut rows = conn
            .query(&scan_sql, params![literal, collection, k as i64])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(ScoredId {
                id: row.get(0)?,
                distance: row.get(1)?,
            });
        }
        Ok(out)
    }

    async fn search_scoped(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        query_vector: &[f32],
        allowed_ids: &[String],
    ) -> Result<Vec<ScoredId>> {
        if allowed_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let table = kind.table();
        let literal = vector_literal(query_vector);
        let (id_col, id_filter_col) = match kind {
            EmbeddingKind::Document => ("id", "id"),
            EmbeddingKind::Version => ("base_id || '@v' || version", "base_id"),
            EmbeddingKind::Part => ("base_id || '@p' || part_num", "base_id"),
        };
        let placeholders: Vec<String> = (3..=allowed_ids.len() + 2).map(|i| format!("?{i}")).collect();
        let sql = format!(
            r#"
            SELECT {id_col} AS rid, vector_distance_cos(embedding, vector32(?1)) AS dist
            FROM {table}
            WHERE collection = ?2 AND embedding IS NOT NULL AND {id_filter_col} IN ({})
            ORDER BY dist ASC
            "#,
            placeholders.join(", ")
        );
        let mut bind: Vec<libsql::Value> = vec![
            libsql::Value::from(literal),
            libsql::Value::from(collection.to_string()),
        ];
        bind.extend(allowed_ids.iter().map(|id| libsql::Value::from(id.clone())));
        let mut rows = conn.query(&sql, libsql::params_from_iter(bind)).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(ScoredId {
                id: row.get(0)?,
                distance: row.get(1)?,
            });
        }
        Ok(out)
    }

    async fn reset_embedding_dimension(&self, new_dim: usize) -> Result<()> {
        let conn = self.conn()?;
        schema::reset_embedding_dimension(&conn, new_dim).await
    }

    async fn get_vector(
        &self,
        kind: EmbeddingKind,
        collection: &str,
        base_id: &str,
        sub_key: Option<&str>,
    ) -> Result<Option<Vec<f32>>> {
        let conn = self.conn()?;
        let table = kind.table();
        let mut rows = match (kind, sub_key) {
            (EmbeddingKind::Document, _) => {
                conn.query(
                    &format!("SELECT vector_extract(embedding) FROM {table} WHERE collection = ?1 AND id = ?2 AND embedding IS NOT NULL"),
                    params![collection, base_id],
                )
                .await?
            }
            (EmbeddingKind::Version, Some(sub)) => {
                let version: i64 = sub.parse().unwrap_or(0);
                conn.query(
                    &format!("SELECT vector_extract(embedding) FROM {table} WHERE collection = ?1 AND base_id = ?2 AND version = ?3 AND embedding IS NOT NULL"),
                    params![collection, base_id, version],
                )
                .await?
            }
            (EmbeddingKind::Part, Some(sub)) => {
                let part_num: i64 = sub.parse().unwrap_or(0);
                conn.query(
                    &format!("SELECT vector_extract(embedding) FROM {table} WHERE collection = ?1 AND base_id = ?2 AND part_num = ?3 AND embedding IS NOT NULL"),
                    params![collection, base_id, part_num],
                )
                .await?
            }
            _ => return Ok(None),
        };
        match rows.next().await? {
            Some(row) => {
                let json: String = row.get(0)?;
                let values: Vec<f32> = serde_json::from_str(&json).unwrap_or_default();
                Ok(Some(values))
            }
            None => Ok(None),
        }
    }

    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_literal_formats_as_json_array() {
        assert_eq!(vector_literal(&[1.0, 2.5, -3.0]), "[1,2.5,-3]");
    }
}
