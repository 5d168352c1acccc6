use libsql::Connection;

use crate::error::Result;

/// Frozen stopword set used by deep-search lexical scoring to drop noise
/// tokens before ranking.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "of", "to", "in", "on", "for",
    "with", "as", "by", "at", "from", "is", "are", "was", "were", "be", "been", "being", "has",
    "have", "had", "do", "does", "did", "what", "who", "whom", "which", "this", "that", "these",
    "those", "it", "its", "i", "you", "he", "she", "they", "we",
];

pub fn get_stopwords() -> std::collections::HashSet<&'static str> {
    STOPWORDS.iter().copied().collect()
}

/// Creates the relational schema shared by DocumentStore and VectorStore:
/// documents/versions/parts/edges hold canonical metadata plus an embedding
/// column each (F32_BLOB), and `content_fts` is a unified FTS5 index across
/// heads/parts/versions.
pub async fn init_schema(conn: &Connection, embedding_dim: usize) -> Result<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            summary TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '{{}}',
            content_hash TEXT NOT NULL,
            content_hash_full TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            accessed_at TEXT,
            embedding F32_BLOB({dim}),
            PRIMARY KEY (collection, id)
        );

        CREATE INDEX IF NOT EXISTS idx_documents_updated ON documents(collection, updated_at);
        CREATE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(collection, content_hash);

        CREATE TABLE IF NOT EXISTS versions (
            collection TEXT NOT NULL,
            base_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            summary TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '{{}}',
            content_hash TEXT NOT NULL,
            content_hash_full TEXT NOT NULL,
            created_at TEXT NOT NULL,
            embedding F32_BLOB({dim}),
            PRIMARY KEY (collection, base_id, version)
        );

        CREATE INDEX IF NOT EXISTS idx_versions_base ON versions(collection, base_id);

        CREATE TABLE IF NOT EXISTS parts (
            collection TEXT NOT NULL,
            base_id TEXT NOT NULL,
            part_num INTEGER NOT NULL,
            summary TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '{{}}',
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            embedding F32_BLOB({dim}),
            PRIMARY KEY (collection, base_id, part_num)
        );

        CREATE INDEX IF NOT EXISTS idx_parts_base ON parts(collection, base_id);

        CREATE TABLE IF NOT EXISTS edges (
            collection TEXT NOT NULL,
            source_id TEXT NOT NULL,
            predicate TEXT NOT NULL,
            target_id TEXT NOT NULL,
            inverse_verb TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (collection, source_id, predicate)
        );

        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(collection, target_id);
        CREATE INDEX IF NOT EXISTS idx_edges_predicate ON edges(collection, predicate);

        CREATE TABLE IF NOT EXISTS backfill (
            collection TEXT NOT NULL,
            predicate TEXT NOT NULL,
            inverse_verb TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            PRIMARY KEY (collection, predicate)
        );

        CREATE TABLE IF NOT EXISTS pending_summaries (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            content TEXT NOT NULL,
            queued_at TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            task_type TEXT NOT NULL DEFAULT 'summarize',
            metadata TEXT NOT NULL DEFAULT '{{}}',
            status TEXT NOT NULL DEFAULT 'pending',
            claimed_by TEXT,
            claimed_at TEXT,
            last_error TEXT,
            retry_after TEXT,
            PRIMARY KEY (id, collection, task_type)
        );

        CREATE INDEX IF NOT EXISTS idx_pending_queued_at ON pending_summaries(queued_at);
        CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_summaries(status);

        CREATE VIRTUAL TABLE IF NOT EXISTS content_fts USING fts5(
            collection UNINDEXED,
            id UNINDEXED,
            base_id UNINDEXED,
            kind UNINDEXED,
            summary
        );
        "#,
    ))
    .await?;

    create_vector_indexes(conn).await?;

    Ok(())
}

async fn create_vector_indexes(conn: &Connection) -> Result<()> {
    for (index_name, table, ddl) in [
        (
            "documents_embedding_idx",
            "documents",
            "CREATE INDEX IF NOT EXISTS documents_embedding_idx ON documents(libsql_vector_idx(embedding))",
        ),
        (
            "versions_embedding_idx",
            "versions",
            "CREATE INDEX IF NOT EXISTS versions_embedding_idx ON versions(libsql_vector_idx(embedding))",
        ),
        (
            "parts_embedding_idx",
            "parts",
            "CREATE INDEX IF NOT EXISTS parts_embedding_idx ON parts(libsql_vector_idx(embedding))",
        ),
    ] {
        if let Err(e) = conn.execute(ddl, ()).await {
            tracing::warn!("vector index creation failed for {table} (may already exist): {e} ({index_name})");
        }
    }
    Ok(())
}

/// Drops and recreates the embedding columns at a new dimension. Called by
/// `VectorStore::reset_embedding_dimension` when the embedding identity
/// (provider, model, dimension) changes; the caller is responsible for
/// enqueueing a full reindex afterward.
pub async fn reset_embedding_dimension(conn: &Connection, new_dim: usize) -> Result<()> {
    conn.execute_batch(&format!(
        r#"
        ALTER TABLE documents DROP COLUMN embedding;
        ALTER TABLE documents ADD COLUMN embedding F32_BLOB({new_dim});
        ALTER TABLE versions DROP COLUMN embedding;
        ALTER TABLE versions ADD COLUMN embedding F32_BLOB({new_dim});
        ALTER TABLE parts DROP COLUMN embedding;
        ALTER TABLE parts ADD COLUMN embedding F32_BLOB({new_dim});
        "#,
    ))
    .await?;
    create_vector_indexes(conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    #[tokio::test]
    async fn schema_creates_expected_tables() {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();
        init_schema(&conn, 384).await.unwrap();

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
                (),
            )
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            names.push(row.get::<String>(0).unwrap());
        }
        for expected in [
            "documents",
            "versions",
            "parts",
            "edges",
            "backfill",
            "pending_summaries",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing table {expected}");
        }
    }

    #[test]
    fn stopwords_exclude_common_function_words() {
        let stopwords = get_stopwords();
        assert!(stopwords.contains("the"));
        assert!(!stopwords.contains("quantum"));
    }
}
