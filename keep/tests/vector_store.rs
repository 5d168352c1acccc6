mod common;

use std::collections::HashMap;

use keep::store::{DocumentStore, EmbeddingKind, LibsqlDocumentStore, LibsqlVectorStore, VectorStore};

fn vector(lead: f32) -> Vec<f32> {
    let mut v = vec![0.0_f32; common::TEST_EMBEDDING_DIM];
    v[0] = lead;
    v
}

#[tokio::test]
async fn upsert_and_read_back_a_document_embedding() {
    let db = common::test_database().await;
    let documents = LibsqlDocumentStore::new(db.clone());
    let vectors = LibsqlVectorStore::new(db, common::TEST_EMBEDDING_DIM);

    documents
        .upsert("default", "doc-1", "summary", &HashMap::new(), "h", "hfull", None)
        .await
        .unwrap();

    assert!(!vectors
        .has_embedding(EmbeddingKind::Document, "default", "doc-1", None)
        .await
        .unwrap());

    vectors
        .upsert_embedding(EmbeddingKind::Document, "default", "doc-1", None, &vector(1.0))
        .await
        .unwrap();

    assert!(vectors
        .has_embedding(EmbeddingKind::Document, "default", "doc-1", None)
        .await
        .unwrap());

    let stored = vectors
        .get_vector(EmbeddingKind::Document, "default", "doc-1", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.len(), common::TEST_EMBEDDING_DIM);
    assert_eq!(stored[0], 1.0);
}

#[tokio::test]
async fn search_ranks_by_cosine_distance_ascending() {
    let db = common::test_database().await;
    let documents = LibsqlDocumentStore::new(db.clone());
    let vectors = LibsqlVectorStore::new(db, common::TEST_EMBEDDING_DIM);

    for (id, lead) in [("near", 1.0), ("far", -1.0), ("middle", 0.5)] {
        documents
            .upsert("default", id, "summary", &HashMap::new(), "h", "hfull", None)
            .await
            .unwrap();
        vectors
            .upsert_embedding(EmbeddingKind::Document, "default", id, None, &vector(lead))
            .await
            .unwrap();
    }

    let results = vectors
        .search(EmbeddingKind::Document, "default", &vector(1.0), 3)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].id, "near");
}

#[tokio::test]
async fn search_scoped_restricts_to_allowed_ids() {
    let db = common::test_database().await;
    let documents = LibsqlDocumentStore::new(db.clone());
    let vectors = LibsqlVectorStore::new(db, common::TEST_EMBEDDING_DIM);

    for id in ["allowed", "excluded"] {
        documents
            .upsert("default", id, "summary", &HashMap::new(), "h", "hfull", None)
            .await
            .unwrap();
        vectors
            .upsert_embedding(EmbeddingKind::Document, "default", id, None, &vector(1.0))
            .await
            .unwrap();
    }

    let scoped = vectors
        .search_scoped(EmbeddingKind::Document, "default", &vector(1.0), &["allowed".to_string()])
        .await
        .unwrap();

    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].id, "allowed");
}

#[tokio::test]
async fn delete_embedding_clears_it_without_removing_the_document() {
    let db = common::test_database().await;
    let documents = LibsqlDocumentStore::new(db.clone());
    let vectors = LibsqlVectorStore::new(db, common::TEST_EMBEDDING_DIM);

    documents
        .upsert("default", "doc-del", "summary", &HashMap::new(), "h", "hfull", None)
        .await
        .unwrap();
    vectors
        .upsert_embedding(EmbeddingKind::Document, "default", "doc-del", None, &vector(1.0))
        .await
        .unwrap();

    vectors
        .delete_embedding(EmbeddingKind::Document, "default", "doc-del", None)
        .await
        .unwrap();

    assert!(!vectors
        .has_embedding(EmbeddingKind::Document, "default", "doc-del", None)
        .await
        .unwrap());
    assert!(documents.get("default", "doc-del").await.unwrap().is_some());
}

#[tokio::test]
async fn embedding_dim_reports_configured_dimension() {
    let db = common::test_database().await;
    let vectors = LibsqlVectorStore::new(db, common::TEST_EMBEDDING_DIM);
    assert_eq!(vectors.embedding_dim(), common::TEST_EMBEDDING_DIM);
}
