pub mod connection;
pub mod document_store;
pub mod schema;
pub mod tags;
pub mod vector_store;

pub use connection::Database;
pub use document_store::{
    DocumentStore, ExtractResult, FtsHit, FtsKind, ImportDocument, LibsqlDocumentStore, OrderBy,
    PartInput, VersionInfo,
};
pub use tags::{normalize_id, validate_id, validate_tag_key, validate_tag_value};
pub use vector_store::{EmbeddingKind, LibsqlVectorStore, ScoredId, VectorStore};
