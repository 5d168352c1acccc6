use thiserror::Error;

/// A flat `thiserror`-derived error enum with `#[from]` conversions at the
/// storage/HTTP/JSON boundaries.
#[derive(Error, Debug)]
pub enum KeepError {
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("tag constraint violation for {key}: expected one of {valid_values:?}")]
    Constrained {
        key: String,
        valid_values: Vec<String>,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("provider transient failure: {0}")]
    ProviderTransient(String),

    #[error("store corruption: {0}")]
    Corruption(String),

    #[error("missing optional dependency: {0}")]
    Dependency(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote task service rejected request: {0}")]
    RemoteRejected(String),

    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl KeepError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// True for errors a background pending-queue worker should retry
    /// (fail -> pending with backoff) rather than dead-letter immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderTransient(_) | Self::Http(_) | Self::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, KeepError>;
