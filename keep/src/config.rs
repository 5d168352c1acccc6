use serde::Deserialize;
use std::env;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

#[allow(dead_code)]
fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Parse `KEEP_TAG_*` env vars into auto-applied tags.
fn parse_env_tags() -> std::collections::HashMap<String, String> {
    env::vars()
        .filter_map(|(k, v)| {
            k.strip_prefix("KEEP_TAG_")
                .map(|rest| (rest.to_lowercase(), v))
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub embeddings: EmbeddingsConfig,
    pub memory: MemoryLimitsConfig,
    pub remote: Option<RemoteConfig>,
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// libsql URL: `file:path`, `:memory:`, or `libsql://`/`https://` for a
    /// remote replica connection.
    pub url: String,
    pub auth_token: Option<String>,
    /// When `url` is a remote libsql/https URL, an optional local path to
    /// keep an embedded replica (`Builder::new_remote_replica`) instead of
    /// talking to the remote on every query.
    pub local_path: Option<String>,
    pub busy_timeout_ms: u64,
    pub journal_mode: String,
    pub synchronous: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
}

/// Limits and policy knobs referenced throughout the write/read/reconcile
/// pipelines.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryLimitsConfig {
    pub max_summary_length: usize,
    pub max_id_length: usize,
    pub max_tag_key_length: usize,
    pub max_tag_value_length: usize,
    pub recency_half_life_days: f64,
    pub max_summary_attempts: u32,
    pub stale_claim_secs: u64,
    pub retry_backoff_base_secs: u64,
    pub retry_backoff_max_secs: u64,
    pub reconcile_wait_secs: u64,
    pub version_path_edges: bool,
}

/// keepnotes.ai task delegation service (original_source task_client.py).
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub api_url: String,
    pub api_key: String,
    pub project: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                url: env::var("KEEP_STORE_URL").unwrap_or_else(|_| "file:keep.db".to_string()),
                auth_token: env::var("KEEP_STORE_AUTH_TOKEN").ok(),
                local_path: env::var("KEEP_STORE_LOCAL_REPLICA_PATH").ok(),
                busy_timeout_ms: parse_env_or("KEEP_BUSY_TIMEOUT_MS", 5000),
                journal_mode: env::var("KEEP_JOURNAL_MODE").unwrap_or_else(|_| "WAL".to_string()),
                synchronous: env::var("KEEP_SYNCHRONOUS")
                    .unwrap_or_else(|_| "NORMAL".to_string()),
            },
            embeddings: EmbeddingsConfig {
                model: env::var("KEEP_EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "BAAI/bge-small-en-v1.5".to_string()),
                dimensions: parse_env_or("KEEP_EMBEDDING_DIMENSIONS", 384),
                batch_size: parse_env_or("KEEP_EMBEDDING_BATCH_SIZE", 64),
            },
            memory: MemoryLimitsConfig {
                max_summary_length: parse_env_or("KEEP_MAX_SUMMARY_LENGTH", 500),
                max_id_length: 1024,
                max_tag_key_length: 128,
                max_tag_value_length: 4096,
                recency_half_life_days: parse_env_or("KEEP_RECENCY_HALF_LIFE_DAYS", 30.0),
                max_summary_attempts: parse_env_or("KEEP_MAX_SUMMARY_ATTEMPTS", 5),
                stale_claim_secs: parse_env_or("KEEP_STALE_CLAIM_SECS", 600),
                retry_backoff_base_secs: parse_env_or("KEEP_RETRY_BACKOFF_BASE_SECS", 30),
                retry_backoff_max_secs: parse_env_or("KEEP_RETRY_BACKOFF_MAX_SECS", 3600),
                reconcile_wait_secs: parse_env_or("KEEP_RECONCILE_WAIT_SECS", 10),
                version_path_edges: parse_env_or("KEEP_VERSION_PATH_EDGES", false),
            },
            remote: env::var("KEEPNOTES_API_URL")
                .ok()
                .map(|api_url| RemoteConfig {
                    api_url,
                    api_key: env::var("KEEPNOTES_API_KEY").unwrap_or_default(),
                    project: env::var("KEEPNOTES_PROJECT").ok(),
                }),
            llm: env::var("KEEP_LLM_MODEL").ok().map(|model| LlmConfig {
                model,
                api_key: env::var("KEEP_LLM_API_KEY").ok(),
                base_url: env::var("KEEP_LLM_BASE_URL").ok(),
                timeout_secs: parse_env_or("KEEP_LLM_TIMEOUT_SECS", 30),
                max_retries: parse_env_or("KEEP_LLM_MAX_RETRIES", 3),
            }),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        if env::var("KEEP_NO_DOTENV").is_err() {
            let _ = dotenvy::dotenv();
        }
        Self::default()
    }

    pub fn env_tags(&self) -> std::collections::HashMap<String, String> {
        parse_env_tags()
    }
}

/// Known embedding/LLM providers addressed by an OpenAI-compatible API;
/// anything else is treated as a local in-process model, mirroring the
/// teacher's `parse_provider_model`/`KNOWN_PROVIDERS` convention.
const KNOWN_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

pub fn parse_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        if KNOWN_PROVIDERS.contains(&prefix.to_lowercase().as_str()) {
            return (prefix, rest);
        }
    }
    ("local", model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_when_env_unset() {
        std::env::remove_var("KEEP_MAX_SUMMARY_LENGTH");
        std::env::remove_var("KEEPNOTES_API_URL");
        let config = Config::default();
        assert_eq!(config.memory.max_summary_length, 500);
        assert_eq!(config.memory.max_summary_attempts, 5);
        assert!(config.remote.is_none());
    }

    #[test]
    #[serial]
    fn remote_config_from_env() {
        std::env::set_var("KEEPNOTES_API_URL", "https://api.keepnotes.ai");
        std::env::set_var("KEEPNOTES_API_KEY", "secret");
        let config = Config::default();
        assert!(config.remote.is_some());
        assert_eq!(config.remote.as_ref().unwrap().api_key, "secret");
        std::env::remove_var("KEEPNOTES_API_URL");
        std::env::remove_var("KEEPNOTES_API_KEY");
    }

    #[test]
    #[serial]
    fn env_tags_are_lowercased_and_stripped() {
        std::env::set_var("KEEP_TAG_PROJECT", "Acme");
        let config = Config::default();
        let tags = config.env_tags();
        assert_eq!(tags.get("project"), Some(&"Acme".to_string()));
        std::env::remove_var("KEEP_TAG_PROJECT");
    }

    #[test]
    fn provider_model_parsing() {
        assert_eq!(
            parse_provider_model("openai/text-embedding-3"),
            ("openai", "text-embedding-3")
        );
        assert_eq!(
            parse_provider_model("BAAI/bge-small-en-v1.5"),
            ("local", "BAAI/bge-small-en-v1.5")
        );
    }
}
