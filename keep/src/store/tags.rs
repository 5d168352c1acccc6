use crate::error::{KeepError, Result};
use url::Url;

pub const MAX_ID_LENGTH: usize = 1024;
pub const MAX_TAG_KEY_LENGTH: usize = 128;
pub const MAX_TAG_VALUE_LENGTH: usize = 4096;

fn tag_key_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_-]*$").unwrap())
}

fn id_blocked_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r#"[\x00-\x1f\x7f\\`<>|;"']"#).unwrap())
}

/// Validate a tag key is safe for JSON path queries (original_source
/// `types.py::validate_tag_key`).
pub fn validate_tag_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_TAG_KEY_LENGTH {
        return Err(KeepError::invalid(format!(
            "tag key must be 1-{MAX_TAG_KEY_LENGTH} characters: {key:?}"
        )));
    }
    if !tag_key_re().is_match(key) {
        let mut msg = format!("tag key contains invalid characters (allowed: a-z, 0-9, _, -): {key:?}");
        if let Some((k, v)) = key.split_once(':') {
            msg.push_str(&format!(". Use separate key and value: tags={{'{k}': '{v}'}}"));
        }
        return Err(KeepError::invalid(msg));
    }
    Ok(())
}

pub fn validate_tag_value(value: &str) -> Result<()> {
    if value.len() > MAX_TAG_VALUE_LENGTH {
        return Err(KeepError::invalid(format!(
            "tag value exceeds {MAX_TAG_VALUE_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Validate a document id: length and no dangerous characters
/// (original_source `types.py::validate_id`).
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        return Err(KeepError::invalid(format!(
            "id must be 1-{MAX_ID_LENGTH} characters"
        )));
    }
    if id_blocked_re().is_match(id) {
        return Err(KeepError::invalid(format!("id contains invalid characters: {id:?}")));
    }
    if id.contains("@v") || id.contains("@p") {
        return Err(KeepError::invalid(
            "id must not contain @v or @p; parts and versions are sub-entries, never standalone",
        ));
    }
    Ok(())
}

/// Validate and normalize a document id. HTTP/HTTPS URIs get RFC 3986
/// §6.2.2 syntax-based normalization so equivalent URIs map to the same id
/// (original_source `types.py::normalize_id`).
pub fn normalize_id(id: &str) -> Result<String> {
    validate_id(id)?;
    let lower_prefix = id.get(0..8).unwrap_or(id).to_lowercase();
    if lower_prefix.starts_with("http://") || lower_prefix.starts_with("https://") {
        return normalize_http_uri(id);
    }
    Ok(id.to_string())
}

fn normalize_http_uri(uri: &str) -> Result<String> {
    let mut url = Url::parse(uri).map_err(KeepError::from)?;

    let scheme = url.scheme().to_lowercase();
    let _ = url.set_scheme(&scheme);

    if let Some(host) = url.host_str() {
        let host = host.to_lowercase();
        let _ = url.set_host(Some(&host));
    }

    let default_port = match scheme.as_str() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if url.port() == default_port {
        let _ = url.set_port(None);
    }

    let resolved_path = resolve_dot_segments(url.path());
    url.set_path(&resolved_path);

    Ok(url.to_string())
}

/// Remove dot segments from a URI path (RFC 3986 section 5.2.4).
fn resolve_dot_segments(path: &str) -> String {
    let mut output: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "." => continue,
            ".." => {
                if output.last().map(|s| !s.is_empty()).unwrap_or(false) {
                    output.pop();
                }
            }
            other => output.push(other),
        }
    }
    let mut resolved = output.join("/");
    if path.starts_with('/') && !resolved.starts_with('/') {
        resolved = format!("/{resolved}");
    }
    if resolved.is_empty() {
        resolved = "/".to_string();
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_key_validation_rejects_colon() {
        assert!(validate_tag_key("project:name").is_err());
        assert!(validate_tag_key("project-name").is_ok());
    }

    #[test]
    fn id_rejects_part_and_version_suffixes() {
        assert!(validate_id("doc@p3").is_err());
        assert!(validate_id("doc@v3").is_err());
        assert!(validate_id("doc").is_ok());
    }

    #[test]
    fn id_rejects_control_and_shell_chars() {
        assert!(validate_id("has\"quote").is_err());
        assert!(validate_id("has;semicolon").is_err());
        assert!(validate_id("plain-id_1").is_ok());
    }

    #[test]
    fn normalize_http_uri_strips_default_port_and_dot_segments() {
        let normalized = normalize_id("HTTPS://Example.COM:443/a/../b").unwrap();
        assert_eq!(normalized, "https://example.com/b");
    }

    #[test]
    fn normalize_id_is_idempotent() {
        let once = normalize_id("HTTPS://Example.COM:443/a/../b").unwrap();
        let twice = normalize_id(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn non_uri_ids_pass_through_unchanged() {
        assert_eq!(normalize_id("my-note").unwrap(), "my-note");
    }
}
