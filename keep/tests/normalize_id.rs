use keep::store::{normalize_id, validate_id, validate_tag_key, validate_tag_value};

#[test]
fn rejects_empty_and_oversized_ids() {
    assert!(validate_id("").is_err());
    let oversized = "x".repeat(1025);
    assert!(validate_id(&oversized).is_err());
}

#[test]
fn rejects_ids_with_control_characters() {
    assert!(validate_id("doc\u{0001}id").is_err());
    assert!(validate_id("doc`id").is_err());
}

#[test]
fn rejects_ids_shaped_like_version_or_part_sub_entries() {
    assert!(validate_id("note@v3").is_err());
    assert!(validate_id("note@p1").is_err());
}

#[test]
fn plain_ids_pass_through_unchanged() {
    assert_eq!(normalize_id("project-notes").unwrap(), "project-notes");
    assert_eq!(normalize_id(".now").unwrap(), ".now");
}

#[test]
fn http_uris_are_syntax_normalized() {
    let normalized = normalize_id("HTTP://Example.com:80/Path/").unwrap();
    assert_eq!(normalized, "http://example.com/Path/");
}

#[test]
fn https_default_port_is_stripped() {
    let normalized = normalize_id("https://example.com:443/a").unwrap();
    assert_eq!(normalized, "https://example.com/a");
}

#[test]
fn tag_keys_must_be_identifier_shaped() {
    assert!(validate_tag_key("project").is_ok());
    assert!(validate_tag_key("project:name").is_err());
    assert!(validate_tag_key("").is_err());
}

#[test]
fn tag_values_bounded_by_length() {
    assert!(validate_tag_value("short").is_ok());
    let oversized = "x".repeat(5000);
    assert!(validate_tag_value(&oversized).is_err());
}
