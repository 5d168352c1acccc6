use keep::config::RemoteConfig;
use keep::processors::TaskClient;

#[test]
fn rejects_a_non_https_remote_url() {
    let config = RemoteConfig {
        api_url: "http://example.com".to_string(),
        api_key: "secret".to_string(),
        project: None,
    };
    assert!(TaskClient::new(&config).is_err());
}

#[test]
fn allows_plain_http_on_localhost() {
    let config = RemoteConfig {
        api_url: "http://localhost:8080".to_string(),
        api_key: "secret".to_string(),
        project: None,
    };
    assert!(TaskClient::new(&config).is_ok());
}

#[test]
fn allows_plain_http_on_loopback_ip() {
    let config = RemoteConfig {
        api_url: "http://127.0.0.1:8080".to_string(),
        api_key: "secret".to_string(),
        project: None,
    };
    assert!(TaskClient::new(&config).is_ok());
}

#[test]
fn accepts_https_urls_unconditionally() {
    let config = RemoteConfig {
        api_url: "https://keepnotes.ai".to_string(),
        api_key: "secret".to_string(),
        project: Some("my-project".to_string()),
    };
    assert!(TaskClient::new(&config).is_ok());
}

#[test]
fn rejects_a_malformed_url() {
    let config = RemoteConfig {
        api_url: "not a url at all".to_string(),
        api_key: "secret".to_string(),
        project: None,
    };
    assert!(TaskClient::new(&config).is_err());
}

#[test]
fn rejects_an_api_key_with_invalid_header_characters() {
    let config = RemoteConfig {
        api_url: "https://keepnotes.ai".to_string(),
        api_key: "bad\nkey".to_string(),
        project: None,
    };
    assert!(TaskClient::new(&config).is_err());
}
