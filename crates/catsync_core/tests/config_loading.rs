use catsync_core::config::DEFAULT_CONFIG_FILE;
use catsync_core::{load_connection_config, ConfigError};
use std::fs;
use std::path::Path;

const FULL: &str = r#"{
    "source_catmaid_url": "https://fanc.catmaid.example",
    "source_catmaid_account_to_use": "tracer",
    "source_project_id": 13,
    "target_catmaid_url": "https://template.catmaid.example",
    "target_catmaid_account_to_use": "uploader",
    "target_project_id": 59,
    "catmaid_account_api_keys": {"tracer": "abc", "uploader": "def"},
    "catmaid_http_username": "lab",
    "catmaid_http_password": "secret"
}"#;

fn write(dir: &Path, name: &str, text: &str) {
    fs::write(dir.join(name), text).unwrap();
}

#[test]
fn builtin_nickname_resolves_inside_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "virtualflybrain_FANC.json", FULL);

    let (path, config) = load_connection_config("VNC", dir.path()).unwrap();
    assert_eq!(path, dir.path().join("virtualflybrain_FANC.json"));

    let resolved = config.resolve("virtualflybrain_FANC.json").unwrap();
    assert_eq!(resolved.source.project_id, 13);
    assert_eq!(resolved.source.credentials.api_token, "abc");
    assert_eq!(resolved.source.credentials.http_user.as_deref(), Some("lab"));
    let target = resolved.target.unwrap();
    assert_eq!(target.url, "https://template.catmaid.example");
    assert_eq!(target.credentials.api_token, "def");
    assert!(resolved.target_warning.is_none());
}

#[test]
fn default_config_file_is_loaded_by_name() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), DEFAULT_CONFIG_FILE, FULL);
    let (path, _) = load_connection_config(DEFAULT_CONFIG_FILE, dir.path()).unwrap();
    assert_eq!(path, dir.path().join(DEFAULT_CONFIG_FILE));
}

#[test]
fn partial_target_is_dropped_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "partial.json",
        r#"{
            "source_catmaid_url": "https://a",
            "source_catmaid_account_to_use": "me",
            "source_project_id": 1,
            "target_project_id": 2,
            "catmaid_account_api_keys": {"me": "token"}
        }"#,
    );

    let (_, config) = load_connection_config("partial.json", dir.path()).unwrap();
    let resolved = config.resolve("partial.json").unwrap();
    assert!(resolved.target.is_none());
    let warning = resolved.target_warning.unwrap();
    assert!(warning.contains("partial.json"));
    assert!(warning.contains("target_catmaid_url"));
}

#[test]
fn account_without_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "nokey.json",
        r#"{
            "source_catmaid_url": "https://a",
            "source_catmaid_account_to_use": "ghost",
            "source_project_id": 1
        }"#,
    );

    let (_, config) = load_connection_config("nokey.json", dir.path()).unwrap();
    match config.resolve("nokey.json") {
        Err(ConfigError::UnknownAccount(account)) => assert_eq!(account, "ghost"),
        other => panic!("expected unknown account, got {other:?}"),
    }
}

#[test]
fn malformed_json_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "broken.json", "{ not json");

    let err = load_connection_config("broken.json", dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("broken.json"));
}
