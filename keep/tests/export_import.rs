mod common;

use std::collections::HashMap;

use keep::cli::{Command, DataAction};
use keep::keeper::PutOptions;

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("keep-export-import-test-{name}-{}.json", std::process::id()))
}

#[tokio::test]
async fn export_then_import_round_trips_documents_into_a_fresh_collection() {
    let source = common::test_keeper("source").await;
    let tags = HashMap::from([("project".to_string(), "keep".to_string())]);
    source
        .put("first summary", PutOptions { id: Some("doc-1".to_string()), tags: tags.clone(), ..Default::default() })
        .await
        .unwrap();
    source
        .put("second summary", PutOptions { id: Some("doc-1".to_string()), tags, ..Default::default() })
        .await
        .unwrap();

    let file = temp_path("roundtrip");
    keep::cli::run(&source, Command::Data { action: DataAction::Export { file: file.to_string_lossy().into_owned() } })
        .await
        .unwrap();

    let target = common::test_keeper("target").await;
    keep::cli::run(
        &target,
        Command::Data { action: DataAction::Import { file: file.to_string_lossy().into_owned(), mode: "merge".to_string() } },
    )
    .await
    .unwrap();

    let imported = target.get("doc-1", Default::default()).await.unwrap().unwrap();
    assert_eq!(imported.summary, "second summary");
    assert_eq!(imported.tags.get("project").unwrap(), "keep");

    let versions = target.get_context("doc-1", Default::default()).await.unwrap().unwrap();
    assert_eq!(versions.prev.len(), 1);

    let _ = std::fs::remove_file(&file);
}

#[tokio::test]
async fn import_replace_mode_clears_the_collection_first() {
    let target = common::test_keeper("replace-target").await;
    target
        .put("stale content", PutOptions { id: Some("stale-doc".to_string()), ..Default::default() })
        .await
        .unwrap();

    let source = common::test_keeper("replace-source").await;
    source
        .put("fresh content", PutOptions { id: Some("fresh-doc".to_string()), ..Default::default() })
        .await
        .unwrap();

    let file = temp_path("replace");
    keep::cli::run(&source, Command::Data { action: DataAction::Export { file: file.to_string_lossy().into_owned() } })
        .await
        .unwrap();
    keep::cli::run(
        &target,
        Command::Data { action: DataAction::Import { file: file.to_string_lossy().into_owned(), mode: "replace".to_string() } },
    )
    .await
    .unwrap();

    assert!(target.get("stale-doc", Default::default()).await.unwrap().is_none());
    assert!(target.get("fresh-doc", Default::default()).await.unwrap().is_some());

    let _ = std::fs::remove_file(&file);
}

#[tokio::test]
async fn import_rejects_an_unknown_mode() {
    let keeper = common::test_keeper("bad-mode").await;
    let file = temp_path("bad-mode");
    std::fs::write(&file, r#"{"documents": []}"#).unwrap();

    let result = keep::cli::run(
        &keeper,
        Command::Data { action: DataAction::Import { file: file.to_string_lossy().into_owned(), mode: "overwrite".to_string() } },
    )
    .await;
    assert!(result.is_err());

    let _ = std::fs::remove_file(&file);
}
