use super::*;
use std::io::Read;
use tempfile::TempDir;

fn input(item_id: &str, data_key: &str) -> SubTaskInput {
    SubTaskInput {
        item_id: item_id.to_string(),
        data_key: data_key.to_string(),
    }
}

#[test]
fn test_safe_relative_paths() {
    assert!(is_safe_relative("block-1"));
    assert!(is_safe_relative("exports/task-1/block-1"));
    assert!(!is_safe_relative(""));
    assert!(!is_safe_relative("/etc/passwd"));
    assert!(!is_safe_relative("../outside"));
    assert!(!is_safe_relative("a/../../b"));
    assert!(!is_safe_relative("a//b"));
    assert!(!is_safe_relative("a\\b"));
}

#[tokio::test]
async fn test_json_dir_resolver_loads_item() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join("block-1.json"),
        r#"{"name": "Hero", "content": {"type": "block"}}"#,
    )
    .unwrap();

    let resolver = JsonDirResolver::new(temp_dir.path());
    let item = resolver.resolve("block-1").await.unwrap().unwrap();
    assert_eq!(item.id, "block-1");
    assert_eq!(item.payload["name"], "Hero");
}

#[tokio::test]
async fn test_json_dir_resolver_missing_item_is_none() {
    let temp_dir = TempDir::new().unwrap();
    let resolver = JsonDirResolver::new(temp_dir.path());
    assert!(resolver.resolve("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_json_dir_resolver_rejects_traversal() {
    let temp_dir = TempDir::new().unwrap();
    let items = temp_dir.path().join("items");
    std::fs::create_dir_all(&items).unwrap();
    std::fs::write(temp_dir.path().join("secret.json"), "{}").unwrap();

    let resolver = JsonDirResolver::new(&items);
    assert!(resolver.resolve("../secret").await.unwrap().is_none());
    assert!(resolver.resolve("nested/item").await.unwrap().is_none());
}

#[tokio::test]
async fn test_json_dir_resolver_invalid_json_is_error() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("broken.json"), "not json").unwrap();

    let resolver = JsonDirResolver::new(temp_dir.path());
    let result = resolver.resolve("broken").await;
    assert!(matches!(result, Err(crate::Error::Serialization(_))));
}

#[tokio::test]
async fn test_zip_exporter_writes_archive() {
    let temp_dir = TempDir::new().unwrap();
    let exporter = ZipExporter::new(temp_dir.path());

    let item = Item {
        id: "block-7".to_string(),
        payload: serde_json::json!({"name": "Footer"}),
    };
    let output = exporter
        .process(&item, &input("block-7", "task-1/block-7"))
        .await
        .unwrap();

    assert_eq!(output.key, "task-1/block-7.zip");
    assert!(output.message.contains("block-7"));

    let archive_path = temp_dir.path().join(&output.key);
    let file = std::fs::File::open(&archive_path).unwrap();
    let mut archive = ::zip::ZipArchive::new(file).unwrap();
    assert_eq!(archive.len(), 1);

    let mut entry = archive.by_name("block-7.json").unwrap();
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    let value: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(value["name"], "Footer");
}

#[tokio::test]
async fn test_zip_exporter_rejects_escaping_key() {
    let temp_dir = TempDir::new().unwrap();
    let exporter = ZipExporter::new(temp_dir.path().join("exports"));

    let item = Item {
        id: "block-1".to_string(),
        payload: serde_json::json!({}),
    };
    let result = exporter.process(&item, &input("block-1", "../escape")).await;
    assert!(matches!(result, Err(crate::Error::Processor(_))));
    assert!(!temp_dir.path().join("escape.zip").exists());
}
