//! VikingFS interface tests against the in-memory blob store.

use std::sync::Arc;

use openviking_core::config::VectorDbConfig;
use openviking_core::traits::BlobStore;
use openviking_core::{RequestContext, Role, UserIdentifier};
use openviking_storage::{MemoryBlobStore, VectorIndexBackend, context_collection};
use openviking_vfs::VikingFS;

async fn viking_fs(dir: &tempfile::TempDir) -> Arc<VikingFS> {
    let mut config = VectorDbConfig::default();
    config.path = Some(dir.path().to_string_lossy().into_owned());
    let index = Arc::new(VectorIndexBackend::new(&config, 2).unwrap());
    index
        .create_collection("context", context_collection("context", 2))
        .await
        .unwrap();
    let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    Arc::new(VikingFS::new(blob, index))
}

fn ctx() -> RequestContext {
    RequestContext::new(UserIdentifier::new("acme", "u1", "a1"), Role::User)
}

#[tokio::test]
async fn test_file_operations() {
    let dir = tempfile::tempdir().unwrap();
    let vfs = viking_fs(&dir).await;
    let ctx = ctx();
    let test_uri = "viking://temp/binding_file.txt";
    let test_content = "Hello VikingFS Binding!";

    vfs.write(test_uri, test_content.as_bytes(), Some(&ctx)).await.unwrap();

    let stat_info = vfs.stat(test_uri, Some(&ctx)).await.unwrap();
    assert_eq!(stat_info.name, "binding_file.txt");
    assert!(!stat_info.is_dir);

    let entries = vfs.ls("viking://temp", false, Some(&ctx)).await.unwrap();
    assert!(entries.iter().any(|e| e.name == "binding_file.txt"));

    let read_data = vfs.read(test_uri, Some(&ctx)).await.unwrap();
    assert_eq!(String::from_utf8(read_data).unwrap(), test_content);

    vfs.rm(test_uri, false, Some(&ctx)).await.unwrap();
    assert!(!vfs.exists(test_uri, Some(&ctx)).await.unwrap());
}

#[tokio::test]
async fn test_directory_operations() {
    let dir = tempfile::tempdir().unwrap();
    let vfs = viking_fs(&dir).await;
    let ctx = ctx();
    let test_dir_uri = "viking://temp/binding_dir";

    vfs.mkdir(test_dir_uri, Some(&ctx)).await.unwrap();

    let stat_info = vfs.stat(test_dir_uri, Some(&ctx)).await.unwrap();
    assert_eq!(stat_info.name, "binding_dir");
    assert!(stat_info.is_dir);

    let root_entries = vfs.ls("viking://temp", false, Some(&ctx)).await.unwrap();
    assert!(root_entries.iter().any(|e| e.name == "binding_dir" && e.is_dir));

    let file_uri = format!("{test_dir_uri}/inner.txt");
    vfs.write(&file_uri, b"inner content", Some(&ctx)).await.unwrap();

    let sub_entries = vfs.ls(test_dir_uri, false, Some(&ctx)).await.unwrap();
    assert!(sub_entries.iter().any(|e| e.name == "inner.txt"));

    vfs.rm(test_dir_uri, true, Some(&ctx)).await.unwrap();
    let root_entries = vfs.ls("viking://temp", false, Some(&ctx)).await.unwrap();
    assert!(!root_entries.iter().any(|e| e.name == "binding_dir"));
}

#[tokio::test]
async fn test_tree_operations() {
    let dir = tempfile::tempdir().unwrap();
    let vfs = viking_fs(&dir).await;
    let ctx = ctx();
    let leaf_uri = "viking://temp/tree_test/a/b/leaf.txt";

    vfs.write(leaf_uri, b"leaf content", Some(&ctx)).await.unwrap();

    let entries = vfs.tree("viking://temp/tree_test", Some(&ctx)).await.unwrap();
    assert!(entries.iter().any(|e| e.uri.contains("leaf.txt")));
    assert!(entries.iter().any(|e| e.is_dir && e.uri.ends_with("/a/b")));

    vfs.rm("viking://temp/tree_test", true, Some(&ctx)).await.unwrap();
}

#[tokio::test]
async fn test_binary_operations() {
    let dir = tempfile::tempdir().unwrap();
    let vfs = viking_fs(&dir).await;
    let ctx = ctx();
    let test_uri = "viking://temp/binding_binary.bin";
    let test_content: Vec<u8> = (0..=255u8).collect();

    vfs.write(test_uri, &test_content, Some(&ctx)).await.unwrap();

    let read_data = vfs.read(test_uri, Some(&ctx)).await.unwrap();
    assert_eq!(read_data, test_content);

    vfs.rm(test_uri, false, Some(&ctx)).await.unwrap();
}
