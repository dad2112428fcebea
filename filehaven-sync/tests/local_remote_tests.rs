mod common;

use common::credentials;
use filehaven_sync::{ByteRange, ChangeAction, Credentials, LocalFolderRemoteStore, RemoteStore, SyncError, UploadMeta};
use filehaven_types::DeviceId;
use std::time::SystemTime;
use tempfile::TempDir;

fn meta(version: u64, device: &str) -> UploadMeta {
    UploadMeta {
        version,
        device_id: DeviceId::new(device),
        modified_at: SystemTime::now(),
    }
}

#[tokio::test]
async fn starts_unauthenticated() {
    let dir = TempDir::new().unwrap();
    let store = LocalFolderRemoteStore::new(dir.path());
    assert!(!store.is_authenticated());

    store.authenticate(&credentials()).await.unwrap();
    assert!(store.is_authenticated());
}

#[tokio::test]
async fn upload_list_download_delete_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = LocalFolderRemoteStore::new(dir.path());
    store.authenticate(&credentials()).await.unwrap();

    let content = b"hello haven";
    let entry = store
        .upload("/docs/hello.txt", content, &meta(1, "phone"))
        .await
        .unwrap();
    assert_eq!(entry.path, "/docs/hello.txt");
    assert_eq!(entry.size, content.len() as u64);
    assert_eq!(entry.version, 1);
    assert_eq!(entry.device_id, DeviceId::new("phone"));
    assert!(entry.content_hash.is_some());

    let listed = store.list("/docs").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "hello.txt");

    let downloaded = store.download("/docs/hello.txt", None).await.unwrap();
    assert_eq!(downloaded.bytes, content);
    assert_eq!(downloaded.offset, 0);
    assert_eq!(downloaded.total_size, Some(content.len() as u64));

    store.delete("/docs/hello.txt").await.unwrap();
    assert!(store.list("/docs").await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_of_missing_path_succeeds() {
    let dir = TempDir::new().unwrap();
    let store = LocalFolderRemoteStore::new(dir.path());
    store.authenticate(&credentials()).await.unwrap();
    store.delete("/never/was.txt").await.unwrap();
}

#[tokio::test]
async fn download_missing_path_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = LocalFolderRemoteStore::new(dir.path());
    store.authenticate(&credentials()).await.unwrap();

    let err = store.download("/nope.txt", None).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

#[tokio::test]
async fn ranged_download_serves_requested_suffix() {
    let dir = TempDir::new().unwrap();
    let store = LocalFolderRemoteStore::new(dir.path());
    store.authenticate(&credentials()).await.unwrap();

    let content: Vec<u8> = (0..=255).collect();
    store.upload("/bin.dat", &content, &meta(1, "phone")).await.unwrap();

    let tail = store
        .download("/bin.dat", Some(ByteRange::starting_at(200)))
        .await
        .unwrap();
    assert_eq!(tail.offset, 200);
    assert_eq!(tail.bytes, &content[200..]);
    assert_eq!(tail.total_size, Some(256));
}

#[tokio::test]
async fn ignoring_ranges_serves_full_content() {
    let dir = TempDir::new().unwrap();
    let store = LocalFolderRemoteStore::new(dir.path());
    store.authenticate(&credentials()).await.unwrap();
    store.upload("/a.txt", b"full body", &meta(1, "phone")).await.unwrap();

    store.set_ignore_ranges(true);
    let served = store
        .download("/a.txt", Some(ByteRange::starting_at(4)))
        .await
        .unwrap();
    assert_eq!(served.offset, 0);
    assert_eq!(served.bytes, b"full body");
}

#[tokio::test]
async fn change_feed_advances_with_checkpoints() {
    let dir = TempDir::new().unwrap();
    let store = LocalFolderRemoteStore::new(dir.path());
    store.authenticate(&credentials()).await.unwrap();

    let initial = store.get_changes(None).await.unwrap();
    assert!(initial.changes.is_empty());
    let checkpoint = initial.next_checkpoint.unwrap();

    store.upload("/a.txt", b"one", &meta(1, "phone")).await.unwrap();
    store.upload("/a.txt", b"two", &meta(2, "phone")).await.unwrap();
    store.delete("/a.txt").await.unwrap();

    let set = store.get_changes(Some(&checkpoint)).await.unwrap();
    let actions: Vec<_> = set.changes.iter().map(|c| c.action).collect();
    assert_eq!(
        actions,
        vec![ChangeAction::Created, ChangeAction::Modified, ChangeAction::Deleted]
    );
    assert!(set.changes[0].entry.is_some());
    assert!(set.changes[2].entry.is_none());

    // Consuming from the new checkpoint yields nothing further.
    let next = set.next_checkpoint.unwrap();
    assert!(store.get_changes(Some(&next)).await.unwrap().changes.is_empty());
}

#[tokio::test]
async fn rename_journals_delete_and_create() {
    let dir = TempDir::new().unwrap();
    let store = LocalFolderRemoteStore::new(dir.path());
    store.authenticate(&credentials()).await.unwrap();

    store.upload("/old.txt", b"data", &meta(3, "phone")).await.unwrap();
    let checkpoint = store.get_changes(None).await.unwrap().next_checkpoint.unwrap();

    store.rename("/old.txt", "/new.txt").await.unwrap();

    let set = store.get_changes(Some(&checkpoint)).await.unwrap();
    assert_eq!(set.changes.len(), 2);
    assert_eq!(set.changes[0].action, ChangeAction::Deleted);
    assert_eq!(set.changes[0].path, "/old.txt");
    assert_eq!(set.changes[1].action, ChangeAction::Created);
    assert_eq!(set.changes[1].path, "/new.txt");

    let moved = store.download("/new.txt", None).await.unwrap();
    assert_eq!(moved.bytes, b"data");
}

#[tokio::test]
async fn path_traversal_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = LocalFolderRemoteStore::new(dir.path());
    store.authenticate(&credentials()).await.unwrap();

    let err = store
        .upload("/../escape.txt", b"x", &meta(1, "phone"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Precondition(_)));
}

#[tokio::test]
async fn create_folder_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = LocalFolderRemoteStore::new(dir.path());
    store.authenticate(&credentials()).await.unwrap();

    store.create_folder("/photos").await.unwrap();
    store.create_folder("/photos").await.unwrap();

    let set = store.get_changes(None).await.unwrap();
    // Only the first creation is journalled.
    assert_eq!(set.changes.len(), 1);
}

#[tokio::test]
async fn credentials_serde_roundtrip() {
    // Credentials round-trip through serde for keychain storage.
    let creds = Credentials {
        account: "a".into(),
        secret: "b".into(),
    };
    let json = serde_json::to_string(&creds).unwrap();
    let back: Credentials = serde_json::from_str(&json).unwrap();
    assert_eq!(back.account, "a");
}
