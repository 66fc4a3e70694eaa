//! Integration tests for the local filesystem provider

use std::path::Path;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use common::error::ProviderError;
use common::item::{ItemType, MetadataValue};
use common::provider::{Context, ProviderBase};
use stratus_local::LocalProvider;

fn ctx() -> Context {
    Context {
        uid: 1000,
        pid: 4242,
        security_label: "unconfined".to_owned(),
    }
}

fn setup() -> (LocalProvider, TempDir) {
    let temp = TempDir::new().unwrap();
    let provider = LocalProvider::new(temp.path()).unwrap();
    (provider, temp)
}

fn id_of(path: &Path) -> String {
    path.canonicalize().unwrap().display().to_string()
}

fn client_stream(fd: std::os::fd::OwnedFd) -> UnixStream {
    UnixStream::from_std(std::os::unix::net::UnixStream::from(fd)).unwrap()
}

#[tokio::test]
async fn roots_returns_the_configured_directory() {
    let (provider, temp) = setup();
    let roots = provider.roots(&ctx()).await.unwrap();
    assert_eq!(roots.len(), 1);
    let root = &roots[0];
    assert_eq!(root.item_type, ItemType::Root);
    assert_eq!(root.parent_id, "");
    assert_eq!(root.item_id, id_of(temp.path()));
    assert!(!root.etag.is_empty());
}

#[tokio::test]
async fn list_returns_children_with_the_right_parent() {
    let (provider, temp) = setup();
    std::fs::write(temp.path().join("a.txt"), b"aaa").unwrap();
    std::fs::write(temp.path().join("b.txt"), b"bb").unwrap();
    std::fs::create_dir(temp.path().join("sub")).unwrap();
    // spool files never show up in listings
    std::fs::write(temp.path().join(".stratus-upload-zzz"), b"x").unwrap();

    let root_id = id_of(temp.path());
    let (items, next_token) = provider.list(&root_id, "", &ctx()).await.unwrap();
    assert_eq!(next_token, "");
    let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, ["a.txt", "b.txt", "sub"]);
    assert!(items.iter().all(|i| i.parent_id == root_id));
    assert_eq!(items[2].item_type, ItemType::Folder);

    let file = &items[0];
    assert_eq!(file.item_type, ItemType::File);
    assert_eq!(
        file.metadata.get("size_in_bytes"),
        Some(&MetadataValue::Int64(3))
    );
    assert!(matches!(
        file.metadata.get("last_modified_time"),
        Some(MetadataValue::String(_))
    ));
}

#[tokio::test]
async fn list_rejects_page_tokens() {
    let (provider, temp) = setup();
    let err = provider
        .list(&id_of(temp.path()), "bogus", &ctx())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ProviderError::LogicError("Unknown page token".to_owned())
    );
}

#[tokio::test]
async fn lookup_hits_and_misses() {
    let (provider, temp) = setup();
    std::fs::write(temp.path().join("hit.txt"), b"x").unwrap();
    let root_id = id_of(temp.path());

    let found = provider.lookup(&root_id, "hit.txt", &ctx()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "hit.txt");

    let missing = provider.lookup(&root_id, "miss.txt", &ctx()).await.unwrap();
    assert!(missing.is_empty());
}

#[tokio::test]
async fn create_folder_twice_is_exists() {
    let (provider, temp) = setup();
    let root_id = id_of(temp.path());

    let folder = provider
        .create_folder(&root_id, "photos", &ctx())
        .await
        .unwrap();
    assert_eq!(folder.item_type, ItemType::Folder);
    assert_eq!(folder.parent_id, root_id);

    let err = provider
        .create_folder(&root_id, "photos", &ctx())
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::Exists("photos".to_owned()));
}

#[tokio::test]
async fn upload_roundtrip_writes_the_file() {
    let (provider, temp) = setup();
    let root_id = id_of(temp.path());

    let mut job = provider
        .create_file(&root_id, "hello.txt", 5, "text/plain", false, &ctx())
        .await
        .unwrap();
    let mut stream = client_stream(job.take_client_socket().unwrap());
    stream.write_all(b"hello").await.unwrap();
    drop(stream);

    let item = job.finish().await.unwrap();
    assert_eq!(item.item_type, ItemType::File);
    assert_eq!(item.title, "hello.txt");
    assert_eq!(
        std::fs::read(temp.path().join("hello.txt")).unwrap(),
        b"hello"
    );
}

#[tokio::test]
async fn short_upload_is_a_logic_error_and_leaves_no_spool() {
    let (provider, temp) = setup();
    let root_id = id_of(temp.path());

    let mut job = provider
        .create_file(&root_id, "f.bin", 10, "application/octet-stream", false, &ctx())
        .await
        .unwrap();
    let mut stream = client_stream(job.take_client_socket().unwrap());
    stream.write_all(b"abc").await.unwrap();
    drop(stream);

    let err = job.finish().await.unwrap_err();
    assert_eq!(
        err,
        ProviderError::LogicError("too few bytes written".to_owned())
    );
    assert!(!temp.path().join("f.bin").exists());
    let leftovers: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "spool file should be cleaned up");
}

#[tokio::test]
async fn cancelled_upload_leaves_nothing_behind() {
    let (provider, temp) = setup();
    let root_id = id_of(temp.path());

    let mut job = provider
        .create_file(&root_id, "f.bin", 10, "application/octet-stream", false, &ctx())
        .await
        .unwrap();
    let _fd = job.take_client_socket().unwrap();
    job.cancel().await.unwrap();

    assert!(!temp.path().join("f.bin").exists());
    let leftovers: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn create_file_honours_allow_overwrite() {
    let (provider, temp) = setup();
    std::fs::write(temp.path().join("taken.txt"), b"old").unwrap();
    let root_id = id_of(temp.path());

    let err = provider
        .create_file(&root_id, "taken.txt", 3, "text/plain", false, &ctx())
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::Exists("taken.txt".to_owned()));

    // with overwrite allowed the upload replaces the content
    let mut job = provider
        .create_file(&root_id, "taken.txt", 3, "text/plain", true, &ctx())
        .await
        .unwrap();
    let mut stream = client_stream(job.take_client_socket().unwrap());
    stream.write_all(b"new").await.unwrap();
    drop(stream);
    job.finish().await.unwrap();
    assert_eq!(
        std::fs::read(temp.path().join("taken.txt")).unwrap(),
        b"new"
    );
}

#[tokio::test]
async fn update_checks_the_etag() {
    let (provider, temp) = setup();
    std::fs::write(temp.path().join("doc.txt"), b"v1").unwrap();
    let file_id = id_of(&temp.path().join("doc.txt"));

    let err = provider
        .update(&file_id, 2, "stale-etag", &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Conflict(_)));

    let current = provider.metadata(&file_id, &ctx()).await.unwrap().etag;
    let mut job = provider.update(&file_id, 2, &current, &ctx()).await.unwrap();
    let mut stream = client_stream(job.take_client_socket().unwrap());
    stream.write_all(b"v2").await.unwrap();
    drop(stream);
    job.finish().await.unwrap();
    assert_eq!(std::fs::read(temp.path().join("doc.txt")).unwrap(), b"v2");
}

#[tokio::test]
async fn download_streams_the_file() {
    let (provider, temp) = setup();
    std::fs::write(temp.path().join("payload.bin"), b"Hello world").unwrap();
    let file_id = id_of(&temp.path().join("payload.bin"));

    let mut job = provider.download(&file_id, &ctx()).await.unwrap();
    let mut stream = client_stream(job.take_client_socket().unwrap());
    let mut payload = Vec::new();
    stream.read_to_end(&mut payload).await.unwrap();
    assert_eq!(payload, b"Hello world");

    job.finish().await.unwrap();
}

#[tokio::test]
async fn delete_files_and_folders() {
    let (provider, temp) = setup();
    std::fs::write(temp.path().join("f.txt"), b"x").unwrap();
    std::fs::create_dir(temp.path().join("d")).unwrap();
    std::fs::write(temp.path().join("d/nested.txt"), b"y").unwrap();

    provider
        .delete_item(&id_of(&temp.path().join("f.txt")), &ctx())
        .await
        .unwrap();
    provider
        .delete_item(&id_of(&temp.path().join("d")), &ctx())
        .await
        .unwrap();
    assert!(!temp.path().join("f.txt").exists());
    assert!(!temp.path().join("d").exists());

    let err = provider
        .delete_item(&id_of(temp.path()), &ctx())
        .await
        .unwrap_err();
    assert_eq!(err, ProviderError::LogicError("cannot delete root".to_owned()));
}

#[tokio::test]
async fn move_and_copy_items() {
    let (provider, temp) = setup();
    std::fs::write(temp.path().join("orig.txt"), b"data").unwrap();
    std::fs::create_dir(temp.path().join("dir")).unwrap();
    std::fs::write(temp.path().join("dir/inner.txt"), b"inner").unwrap();
    let root_id = id_of(temp.path());

    let moved = provider
        .move_item(
            &id_of(&temp.path().join("orig.txt")),
            &root_id,
            "renamed.txt",
            &ctx(),
        )
        .await
        .unwrap();
    assert_eq!(moved.title, "renamed.txt");
    assert!(!temp.path().join("orig.txt").exists());
    assert_eq!(
        std::fs::read(temp.path().join("renamed.txt")).unwrap(),
        b"data"
    );

    let copied = provider
        .copy_item(&id_of(&temp.path().join("dir")), &root_id, "dir2", &ctx())
        .await
        .unwrap();
    assert_eq!(copied.item_type, ItemType::Folder);
    assert_eq!(
        std::fs::read(temp.path().join("dir2/inner.txt")).unwrap(),
        b"inner"
    );
    // the original is still there
    assert!(temp.path().join("dir/inner.txt").exists());
}

#[tokio::test]
async fn relative_ids_are_invalid_arguments() {
    let (provider, _temp) = setup();
    let err = provider.metadata("not/absolute", &ctx()).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidArgument(_)));
}

#[tokio::test]
async fn ids_outside_the_root_are_denied() {
    let (provider, _temp) = setup();
    let err = provider.metadata("/etc/passwd", &ctx()).await.unwrap_err();
    assert!(matches!(err, ProviderError::PermissionDenied(_)));
}

#[tokio::test]
async fn traversing_ids_are_invalid_arguments() {
    let (provider, temp) = setup();
    let sneaky = format!("{}/../outside", id_of(temp.path()));
    let err = provider.metadata(&sneaky, &ctx()).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidArgument(_)));
}

#[tokio::test]
async fn reserved_names_are_rejected() {
    let (provider, temp) = setup();
    let err = provider
        .create_file(
            &id_of(temp.path()),
            ".stratus-upload-sneaky",
            1,
            "text/plain",
            true,
            &ctx(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidArgument(_)));
}
