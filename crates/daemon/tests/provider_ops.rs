//! Integration tests for the non-streaming provider operations

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use common::error::{ProviderError, Result};
use common::item::{Item, ItemType};
use common::provider::{Context, DownloadJob, ItemList, ProviderBase, UploadJob};
use common::testkit::TestProvider;
use stratus_daemon::testkit::FakeAccountsManager;

use support::{dispatcher_for, online_dispatcher, test_dispatcher, PEER};

#[tokio::test]
async fn roots_returns_the_single_root() {
    let dispatcher = test_dispatcher();
    let roots = dispatcher.roots(PEER).await.unwrap();
    assert_eq!(roots.len(), 1);
    let root = &roots[0];
    assert_eq!(root.item_id, "root_id");
    assert_eq!(root.parent_id, "");
    assert_eq!(root.title, "Root");
    assert_eq!(root.etag, "etag");
    assert_eq!(root.item_type, ItemType::Root);
}

#[tokio::test]
async fn list_pages_through_the_root() {
    let dispatcher = test_dispatcher();

    let (page, token) = dispatcher.list(PEER, "root_id", "").await.unwrap();
    let ids: Vec<&str> = page.iter().map(|i| i.item_id.as_str()).collect();
    assert_eq!(ids, ["child1_id", "child2_id"]);
    assert_eq!(token, "page_token");
    assert!(page.iter().all(|i| i.parent_id == "root_id"));

    let (page, token) = dispatcher.list(PEER, "root_id", "page_token").await.unwrap();
    let ids: Vec<&str> = page.iter().map(|i| i.item_id.as_str()).collect();
    assert_eq!(ids, ["child3_id", "child4_id"]);
    assert_eq!(token, "");
}

#[tokio::test]
async fn list_rejects_a_bogus_page_token() {
    let dispatcher = test_dispatcher();
    let err = dispatcher.list(PEER, "root_id", "bogus").await.unwrap_err();
    assert_eq!(
        err,
        ProviderError::LogicError("Unknown page token".to_owned())
    );
}

#[tokio::test]
async fn lookup_finds_a_child_under_its_parent() {
    let dispatcher = test_dispatcher();
    let items = dispatcher.lookup(PEER, "root_id", "notes.txt").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].parent_id, "root_id");
    assert_eq!(items[0].title, "notes.txt");
}

#[tokio::test]
async fn metadata_of_an_unknown_item_is_not_exists() {
    let dispatcher = test_dispatcher();
    let err = dispatcher.metadata(PEER, "missing").await.unwrap_err();
    assert_eq!(err, ProviderError::NotExists("missing".to_owned()));
}

#[tokio::test]
async fn create_folder_and_move_and_copy() {
    let dispatcher = test_dispatcher();

    let folder = dispatcher
        .create_folder(PEER, "root_id", "photos")
        .await
        .unwrap();
    assert_eq!(folder.item_type, ItemType::Folder);
    assert_eq!(folder.parent_id, "root_id");

    let moved = dispatcher
        .move_item(PEER, "child1_id", "new_folder_id", "renamed")
        .await
        .unwrap();
    assert_eq!(moved.item_id, "child1_id");
    assert_eq!(moved.parent_id, "new_folder_id");
    assert_eq!(moved.title, "renamed");

    let copied = dispatcher
        .copy_item(PEER, "child1_id", "new_folder_id", "copy")
        .await
        .unwrap();
    assert_eq!(copied.item_id, "new_id");
}

#[tokio::test]
async fn delete_known_and_unknown_items() {
    let dispatcher = test_dispatcher();
    dispatcher.delete(PEER, "item_id").await.unwrap();
    assert!(matches!(
        dispatcher.delete(PEER, "other").await.unwrap_err(),
        ProviderError::NotExists(_)
    ));
}

#[tokio::test]
async fn unresolved_peers_are_rejected_before_dispatch() {
    let dispatcher = test_dispatcher();
    let err = dispatcher.roots(":1.99").await.unwrap_err();
    assert!(matches!(err, ProviderError::PermissionDenied(_)));
}

/// Provider that violates the roots contract.
struct BadRootsProvider;

#[async_trait]
impl ProviderBase for BadRootsProvider {
    async fn roots(&self, _ctx: &Context) -> Result<ItemList> {
        Ok(vec![Item::new(
            "not_a_root",
            "root_id",
            "f",
            "etag",
            ItemType::File,
        )])
    }

    async fn list(&self, _: &str, _: &str, _: &Context) -> Result<(ItemList, String)> {
        Err(ProviderError::LogicError("not scripted".to_owned()))
    }

    async fn lookup(&self, _: &str, _: &str, _: &Context) -> Result<ItemList> {
        Err(ProviderError::LogicError("not scripted".to_owned()))
    }

    async fn metadata(&self, _: &str, _: &Context) -> Result<Item> {
        Err(ProviderError::LogicError("not scripted".to_owned()))
    }

    async fn create_folder(&self, _: &str, _: &str, _: &Context) -> Result<Item> {
        Err(ProviderError::LogicError("not scripted".to_owned()))
    }

    async fn create_file(
        &self,
        _: &str,
        _: &str,
        _: i64,
        _: &str,
        _: bool,
        _: &Context,
    ) -> Result<Box<dyn UploadJob>> {
        Err(ProviderError::LogicError("not scripted".to_owned()))
    }

    async fn update(&self, _: &str, _: i64, _: &str, _: &Context) -> Result<Box<dyn UploadJob>> {
        Err(ProviderError::LogicError("not scripted".to_owned()))
    }

    async fn download(&self, _: &str, _: &Context) -> Result<Box<dyn DownloadJob>> {
        Err(ProviderError::LogicError("not scripted".to_owned()))
    }

    async fn delete_item(&self, _: &str, _: &Context) -> Result<()> {
        Err(ProviderError::LogicError("not scripted".to_owned()))
    }

    async fn move_item(&self, _: &str, _: &str, _: &str, _: &Context) -> Result<Item> {
        Err(ProviderError::LogicError("not scripted".to_owned()))
    }

    async fn copy_item(&self, _: &str, _: &str, _: &str, _: &Context) -> Result<Item> {
        Err(ProviderError::LogicError("not scripted".to_owned()))
    }
}

#[tokio::test]
async fn a_non_root_item_from_roots_is_local_comms() {
    let dispatcher = dispatcher_for(Arc::new(BadRootsProvider));
    let err = dispatcher.roots(PEER).await.unwrap_err();
    assert!(matches!(err, ProviderError::LocalComms(_)));
}

/// Provider whose first metadata call fails with stale credentials.
struct ExpiringProvider {
    hits: AtomicUsize,
}

#[async_trait]
impl ProviderBase for ExpiringProvider {
    async fn roots(&self, ctx: &Context) -> Result<ItemList> {
        TestProvider::new().roots(ctx).await
    }

    async fn list(&self, i: &str, t: &str, ctx: &Context) -> Result<(ItemList, String)> {
        TestProvider::new().list(i, t, ctx).await
    }

    async fn lookup(&self, p: &str, n: &str, ctx: &Context) -> Result<ItemList> {
        TestProvider::new().lookup(p, n, ctx).await
    }

    async fn metadata(&self, item_id: &str, ctx: &Context) -> Result<Item> {
        if self.hits.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ProviderError::Unauthorized("token expired".to_owned()));
        }
        TestProvider::new().metadata(item_id, ctx).await
    }

    async fn create_folder(&self, p: &str, n: &str, ctx: &Context) -> Result<Item> {
        TestProvider::new().create_folder(p, n, ctx).await
    }

    async fn create_file(
        &self,
        p: &str,
        n: &str,
        s: i64,
        c: &str,
        o: bool,
        ctx: &Context,
    ) -> Result<Box<dyn UploadJob>> {
        TestProvider::new().create_file(p, n, s, c, o, ctx).await
    }

    async fn update(&self, i: &str, s: i64, e: &str, ctx: &Context) -> Result<Box<dyn UploadJob>> {
        TestProvider::new().update(i, s, e, ctx).await
    }

    async fn download(&self, i: &str, ctx: &Context) -> Result<Box<dyn DownloadJob>> {
        TestProvider::new().download(i, ctx).await
    }

    async fn delete_item(&self, i: &str, ctx: &Context) -> Result<()> {
        TestProvider::new().delete_item(i, ctx).await
    }

    async fn move_item(&self, i: &str, p: &str, n: &str, ctx: &Context) -> Result<Item> {
        TestProvider::new().move_item(i, p, n, ctx).await
    }

    async fn copy_item(&self, i: &str, p: &str, n: &str, ctx: &Context) -> Result<Item> {
        TestProvider::new().copy_item(i, p, n, ctx).await
    }
}

#[tokio::test]
async fn unauthorized_replies_trigger_one_interactive_retry() {
    let manager = FakeAccountsManager::new();
    let provider = Arc::new(ExpiringProvider {
        hits: AtomicUsize::new(0),
    });
    let dispatcher = online_dispatcher(provider.clone(), manager.clone());

    let item = dispatcher.metadata(PEER, "root_id").await.unwrap();
    assert_eq!(item.item_id, "root_id");

    // the backend was called twice: stale reply, then the post-reauth retry
    assert_eq!(provider.hits.load(Ordering::SeqCst), 2);
    // the retry re-authenticated interactively
    let calls = manager.auth_calls();
    assert_eq!(calls.last(), Some(&true));
}
