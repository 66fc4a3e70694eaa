//! RPC dispatch core.
//!
//! One dispatcher exists per published account. For each call it resolves
//! the peer, holds an activity guard for the duration, makes sure
//! credentials are in place, invokes the backend, and validates the shapes
//! the backend hands back. `Unauthorized` backend replies trigger exactly
//! one interactive re-authentication and retry per RPC.
//!
//! The bus-facing glue lives in [`crate::bus`]; tests drive these methods
//! directly with scripted peers.

use std::os::fd::OwnedFd;
use std::sync::Arc;

use futures::future::BoxFuture;
use uuid::Uuid;

use common::error::{ProviderError, Result};
use common::item::{Item, ItemType};
use common::provider::{Context, ItemList, ProviderBase};

use crate::account::AccountData;
use crate::idle::ActivityGuard;

pub struct Dispatcher {
    account: Arc<AccountData>,
}

impl Dispatcher {
    pub fn new(account: Arc<AccountData>) -> Self {
        Self { account }
    }

    pub fn account(&self) -> &Arc<AccountData> {
        &self.account
    }

    /// Resolve the caller and suppress idle shutdown for the RPC's duration.
    /// Unresolvable peers are rejected before the backend sees anything.
    async fn begin(&self, peer: &str) -> Result<(Context, ActivityGuard)> {
        let guard = self.account.inactivity().activity();
        let identity = self.account.peers().identify(peer).await?;
        Ok((identity.to_context(), guard))
    }

    /// Run a backend call with the one-shot re-auth retry.
    async fn call<T>(
        &self,
        ctx: &Context,
        f: impl Fn(Arc<dyn ProviderBase>, Context) -> BoxFuture<'static, Result<T>>,
    ) -> Result<T> {
        self.account.ensure_credentials().await?;
        match f(Arc::clone(self.account.provider()), ctx.clone()).await {
            Err(ProviderError::Unauthorized(reason)) => {
                tracing::debug!(%reason, "re-authenticating after unauthorized backend reply");
                self.account
                    .refresh_credentials()
                    .await
                    .map_err(|e| match e {
                        ProviderError::Cancelled(msg) => ProviderError::Cancelled(msg),
                        other => {
                            ProviderError::PermissionDenied(format!("authentication failed: {other}"))
                        }
                    })?;
                f(Arc::clone(self.account.provider()), ctx.clone()).await
            }
            result => result,
        }
    }

    pub async fn roots(&self, peer: &str) -> Result<ItemList> {
        let (ctx, _guard) = self.begin(peer).await?;
        let items = self
            .call(&ctx, |provider, ctx| {
                Box::pin(async move { provider.roots(&ctx).await })
            })
            .await?;
        for item in &items {
            if item.item_type != ItemType::Root || !item.parent_id.is_empty() {
                return Err(ProviderError::LocalComms(format!(
                    "backend returned non-root item {} from roots",
                    item.item_id
                )));
            }
        }
        Ok(items)
    }

    pub async fn list(
        &self,
        peer: &str,
        item_id: &str,
        page_token: &str,
    ) -> Result<(ItemList, String)> {
        let (ctx, _guard) = self.begin(peer).await?;
        let id = item_id.to_owned();
        let token = page_token.to_owned();
        let (items, next_token) = self
            .call(&ctx, move |provider, ctx| {
                let id = id.clone();
                let token = token.clone();
                Box::pin(async move { provider.list(&id, &token, &ctx).await })
            })
            .await?;
        for item in &items {
            if item.parent_id != item_id {
                return Err(ProviderError::LocalComms(format!(
                    "backend listed {} under the wrong parent",
                    item.item_id
                )));
            }
        }
        Ok((items, next_token))
    }

    pub async fn lookup(&self, peer: &str, parent_id: &str, name: &str) -> Result<ItemList> {
        let (ctx, _guard) = self.begin(peer).await?;
        let parent = parent_id.to_owned();
        let name = name.to_owned();
        self.call(&ctx, move |provider, ctx| {
            let parent = parent.clone();
            let name = name.clone();
            Box::pin(async move { provider.lookup(&parent, &name, &ctx).await })
        })
        .await
    }

    pub async fn metadata(&self, peer: &str, item_id: &str) -> Result<Item> {
        let (ctx, _guard) = self.begin(peer).await?;
        let id = item_id.to_owned();
        self.call(&ctx, move |provider, ctx| {
            let id = id.clone();
            Box::pin(async move { provider.metadata(&id, &ctx).await })
        })
        .await
    }

    pub async fn create_folder(&self, peer: &str, parent_id: &str, name: &str) -> Result<Item> {
        let (ctx, _guard) = self.begin(peer).await?;
        let parent = parent_id.to_owned();
        let name = name.to_owned();
        let item = self
            .call(&ctx, move |provider, ctx| {
                let parent = parent.clone();
                let name = name.clone();
                Box::pin(async move { provider.create_folder(&parent, &name, &ctx).await })
            })
            .await?;
        if item.item_type != ItemType::Folder {
            return Err(ProviderError::LocalComms(format!(
                "backend created {} instead of a folder",
                item.item_id
            )));
        }
        Ok(item)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_file(
        &self,
        peer: &str,
        parent_id: &str,
        name: &str,
        size: i64,
        content_type: &str,
        allow_overwrite: bool,
    ) -> Result<(String, OwnedFd)> {
        let (ctx, guard) = self.begin(peer).await?;
        let parent = parent_id.to_owned();
        let name = name.to_owned();
        let content_type = content_type.to_owned();
        let mut job = self
            .call(&ctx, move |provider, ctx| {
                let parent = parent.clone();
                let name = name.clone();
                let content_type = content_type.clone();
                Box::pin(async move {
                    provider
                        .create_file(&parent, &name, size, &content_type, allow_overwrite, &ctx)
                        .await
                })
            })
            .await?;
        let socket = job.take_client_socket();
        self.register_upload(peer, socket, job, guard).await
    }

    pub async fn update(
        &self,
        peer: &str,
        item_id: &str,
        size: i64,
        old_etag: &str,
    ) -> Result<(String, OwnedFd)> {
        let (ctx, guard) = self.begin(peer).await?;
        let id = item_id.to_owned();
        let etag = old_etag.to_owned();
        let mut job = self
            .call(&ctx, move |provider, ctx| {
                let id = id.clone();
                let etag = etag.clone();
                Box::pin(async move { provider.update(&id, size, &etag, &ctx).await })
            })
            .await?;
        let socket = job.take_client_socket();
        self.register_upload(peer, socket, job, guard).await
    }

    async fn register_upload(
        &self,
        peer: &str,
        socket: Option<OwnedFd>,
        job: Box<dyn common::provider::UploadJob>,
        guard: ActivityGuard,
    ) -> Result<(String, OwnedFd)> {
        let socket = socket.ok_or_else(|| {
            ProviderError::LocalComms("backend upload job yielded no client socket".to_owned())
        })?;
        let upload_id = Uuid::new_v4().to_string();
        // the guard moves into the registry so the transfer keeps the
        // daemon alive between RPCs
        self.account
            .jobs()
            .add_upload(peer, &upload_id, job, guard)
            .await?;
        Ok((upload_id, socket))
    }

    pub async fn finish_upload(&self, peer: &str, upload_id: &str) -> Result<Item> {
        let (_ctx, _guard) = self.begin(peer).await?;
        let item = self.account.jobs().finish_upload(peer, upload_id).await?;
        if item.item_type != ItemType::File {
            return Err(ProviderError::LocalComms(format!(
                "backend finished upload {upload_id} with a non-file item"
            )));
        }
        Ok(item)
    }

    pub async fn cancel_upload(&self, peer: &str, upload_id: &str) -> Result<()> {
        let (_ctx, _guard) = self.begin(peer).await?;
        self.account.jobs().cancel_upload(peer, upload_id).await
    }

    pub async fn download(&self, peer: &str, item_id: &str) -> Result<(String, OwnedFd)> {
        let (ctx, guard) = self.begin(peer).await?;
        let id = item_id.to_owned();
        let mut job = self
            .call(&ctx, move |provider, ctx| {
                let id = id.clone();
                Box::pin(async move { provider.download(&id, &ctx).await })
            })
            .await?;
        let socket = job.take_client_socket().ok_or_else(|| {
            ProviderError::LocalComms("backend download job yielded no client socket".to_owned())
        })?;
        let download_id = Uuid::new_v4().to_string();
        self.account
            .jobs()
            .add_download(peer, &download_id, job, guard)
            .await?;
        Ok((download_id, socket))
    }

    pub async fn finish_download(&self, peer: &str, download_id: &str) -> Result<()> {
        let (_ctx, _guard) = self.begin(peer).await?;
        self.account.jobs().finish_download(peer, download_id).await
    }

    pub async fn cancel_download(&self, peer: &str, download_id: &str) -> Result<()> {
        let (_ctx, _guard) = self.begin(peer).await?;
        self.account.jobs().cancel_download(peer, download_id).await
    }

    pub async fn delete(&self, peer: &str, item_id: &str) -> Result<()> {
        let (ctx, _guard) = self.begin(peer).await?;
        let id = item_id.to_owned();
        self.call(&ctx, move |provider, ctx| {
            let id = id.clone();
            Box::pin(async move { provider.delete_item(&id, &ctx).await })
        })
        .await
    }

    pub async fn move_item(
        &self,
        peer: &str,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
    ) -> Result<Item> {
        let (ctx, _guard) = self.begin(peer).await?;
        let id = item_id.to_owned();
        let parent = new_parent_id.to_owned();
        let name = new_name.to_owned();
        let item = self
            .call(&ctx, move |provider, ctx| {
                let id = id.clone();
                let parent = parent.clone();
                let name = name.clone();
                Box::pin(async move { provider.move_item(&id, &parent, &name, &ctx).await })
            })
            .await?;
        if item.item_type == ItemType::Root {
            return Err(ProviderError::LocalComms(
                "backend returned a root from move".to_owned(),
            ));
        }
        Ok(item)
    }

    pub async fn copy_item(
        &self,
        peer: &str,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
    ) -> Result<Item> {
        let (ctx, _guard) = self.begin(peer).await?;
        let id = item_id.to_owned();
        let parent = new_parent_id.to_owned();
        let name = new_name.to_owned();
        let item = self
            .call(&ctx, move |provider, ctx| {
                let id = id.clone();
                let parent = parent.clone();
                let name = name.clone();
                Box::pin(async move { provider.copy_item(&id, &parent, &name, &ctx).await })
            })
            .await?;
        if item.item_type == ItemType::Root {
            return Err(ProviderError::LocalComms(
                "backend returned a root from copy".to_owned(),
            ));
        }
        Ok(item)
    }
}
