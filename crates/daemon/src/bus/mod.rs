//! Bus-facing objects.
//!
//! `ProviderInterface` is registered once per account at
//! `/provider/<account_id>` and translates method calls into dispatcher
//! invocations; `RegistryInterface` sits at `/provider` and carries the
//! account lifecycle signals.

pub mod error;

use std::sync::Arc;

use zbus::message::Header;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::OwnedFd;

use common::item::Item;
use common::wire::{AccountRecord, ItemRecord};

use crate::account::AccountData;
use crate::dispatch::Dispatcher;

pub use error::Error;

fn sender(header: &Header<'_>) -> Result<String, Error> {
    header
        .sender()
        .map(|unique| unique.to_string())
        .ok_or_else(|| Error::PermissionDenied("message carried no sender".to_owned()))
}

fn encode_item(item: &Item) -> Result<ItemRecord, Error> {
    Ok(ItemRecord::from_item(item)?)
}

fn encode_items(items: &[Item]) -> Result<Vec<ItemRecord>, Error> {
    items.iter().map(encode_item).collect()
}

pub struct ProviderInterface {
    dispatcher: Dispatcher,
}

impl ProviderInterface {
    pub fn new(account: Arc<AccountData>) -> Self {
        Self {
            dispatcher: Dispatcher::new(account),
        }
    }
}

#[zbus::interface(name = "org.stratus.Provider")]
impl ProviderInterface {
    async fn roots(&self, #[zbus(header)] header: Header<'_>) -> Result<Vec<ItemRecord>, Error> {
        let peer = sender(&header)?;
        encode_items(&self.dispatcher.roots(&peer).await?)
    }

    async fn list(
        &self,
        item_id: String,
        page_token: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(Vec<ItemRecord>, String), Error> {
        let peer = sender(&header)?;
        let (items, next_token) = self.dispatcher.list(&peer, &item_id, &page_token).await?;
        Ok((encode_items(&items)?, next_token))
    }

    async fn lookup(
        &self,
        parent_id: String,
        name: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<Vec<ItemRecord>, Error> {
        let peer = sender(&header)?;
        encode_items(&self.dispatcher.lookup(&peer, &parent_id, &name).await?)
    }

    async fn metadata(
        &self,
        item_id: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<ItemRecord, Error> {
        let peer = sender(&header)?;
        encode_item(&self.dispatcher.metadata(&peer, &item_id).await?)
    }

    async fn create_folder(
        &self,
        parent_id: String,
        name: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<ItemRecord, Error> {
        let peer = sender(&header)?;
        encode_item(&self.dispatcher.create_folder(&peer, &parent_id, &name).await?)
    }

    async fn create_file(
        &self,
        parent_id: String,
        name: String,
        size: i64,
        content_type: String,
        allow_overwrite: bool,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(String, OwnedFd), Error> {
        let peer = sender(&header)?;
        let (upload_id, fd) = self
            .dispatcher
            .create_file(&peer, &parent_id, &name, size, &content_type, allow_overwrite)
            .await?;
        Ok((upload_id, fd.into()))
    }

    async fn update(
        &self,
        item_id: String,
        size: i64,
        old_etag: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(String, OwnedFd), Error> {
        let peer = sender(&header)?;
        let (upload_id, fd) = self
            .dispatcher
            .update(&peer, &item_id, size, &old_etag)
            .await?;
        Ok((upload_id, fd.into()))
    }

    async fn finish_upload(
        &self,
        upload_id: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<ItemRecord, Error> {
        let peer = sender(&header)?;
        encode_item(&self.dispatcher.finish_upload(&peer, &upload_id).await?)
    }

    async fn cancel_upload(
        &self,
        upload_id: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(), Error> {
        let peer = sender(&header)?;
        Ok(self.dispatcher.cancel_upload(&peer, &upload_id).await?)
    }

    async fn download(
        &self,
        item_id: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(String, OwnedFd), Error> {
        let peer = sender(&header)?;
        let (download_id, fd) = self.dispatcher.download(&peer, &item_id).await?;
        Ok((download_id, fd.into()))
    }

    async fn finish_download(
        &self,
        download_id: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(), Error> {
        let peer = sender(&header)?;
        Ok(self.dispatcher.finish_download(&peer, &download_id).await?)
    }

    async fn cancel_download(
        &self,
        download_id: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(), Error> {
        let peer = sender(&header)?;
        Ok(self.dispatcher.cancel_download(&peer, &download_id).await?)
    }

    async fn delete(
        &self,
        item_id: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<(), Error> {
        let peer = sender(&header)?;
        Ok(self.dispatcher.delete(&peer, &item_id).await?)
    }

    #[zbus(name = "Move")]
    async fn move_item(
        &self,
        item_id: String,
        new_parent_id: String,
        new_name: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<ItemRecord, Error> {
        let peer = sender(&header)?;
        encode_item(
            &self
                .dispatcher
                .move_item(&peer, &item_id, &new_parent_id, &new_name)
                .await?,
        )
    }

    #[zbus(name = "Copy")]
    async fn copy_item(
        &self,
        item_id: String,
        new_parent_id: String,
        new_name: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<ItemRecord, Error> {
        let peer = sender(&header)?;
        encode_item(
            &self
                .dispatcher
                .copy_item(&peer, &item_id, &new_parent_id, &new_name)
                .await?,
        )
    }
}

/// Carrier of the account lifecycle signals, registered at `/provider`.
pub struct RegistryInterface;

#[zbus::interface(name = "org.stratus.ProviderRegistry")]
impl RegistryInterface {
    #[zbus(signal)]
    pub async fn account_added(
        emitter: &SignalEmitter<'_>,
        account: &AccountRecord,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn account_removed(
        emitter: &SignalEmitter<'_>,
        account: &AccountRecord,
    ) -> zbus::Result<()>;
}
