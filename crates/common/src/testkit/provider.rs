use std::os::fd::OwnedFd;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{ProviderError, Result};
use crate::item::{Item, ItemType};
use crate::provider::{
    status_channel, transfer_sockets, Context, DownloadJob, ItemList, ProviderBase,
    TransferSockets, TransferStatus, UploadJob,
};

/// Payload served by every download job.
pub const DOWNLOAD_DATA: &str = "Hello world";

/// The etag stamped on every item the test provider returns.
const ETAG: &str = "etag";

/// A scripted provider with a fixed tree: one root, four children across two
/// listing pages.
#[derive(Debug, Default)]
pub struct TestProvider;

impl TestProvider {
    pub fn new() -> Self {
        Self
    }

    fn root() -> Item {
        Item::new("root_id", "", "Root", ETAG, ItemType::Root)
    }
}

#[async_trait]
impl ProviderBase for TestProvider {
    async fn roots(&self, _ctx: &Context) -> Result<ItemList> {
        Ok(vec![Self::root()])
    }

    async fn list(
        &self,
        item_id: &str,
        page_token: &str,
        _ctx: &Context,
    ) -> Result<(ItemList, String)> {
        if item_id != "root_id" {
            return Err(ProviderError::NotExists(item_id.to_owned()));
        }
        match page_token {
            "" => Ok((
                vec![
                    Item::new("child1_id", "root_id", "Child 1", ETAG, ItemType::File),
                    Item::new("child2_id", "root_id", "Child 2", ETAG, ItemType::File),
                ],
                "page_token".to_owned(),
            )),
            "page_token" => Ok((
                vec![
                    Item::new("child3_id", "root_id", "Child 3", ETAG, ItemType::File),
                    Item::new("child4_id", "root_id", "Child 4", ETAG, ItemType::File),
                ],
                String::new(),
            )),
            _ => Err(ProviderError::LogicError("Unknown page token".to_owned())),
        }
    }

    async fn lookup(&self, parent_id: &str, name: &str, _ctx: &Context) -> Result<ItemList> {
        Ok(vec![Item::new(
            "child_id",
            parent_id,
            name,
            ETAG,
            ItemType::File,
        )])
    }

    async fn metadata(&self, item_id: &str, _ctx: &Context) -> Result<Item> {
        if item_id == "root_id" {
            Ok(Self::root())
        } else {
            Err(ProviderError::NotExists(item_id.to_owned()))
        }
    }

    async fn create_folder(&self, parent_id: &str, name: &str, _ctx: &Context) -> Result<Item> {
        Ok(Item::new(
            "new_folder_id",
            parent_id,
            name,
            ETAG,
            ItemType::Folder,
        ))
    }

    async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        size: i64,
        _content_type: &str,
        allow_overwrite: bool,
        _ctx: &Context,
    ) -> Result<Box<dyn UploadJob>> {
        if !allow_overwrite && name == "existing.txt" {
            return Err(ProviderError::Exists(name.to_owned()));
        }
        let item = Item::new("new_file_id", parent_id, name, ETAG, ItemType::File);
        Ok(Box::new(TestUploadJob::new(item, size)?))
    }

    async fn update(
        &self,
        item_id: &str,
        size: i64,
        old_etag: &str,
        _ctx: &Context,
    ) -> Result<Box<dyn UploadJob>> {
        if !old_etag.is_empty() && old_etag != ETAG {
            return Err(ProviderError::Conflict(format!(
                "etag mismatch for {item_id}"
            )));
        }
        let item = Item::new(item_id, "root_id", "updated", ETAG, ItemType::File);
        Ok(Box::new(TestUploadJob::new(item, size)?))
    }

    async fn download(&self, _item_id: &str, _ctx: &Context) -> Result<Box<dyn DownloadJob>> {
        Ok(Box::new(TestDownloadJob::new(DOWNLOAD_DATA)?))
    }

    async fn delete_item(&self, item_id: &str, _ctx: &Context) -> Result<()> {
        if item_id == "item_id" {
            Ok(())
        } else {
            Err(ProviderError::NotExists(item_id.to_owned()))
        }
    }

    async fn move_item(
        &self,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
        _ctx: &Context,
    ) -> Result<Item> {
        Ok(Item::new(
            item_id,
            new_parent_id,
            new_name,
            ETAG,
            ItemType::File,
        ))
    }

    async fn copy_item(
        &self,
        _item_id: &str,
        new_parent_id: &str,
        new_name: &str,
        _ctx: &Context,
    ) -> Result<Item> {
        Ok(Item::new(
            "new_id",
            new_parent_id,
            new_name,
            ETAG,
            ItemType::File,
        ))
    }
}

/// Upload job that counts bytes against the declared size.
#[derive(Debug)]
pub struct TestUploadJob {
    client: Option<OwnedFd>,
    reader: Option<JoinHandle<std::io::Result<u64>>>,
    item: Item,
    declared_size: i64,
}

impl TestUploadJob {
    pub fn new(item: Item, declared_size: i64) -> Result<Self> {
        let TransferSockets {
            mut provider,
            client,
        } = transfer_sockets().map_err(|e| ProviderError::Unknown(e.to_string()))?;
        let reader = tokio::spawn(async move {
            let mut total = 0u64;
            let mut buf = [0u8; 4096];
            loop {
                let n = provider.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                total += n as u64;
            }
            Ok(total)
        });
        Ok(Self {
            client: Some(client),
            reader: Some(reader),
            item,
            declared_size,
        })
    }
}

#[async_trait]
impl UploadJob for TestUploadJob {
    fn take_client_socket(&mut self) -> Option<OwnedFd> {
        self.client.take()
    }

    async fn finish(&mut self) -> Result<Item> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| ProviderError::LogicError("upload already finalized".to_owned()))?;
        let received = reader
            .await
            .map_err(|_| ProviderError::Cancelled("upload aborted".to_owned()))?
            .map_err(|e| ProviderError::Unknown(e.to_string()))?;
        if (received as i64) < self.declared_size {
            return Err(ProviderError::LogicError("too few bytes written".to_owned()));
        }
        if received as i64 > self.declared_size {
            return Err(ProviderError::LogicError("too much data".to_owned()));
        }
        Ok(self.item.clone())
    }

    async fn cancel(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        Ok(())
    }
}

/// Download job that trickles its payload two bytes per tick, the way a slow
/// backend would.
pub struct TestDownloadJob {
    client: Option<OwnedFd>,
    writer: Option<JoinHandle<()>>,
    status: watch::Receiver<TransferStatus>,
}

impl TestDownloadJob {
    pub fn new(data: &str) -> Result<Self> {
        let TransferSockets {
            mut provider,
            client,
        } = transfer_sockets().map_err(|e| ProviderError::Unknown(e.to_string()))?;
        let (reporter, status) = status_channel();
        let data = data.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            for chunk in data.chunks(2) {
                if let Err(e) = provider.write_all(chunk).await {
                    reporter.report_error(format!("Write failure: {e}"));
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            reporter.report_complete();
        });
        Ok(Self {
            client: Some(client),
            writer: Some(writer),
            status,
        })
    }
}

#[async_trait]
impl DownloadJob for TestDownloadJob {
    fn take_client_socket(&mut self) -> Option<OwnedFd> {
        self.client.take()
    }

    async fn finish(&mut self) -> Result<()> {
        match self.status.borrow().clone() {
            TransferStatus::Complete => Ok(()),
            TransferStatus::Failed(message) => Err(ProviderError::Unknown(message)),
            TransferStatus::InProgress => {
                Err(ProviderError::LogicError("Not all data read".to_owned()))
            }
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        Ok(())
    }
}
