//! The contract a storage backend implements.
//!
//! A provider surfaces future-returning item operations plus upload and
//! download jobs. Jobs own a connected socket pair: the client half is handed
//! back over the bus as a file descriptor, the provider half stays with the
//! job and carries the transfer bytes.

use std::io;
use std::os::fd::OwnedFd;

use async_trait::async_trait;
use tokio::net::UnixStream;
use tokio::sync::watch;

use crate::error::Result;
use crate::item::Item;

/// Identity of the calling process, resolved from the bus broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub uid: u32,
    pub pid: u32,
    pub security_label: String,
}

pub type ItemList = Vec<Item>;

/// The polymorphic surface a storage backend implements.
///
/// Every method is a suspension point; implementations may run blocking work
/// off-loop but must complete back on the caller's runtime. An empty
/// `next_page_token` from `list` means "no more pages"; an unknown token
/// fails with `LogicError`. An empty list from `lookup` means "not found".
#[async_trait]
pub trait ProviderBase: Send + Sync + 'static {
    async fn roots(&self, ctx: &Context) -> Result<ItemList>;

    async fn list(
        &self,
        item_id: &str,
        page_token: &str,
        ctx: &Context,
    ) -> Result<(ItemList, String)>;

    async fn lookup(&self, parent_id: &str, name: &str, ctx: &Context) -> Result<ItemList>;

    async fn metadata(&self, item_id: &str, ctx: &Context) -> Result<Item>;

    async fn create_folder(&self, parent_id: &str, name: &str, ctx: &Context) -> Result<Item>;

    async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        size: i64,
        content_type: &str,
        allow_overwrite: bool,
        ctx: &Context,
    ) -> Result<Box<dyn UploadJob>>;

    async fn update(
        &self,
        item_id: &str,
        size: i64,
        old_etag: &str,
        ctx: &Context,
    ) -> Result<Box<dyn UploadJob>>;

    async fn download(&self, item_id: &str, ctx: &Context) -> Result<Box<dyn DownloadJob>>;

    async fn delete_item(&self, item_id: &str, ctx: &Context) -> Result<()>;

    async fn move_item(
        &self,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
        ctx: &Context,
    ) -> Result<Item>;

    async fn copy_item(
        &self,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
        ctx: &Context,
    ) -> Result<Item>;
}

/// An in-flight upload. The job consumes bytes from its provider-side socket
/// while the client writes into the descriptor it was handed.
#[async_trait]
pub trait UploadJob: Send + std::fmt::Debug + 'static {
    /// Hand over the client half of the socket pair. Yields a value exactly
    /// once; later calls return `None`.
    fn take_client_socket(&mut self) -> Option<OwnedFd>;

    /// Finalize the upload and produce the resulting item. Fails with
    /// `LogicError` if the byte count does not match the declared size.
    /// The client must have closed its socket half first.
    async fn finish(&mut self) -> Result<Item>;

    /// Abort the transfer and discard anything already spooled.
    async fn cancel(&mut self) -> Result<()>;
}

/// An in-flight download. The job writes bytes into its provider-side socket
/// and reports completion through its status channel.
#[async_trait]
pub trait DownloadJob: Send + 'static {
    /// Hand over the client half of the socket pair. Yields a value exactly
    /// once; later calls return `None`.
    fn take_client_socket(&mut self) -> Option<OwnedFd>;

    /// Confirm the transfer. Fails with `LogicError` if bytes remain unsent,
    /// or with the reported error if the transfer failed mid-stream.
    async fn finish(&mut self) -> Result<()>;

    /// Stop writing and close the stream.
    async fn cancel(&mut self) -> Result<()>;
}

/// A connected local-socket pair backing one transfer.
pub struct TransferSockets {
    /// The half the job keeps and reads/writes on the event loop.
    pub provider: UnixStream,
    /// The half handed back to the client as an inherited descriptor.
    pub client: OwnedFd,
}

/// Build the socket pair for a streaming job.
pub fn transfer_sockets() -> io::Result<TransferSockets> {
    let (provider, client) = std::os::unix::net::UnixStream::pair()?;
    provider.set_nonblocking(true)?;
    client.set_nonblocking(true)?;
    Ok(TransferSockets {
        provider: UnixStream::from_std(provider)?,
        client: client.into(),
    })
}

/// Progress of a streaming transfer as reported by the backend job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    InProgress,
    Complete,
    Failed(String),
}

/// Sender half a job uses to report its outcome. The first terminal report
/// wins; later reports are ignored.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: watch::Sender<TransferStatus>,
}

impl StatusReporter {
    pub fn report_complete(&self) {
        self.tx.send_if_modified(|status| {
            if *status == TransferStatus::InProgress {
                *status = TransferStatus::Complete;
                true
            } else {
                false
            }
        });
    }

    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_if_modified(|status| {
            if *status == TransferStatus::InProgress {
                *status = TransferStatus::Failed(message.clone());
                true
            } else {
                false
            }
        });
    }
}

/// Create the reporter/observer pair for one transfer.
pub fn status_channel() -> (StatusReporter, watch::Receiver<TransferStatus>) {
    let (tx, rx) = watch::channel(TransferStatus::InProgress);
    (StatusReporter { tx }, rx)
}
