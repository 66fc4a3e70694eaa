use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use common::error::{ProviderError, Result};
use common::item::Item;
use common::provider::{
    status_channel, transfer_sockets, DownloadJob, TransferSockets, TransferStatus, UploadJob,
};

use crate::provider::{item_for, TMP_PREFIX};

/// Upload spooling into a hidden temp file next to the target; the finish
/// step enforces the declared size and renames into place.
#[derive(Debug)]
pub struct LocalUploadJob {
    client: Option<OwnedFd>,
    writer: Option<JoinHandle<std::io::Result<u64>>>,
    root: PathBuf,
    target: PathBuf,
    tmp: PathBuf,
    declared_size: i64,
}

impl LocalUploadJob {
    pub(crate) async fn new(root: &Path, target: &Path, declared_size: i64) -> Result<Self> {
        let parent = target.parent().ok_or_else(|| {
            ProviderError::InvalidArgument(format!("no parent for {}", target.display()))
        })?;
        let tmp = parent.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));
        let tmp_key = tmp.display().to_string();
        let file = fs::File::create(&tmp)
            .await
            .map_err(|e| ProviderError::from_io(e, &tmp_key))?;
        let TransferSockets {
            mut provider,
            client,
        } = transfer_sockets().map_err(|e| ProviderError::from_io(e, &tmp_key))?;
        let writer = tokio::spawn(async move {
            let mut file = file;
            let received = tokio::io::copy(&mut provider, &mut file).await?;
            file.flush().await?;
            Ok(received)
        });
        Ok(Self {
            client: Some(client),
            writer: Some(writer),
            root: root.to_path_buf(),
            target: target.to_path_buf(),
            tmp,
            declared_size,
        })
    }

    async fn discard_spool(&self) {
        let _ = fs::remove_file(&self.tmp).await;
    }
}

#[async_trait]
impl UploadJob for LocalUploadJob {
    fn take_client_socket(&mut self) -> Option<OwnedFd> {
        self.client.take()
    }

    async fn finish(&mut self) -> Result<Item> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| ProviderError::LogicError("upload already finalized".to_owned()))?;
        let received = match writer.await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                self.discard_spool().await;
                return Err(ProviderError::from_io(e, &self.tmp.display().to_string()));
            }
            Err(_) => {
                self.discard_spool().await;
                return Err(ProviderError::Cancelled("upload aborted".to_owned()));
            }
        };
        if (received as i64) < self.declared_size {
            self.discard_spool().await;
            return Err(ProviderError::LogicError("too few bytes written".to_owned()));
        }
        if received as i64 > self.declared_size {
            self.discard_spool().await;
            return Err(ProviderError::LogicError("too much data".to_owned()));
        }
        fs::rename(&self.tmp, &self.target)
            .await
            .map_err(|e| ProviderError::from_io(e, &self.target.display().to_string()))?;
        item_for(&self.root, &self.target).await
    }

    async fn cancel(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        self.discard_spool().await;
        Ok(())
    }
}

/// Download streaming a file into the socket pair.
pub struct LocalDownloadJob {
    client: Option<OwnedFd>,
    writer: Option<JoinHandle<()>>,
    status: watch::Receiver<TransferStatus>,
}

impl LocalDownloadJob {
    pub(crate) async fn new(path: &Path) -> Result<Self> {
        let key = path.display().to_string();
        let mut file = fs::File::open(path)
            .await
            .map_err(|e| ProviderError::from_io(e, &key))?;
        let TransferSockets {
            mut provider,
            client,
        } = transfer_sockets().map_err(|e| ProviderError::from_io(e, &key))?;
        let (reporter, status) = status_channel();
        let writer = tokio::spawn(async move {
            match tokio::io::copy(&mut file, &mut provider).await {
                Ok(_) => {
                    let _ = provider.shutdown().await;
                    reporter.report_complete();
                }
                Err(e) => reporter.report_error(format!("read failed: {e}")),
            }
        });
        Ok(Self {
            client: Some(client),
            writer: Some(writer),
            status,
        })
    }
}

#[async_trait]
impl DownloadJob for LocalDownloadJob {
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
