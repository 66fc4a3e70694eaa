//! Registry of in-flight uploads and downloads.
//!
//! Jobs are keyed by `(peer, job_id)` with multiplicity one. A job leaves the
//! registry only after reaching a terminal state *and* being acknowledged by
//! a finish or cancel RPC, or when its peer disconnects. Successful and
//! failed finishes acknowledge themselves and reap immediately; a cancelled
//! job stays behind so that a late finish can still observe `Cancelled`.

use std::collections::HashMap;

use common::error::{ProviderError, Result};
use common::item::Item;
use common::provider::{DownloadJob, UploadJob};

use crate::idle::ActivityGuard;

/// Non-terminal lifecycle of a registered job. Jobs that reach
/// `finished`/`error` are removed at the acknowledging RPC, so only these
/// states are ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    InProgress,
    Finishing,
    Cancelled,
}

struct UploadEntry {
    state: JobState,
    job: Option<Box<dyn UploadJob>>,
    // suppresses idle shutdown for the life of the transfer
    _guard: ActivityGuard,
}

struct DownloadEntry {
    state: JobState,
    job: Option<Box<dyn DownloadJob>>,
    _guard: ActivityGuard,
}

type JobKey = (String, String);

#[derive(Default)]
struct Inner {
    uploads: HashMap<JobKey, UploadEntry>,
    downloads: HashMap<JobKey, DownloadEntry>,
}

/// Per-account registry of pending streaming jobs.
#[derive(Default)]
pub struct PendingJobs {
    inner: tokio::sync::Mutex<Inner>,
}

fn key(peer: &str, job_id: &str) -> JobKey {
    (peer.to_owned(), job_id.to_owned())
}

impl PendingJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh upload. Fails if the `(peer, job_id)` slot is taken.
    pub async fn add_upload(
        &self,
        peer: &str,
        job_id: &str,
        mut job: Box<dyn UploadJob>,
        guard: ActivityGuard,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.uploads.contains_key(&key(peer, job_id)) {
            drop(inner);
            let _ = job.cancel().await;
            return Err(ProviderError::LogicError(format!(
                "duplicate upload id {job_id}"
            )));
        }
        inner.uploads.insert(
            key(peer, job_id),
            UploadEntry {
                state: JobState::InProgress,
                job: Some(job),
                _guard: guard,
            },
        );
        Ok(())
    }

    /// Register a fresh download. Fails if the `(peer, job_id)` slot is taken.
    pub async fn add_download(
        &self,
        peer: &str,
        job_id: &str,
        mut job: Box<dyn DownloadJob>,
        guard: ActivityGuard,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.downloads.contains_key(&key(peer, job_id)) {
            drop(inner);
            let _ = job.cancel().await;
            return Err(ProviderError::LogicError(format!(
                "duplicate download id {job_id}"
            )));
        }
        inner.downloads.insert(
            key(peer, job_id),
            DownloadEntry {
                state: JobState::InProgress,
                job: Some(job),
                _guard: guard,
            },
        );
        Ok(())
    }

    /// Finalize an upload and return the resulting item. The first finish
    /// determines the terminal outcome and reaps the job; a finish after a
    /// cancel observes `Cancelled` and reaps.
    pub async fn finish_upload(&self, peer: &str, job_id: &str) -> Result<Item> {
        let key = key(peer, job_id);
        let mut job = {
            let mut inner = self.inner.lock().await;
            let entry = inner
                .uploads
                .get_mut(&key)
                .ok_or_else(|| ProviderError::NotExists(job_id.to_owned()))?;
            match entry.state {
                JobState::InProgress => {
                    entry.state = JobState::Finishing;
                    entry.job.take().ok_or_else(|| {
                        ProviderError::LogicError(format!("upload {job_id} lost its job"))
                    })?
                }
                JobState::Finishing => {
                    return Err(ProviderError::LogicError(format!(
                        "upload {job_id} is finishing"
                    )))
                }
                JobState::Cancelled => {
                    inner.uploads.remove(&key);
                    return Err(ProviderError::Cancelled(format!(
                        "upload {job_id} was cancelled"
                    )));
                }
            }
        };

        // backend finish runs without the registry lock so other jobs of
        // this account keep flowing
        let result = job.finish().await;

        let mut inner = self.inner.lock().await;
        let cancelled = match inner.uploads.remove(&key) {
            // a concurrent cancel or peer death beats the finish result
            Some(entry) => entry.state == JobState::Cancelled,
            None => true,
        };
        if cancelled {
            return Err(ProviderError::Cancelled(format!(
                "upload {job_id} was cancelled"
            )));
        }
        result
    }

    /// Cancel an upload. Idempotent once the job is in a terminal state.
    pub async fn cancel_upload(&self, peer: &str, job_id: &str) -> Result<()> {
        let key = key(peer, job_id);
        let job = {
            let mut inner = self.inner.lock().await;
            let entry = inner
                .uploads
                .get_mut(&key)
                .ok_or_else(|| ProviderError::NotExists(job_id.to_owned()))?;
            match entry.state {
                JobState::InProgress | JobState::Finishing => {
                    entry.state = JobState::Cancelled;
                    entry.job.take()
                }
                JobState::Cancelled => None,
            }
        };
        if let Some(mut job) = job {
            if let Err(e) = job.cancel().await {
                tracing::debug!(job_id, error = %e, "upload cancel reported an error");
            }
        }
        Ok(())
    }

    /// Confirm a download. Valid once the backend has reported completion;
    /// reaps on any terminal outcome, like uploads.
    pub async fn finish_download(&self, peer: &str, job_id: &str) -> Result<()> {
        let key = key(peer, job_id);
        let mut job = {
            let mut inner = self.inner.lock().await;
            let entry = inner
                .downloads
                .get_mut(&key)
                .ok_or_else(|| ProviderError::NotExists(job_id.to_owned()))?;
            match entry.state {
                JobState::InProgress => {
                    entry.state = JobState::Finishing;
                    entry.job.take().ok_or_else(|| {
                        ProviderError::LogicError(format!("download {job_id} lost its job"))
                    })?
                }
                JobState::Finishing => {
                    return Err(ProviderError::LogicError(format!(
                        "download {job_id} is finishing"
                    )))
                }
                JobState::Cancelled => {
                    inner.downloads.remove(&key);
                    return Err(ProviderError::Cancelled(format!(
                        "download {job_id} was cancelled"
                    )));
                }
            }
        };

        let result = job.finish().await;

        let mut inner = self.inner.lock().await;
        let cancelled = match inner.downloads.remove(&key) {
            Some(entry) => entry.state == JobState::Cancelled,
            None => true,
        };
        if cancelled {
            return Err(ProviderError::Cancelled(format!(
                "download {job_id} was cancelled"
            )));
        }
        result
    }

    /// Cancel a download. Idempotent once the job is in a terminal state.
    pub async fn cancel_download(&self, peer: &str, job_id: &str) -> Result<()> {
        let key = key(peer, job_id);
        let job = {
            let mut inner = self.inner.lock().await;
            let entry = inner
                .downloads
                .get_mut(&key)
                .ok_or_else(|| ProviderError::NotExists(job_id.to_owned()))?;
            match entry.state {
                JobState::InProgress | JobState::Finishing => {
                    entry.state = JobState::Cancelled;
                    entry.job.take()
                }
                JobState::Cancelled => None,
            }
        };
        if let Some(mut job) = job {
            if let Err(e) = job.cancel().await {
                tracing::debug!(job_id, error = %e, "download cancel reported an error");
            }
        }
        Ok(())
    }

    /// Drop every job owned by a disconnected peer, cancelling the backend
    /// jobs best-effort.
    pub async fn cancel_peer_jobs(&self, peer: &str) {
        let (uploads, downloads) = {
            let mut inner = self.inner.lock().await;
            let upload_keys: Vec<JobKey> = inner
                .uploads
                .keys()
                .filter(|(p, _)| p == peer)
                .cloned()
                .collect();
            let download_keys: Vec<JobKey> = inner
                .downloads
                .keys()
                .filter(|(p, _)| p == peer)
                .cloned()
                .collect();
            let uploads: Vec<_> = upload_keys
                .iter()
                .filter_map(|k| inner.uploads.remove(k))
                .collect();
            let downloads: Vec<_> = download_keys
                .iter()
                .filter_map(|k| inner.downloads.remove(k))
                .collect();
            (uploads, downloads)
        };
        for entry in uploads {
            if let Some(mut job) = entry.job {
                let _ = job.cancel().await;
            }
        }
        for entry in downloads {
            if let Some(mut job) = entry.job {
                let _ = job.cancel().await;
            }
        }
    }

    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.uploads.is_empty() && inner.downloads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idle::InactivityTimer;
    use common::item::{Item, ItemType};
    use common::testkit::{TestDownloadJob, TestUploadJob};
    use std::sync::Arc;

    fn upload_job(size: i64) -> Box<dyn UploadJob> {
        let item = Item::new("new_file_id", "root_id", "f", "etag", ItemType::File);
        Box::new(TestUploadJob::new(item, size).unwrap())
    }

    fn guard(timer: &Arc<InactivityTimer>) -> ActivityGuard {
        timer.activity()
    }

    #[tokio::test]
    async fn duplicate_job_ids_are_rejected() {
        let timer = InactivityTimer::new(None);
        let jobs = PendingJobs::new();
        jobs.add_upload(":1.1", "u1", upload_job(4), guard(&timer))
            .await
            .unwrap();
        let err = jobs
            .add_upload(":1.1", "u1", upload_job(4), guard(&timer))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::LogicError(_)));
        // the same id under another peer is a different job
        jobs.add_upload(":1.2", "u1", upload_job(4), guard(&timer))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn finish_after_cancel_observes_cancelled_then_reaps() {
        let timer = InactivityTimer::new(None);
        let jobs = PendingJobs::new();
        jobs.add_upload(":1.1", "u1", upload_job(20), guard(&timer))
            .await
            .unwrap();

        jobs.cancel_upload(":1.1", "u1").await.unwrap();
        // idempotent
        jobs.cancel_upload(":1.1", "u1").await.unwrap();

        let err = jobs.finish_upload(":1.1", "u1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));

        // the acknowledging finish reaped the slot
        let err = jobs.finish_upload(":1.1", "u1").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotExists(_)));
        assert!(jobs.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_job_is_not_exists() {
        let jobs = PendingJobs::new();
        assert!(matches!(
            jobs.finish_upload(":1.1", "nope").await.unwrap_err(),
            ProviderError::NotExists(_)
        ));
        assert!(matches!(
            jobs.cancel_download(":1.1", "nope").await.unwrap_err(),
            ProviderError::NotExists(_)
        ));
    }

    #[tokio::test]
    async fn peer_death_reaps_all_of_that_peers_jobs() {
        let timer = InactivityTimer::new(None);
        let jobs = PendingJobs::new();
        jobs.add_upload(":1.1", "u1", upload_job(4), guard(&timer))
            .await
            .unwrap();
        jobs.add_download(
            ":1.1",
            "d1",
            Box::new(TestDownloadJob::new("Hello world").unwrap()),
            guard(&timer),
        )
        .await
        .unwrap();
        jobs.add_upload(":1.2", "u1", upload_job(4), guard(&timer))
            .await
            .unwrap();

        jobs.cancel_peer_jobs(":1.1").await;

        assert!(matches!(
            jobs.finish_upload(":1.1", "u1").await.unwrap_err(),
            ProviderError::NotExists(_)
        ));
        assert!(matches!(
            jobs.finish_download(":1.1", "d1").await.unwrap_err(),
            ProviderError::NotExists(_)
        ));
        // the other peer's job is untouched
        jobs.cancel_upload(":1.2", "u1").await.unwrap();
    }
}
