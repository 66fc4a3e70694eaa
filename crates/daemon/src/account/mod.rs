//! Per-account container.
//!
//! One `AccountData` lives from account-enabled to account-disabled (or
//! server shutdown). It owns the backend handle and the pending-jobs
//! registry exclusively, shares the peer cache and inactivity timer with its
//! siblings, and runs the credential state machine for its account.

pub mod auth;

use std::sync::Arc;

use common::credentials::Credentials;
use common::error::Result;
use common::provider::ProviderBase;

use crate::accounts::{AccountId, AccountInfo, AccountsManager};
use crate::idle::InactivityTimer;
use crate::jobs::PendingJobs;
use crate::peers::PeerCache;

use auth::CredentialController;

pub struct AccountData {
    account_id: AccountId,
    provider: Arc<dyn ProviderBase>,
    peers: Arc<PeerCache>,
    inactivity: Arc<InactivityTimer>,
    jobs: PendingJobs,
    // fixed accounts carry no controller and always pass empty credentials
    auth: Option<Arc<CredentialController>>,
}

impl AccountData {
    /// The single account of a fixed (no accounts service) daemon. Account
    /// id 0, never authenticates.
    pub fn fixed(
        provider: Arc<dyn ProviderBase>,
        peers: Arc<PeerCache>,
        inactivity: Arc<InactivityTimer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            account_id: 0,
            provider,
            peers,
            inactivity,
            jobs: PendingJobs::new(),
            auth: None,
        })
    }

    /// An account bound to the accounts service. Non-interactive
    /// authentication starts immediately, the way a freshly enabled account
    /// is expected to warm up.
    pub fn online(
        info: &AccountInfo,
        provider: Arc<dyn ProviderBase>,
        peers: Arc<PeerCache>,
        inactivity: Arc<InactivityTimer>,
        manager: Arc<dyn AccountsManager>,
    ) -> Arc<Self> {
        let host = info.settings.get("host").cloned().unwrap_or_default();
        let auth = CredentialController::new(info.account_id, host, manager);
        let warmup = Arc::clone(&auth);
        tokio::spawn(async move {
            let _ = warmup.authenticate(false).await;
        });
        Arc::new(Self {
            account_id: info.account_id,
            provider,
            peers,
            inactivity,
            jobs: PendingJobs::new(),
            auth: Some(auth),
        })
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn provider(&self) -> &Arc<dyn ProviderBase> {
        &self.provider
    }

    pub fn peers(&self) -> &Arc<PeerCache> {
        &self.peers
    }

    pub fn inactivity(&self) -> &Arc<InactivityTimer> {
        &self.inactivity
    }

    pub fn jobs(&self) -> &PendingJobs {
        &self.jobs
    }

    /// Credentials for a backend call, waiting for a fresh non-interactive
    /// attempt when none are held.
    pub async fn ensure_credentials(&self) -> Result<Credentials> {
        match &self.auth {
            None => Ok(Credentials::None),
            Some(auth) => match auth.credentials() {
                Some(credentials) => Ok(credentials),
                None => auth.authenticate(false).await,
            },
        }
    }

    /// Drop the held credentials and run one interactive attempt. Called by
    /// the dispatcher when a backend call came back `Unauthorized`.
    pub async fn refresh_credentials(&self) -> Result<Credentials> {
        match &self.auth {
            None => Ok(Credentials::None),
            Some(auth) => {
                auth.invalidate();
                auth.authenticate(true).await
            }
        }
    }
}
