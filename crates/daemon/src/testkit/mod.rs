//! Fakes for exercising the daemon runtime without a bus.
//!
//! `FakeCredentialsSource` scripts peer identities, `FakeAccountsManager`
//! plays the accounts service (including gated authentication for
//! single-flight tests), and `FakePublisher` records object lifecycle calls
//! instead of touching an object server.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use common::credentials::Credentials;
use common::error::ProviderError;
use common::wire::AccountRecord;

use crate::account::AccountData;
use crate::accounts::{AccountEvent, AccountId, AccountInfo, AccountsManager};
use crate::peers::{CredentialsSource, PeerIdentity};
use crate::server::AccountPublisher;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scripted peer identities.
#[derive(Default)]
pub struct FakeCredentialsSource {
    identities: Mutex<HashMap<String, PeerIdentity>>,
    calls: Arc<AtomicUsize>,
}

impl FakeCredentialsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `peer` resolvable with the given identity.
    pub fn allow(&self, peer: &str, identity: PeerIdentity) {
        lock(&self.identities).insert(peer.to_owned(), identity);
    }

    /// Counter of resolution round-trips, for cache assertions.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl CredentialsSource for FakeCredentialsSource {
    async fn resolve(&self, peer: &str) -> Result<PeerIdentity, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.identities)
            .get(peer)
            .cloned()
            .ok_or_else(|| ProviderError::PermissionDenied(format!("unknown peer {peer}")))
    }
}

/// In-memory accounts service.
pub struct FakeAccountsManager {
    accounts: Mutex<Vec<AccountInfo>>,
    credentials: Mutex<Result<Credentials, ProviderError>>,
    auth_log: Mutex<Vec<bool>>,
    auth_gate: Mutex<Option<Arc<Notify>>>,
    events_tx: flume::Sender<AccountEvent>,
    events_rx: flume::Receiver<AccountEvent>,
}

impl Default for FakeAccountsManager {
    fn default() -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            accounts: Mutex::new(Vec::new()),
            credentials: Mutex::new(Ok(Credentials::OAuth2 {
                access_token: "test-token".to_owned(),
            })),
            auth_log: Mutex::new(Vec::new()),
            auth_gate: Mutex::new(None),
            events_tx,
            events_rx,
        }
    }
}

impl FakeAccountsManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_credentials(&self, outcome: Result<Credentials, ProviderError>) {
        *lock(&self.credentials) = outcome;
    }

    /// Interactive flags of the authentication calls seen so far.
    pub fn auth_calls(&self) -> Vec<bool> {
        lock(&self.auth_log).clone()
    }

    /// Block authentication replies until [`Self::release_auth`].
    pub fn hold_auth(&self) {
        *lock(&self.auth_gate) = Some(Arc::new(Notify::new()));
    }

    pub fn release_auth(&self) {
        if let Some(gate) = lock(&self.auth_gate).take() {
            gate.notify_waiters();
        }
    }

    /// Register an account and announce it as available.
    pub fn announce(&self, info: AccountInfo) {
        lock(&self.accounts).push(info.clone());
        let _ = self.events_tx.send(AccountEvent::Available(info));
    }

    /// Drop an account and announce the disable.
    pub fn disable(&self, account_id: AccountId) {
        lock(&self.accounts).retain(|a| a.account_id != account_id);
        let _ = self.events_tx.send(AccountEvent::Disabled(account_id));
    }
}

#[async_trait]
impl AccountsManager for FakeAccountsManager {
    async fn accounts(&self, service_id: &str) -> Result<Vec<AccountInfo>, ProviderError> {
        Ok(lock(&self.accounts)
            .iter()
            .filter(|a| a.service_id == service_id)
            .cloned()
            .collect())
    }

    fn events(&self) -> flume::Receiver<AccountEvent> {
        self.events_rx.clone()
    }

    async fn authenticate(
        &self,
        _account_id: AccountId,
        interactive: bool,
    ) -> Result<Credentials, ProviderError> {
        lock(&self.auth_log).push(interactive);
        let gate = lock(&self.auth_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        lock(&self.credentials).clone()
    }
}

/// Records publish/unpublish calls instead of registering bus objects.
#[derive(Default)]
pub struct FakePublisher {
    published: Mutex<BTreeMap<i64, AccountRecord>>,
    log: Mutex<Vec<String>>,
}

impl FakePublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Object paths currently visible, in account order.
    pub fn published_paths(&self) -> Vec<String> {
        lock(&self.published)
            .values()
            .map(|record| record.object_path.as_str().to_owned())
            .collect()
    }

    /// Chronological add/remove log, e.g. `"added /provider/42"`.
    pub fn events(&self) -> Vec<String> {
        lock(&self.log).clone()
    }
}

#[async_trait]
impl AccountPublisher for FakePublisher {
    async fn publish(
        &self,
        record: &AccountRecord,
        _account: Arc<AccountData>,
    ) -> Result<(), ProviderError> {
        lock(&self.published).insert(record.id, record.clone());
        lock(&self.log).push(format!("added {}", record.object_path.as_str()));
        Ok(())
    }

    async fn unpublish(&self, record: &AccountRecord) -> Result<(), ProviderError> {
        lock(&self.published).remove(&record.id);
        lock(&self.log).push(format!("removed {}", record.object_path.as_str()));
        Ok(())
    }
}
