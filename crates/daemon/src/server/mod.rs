//! Top-level daemon lifecycle.
//!
//! The server discovers accounts, publishes one provider object per account,
//! claims the well-known bus name only after the initial set is visible, and
//! exits when the inactivity timer fires. Account availability changes
//! arriving from the accounts service add and remove objects at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use common::error::ProviderError;
use common::provider::ProviderBase;
use common::wire::AccountRecord;

use crate::account::AccountData;
use crate::accounts::bus::BusAccountsManager;
use crate::accounts::{AccountEvent, AccountId, AccountInfo, AccountsManager};
use crate::bus::{ProviderInterface, RegistryInterface};
use crate::config::Config;
use crate::idle::InactivityTimer;
use crate::peers::{BusCredentialsSource, PeerCache};
use crate::process;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("bus error: {0}")]
    Bus(#[from] zbus::Error),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Factory the server uses to make one backend instance per account.
pub type ProviderFactory = Box<dyn Fn() -> Arc<dyn ProviderBase> + Send + Sync>;

/// Where provider objects become visible. The daemon publishes onto the bus;
/// tests record the calls instead.
#[async_trait]
pub trait AccountPublisher: Send + Sync + 'static {
    async fn publish(
        &self,
        record: &AccountRecord,
        account: Arc<AccountData>,
    ) -> Result<(), ProviderError>;

    async fn unpublish(&self, record: &AccountRecord) -> Result<(), ProviderError>;
}

struct RegisteredAccount {
    record: AccountRecord,
    data: Arc<AccountData>,
}

/// The set of live accounts and their published objects.
pub struct AccountRegistry {
    bus_name: String,
    service_id: String,
    factory: ProviderFactory,
    manager: Option<Arc<dyn AccountsManager>>,
    publisher: Arc<dyn AccountPublisher>,
    peers: Arc<PeerCache>,
    inactivity: Arc<InactivityTimer>,
    accounts: tokio::sync::Mutex<HashMap<AccountId, RegisteredAccount>>,
}

impl AccountRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus_name: impl Into<String>,
        service_id: impl Into<String>,
        factory: ProviderFactory,
        manager: Option<Arc<dyn AccountsManager>>,
        publisher: Arc<dyn AccountPublisher>,
        peers: Arc<PeerCache>,
        inactivity: Arc<InactivityTimer>,
    ) -> Self {
        Self {
            bus_name: bus_name.into(),
            service_id: service_id.into(),
            factory,
            manager,
            publisher,
            peers,
            inactivity,
            accounts: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Publish the single account of a fixed daemon at `/provider/0`.
    pub async fn add_fixed(&self) -> Result<(), ProviderError> {
        let data = AccountData::fixed(
            (self.factory)(),
            Arc::clone(&self.peers),
            Arc::clone(&self.inactivity),
        );
        let record = AccountRecord {
            provider_id: self.bus_name.clone(),
            object_path: AccountRecord::provider_path(0),
            id: 0,
            service_id: String::new(),
            display_name: String::new(),
            provider_name: String::new(),
            icon_name: String::new(),
        };
        let mut accounts = self.accounts.lock().await;
        self.publisher.publish(&record, Arc::clone(&data)).await?;
        accounts.insert(0, RegisteredAccount { record, data });
        Ok(())
    }

    /// Publish one online account. A second add for a known id is a no-op.
    pub async fn add_account(&self, info: AccountInfo) -> Result<(), ProviderError> {
        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(&info.account_id) {
            tracing::debug!(account_id = info.account_id, "account already registered");
            return Ok(());
        }
        let manager = self.manager.clone().ok_or_else(|| {
            ProviderError::LogicError("fixed daemon cannot host online accounts".to_owned())
        })?;
        tracing::debug!(
            account_id = info.account_id,
            service_id = %info.service_id,
            "found account"
        );
        let data = AccountData::online(
            &info,
            (self.factory)(),
            Arc::clone(&self.peers),
            Arc::clone(&self.inactivity),
            manager,
        );
        let record = self.record_for(&info);
        self.publisher.publish(&record, Arc::clone(&data)).await?;
        accounts.insert(info.account_id, RegisteredAccount { record, data });
        Ok(())
    }

    /// Unpublish a disabled account. Unknown ids are ignored.
    pub async fn remove_account(&self, account_id: AccountId) -> Result<(), ProviderError> {
        let entry = {
            let mut accounts = self.accounts.lock().await;
            accounts.remove(&account_id)
        };
        let Some(entry) = entry else {
            return Ok(());
        };
        tracing::debug!(account_id, "disabled account");
        self.publisher.unpublish(&entry.record).await
    }

    pub async fn handle_event(&self, event: AccountEvent) {
        match event {
            AccountEvent::Available(info) if info.service_id == self.service_id => {
                if let Err(e) = self.add_account(info).await {
                    tracing::warn!(error = %e, "failed to add account");
                }
            }
            AccountEvent::Available(info) => {
                tracing::trace!(
                    account_id = info.account_id,
                    service_id = %info.service_id,
                    "ignoring account for another service"
                );
            }
            AccountEvent::Disabled(account_id) => {
                if let Err(e) = self.remove_account(account_id).await {
                    tracing::warn!(account_id, error = %e, "failed to remove account");
                }
            }
        }
    }

    /// Reap everything a disconnected peer left behind, across all accounts.
    pub async fn forget_peer(&self, peer: &str) {
        self.peers.forget(peer).await;
        let datas: Vec<Arc<AccountData>> = {
            let accounts = self.accounts.lock().await;
            accounts.values().map(|a| Arc::clone(&a.data)).collect()
        };
        for data in datas {
            data.jobs().cancel_peer_jobs(peer).await;
        }
    }

    pub async fn account_ids(&self) -> Vec<AccountId> {
        let accounts = self.accounts.lock().await;
        let mut ids: Vec<AccountId> = accounts.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn record_for(&self, info: &AccountInfo) -> AccountRecord {
        AccountRecord {
            provider_id: self.bus_name.clone(),
            object_path: AccountRecord::provider_path(info.account_id),
            id: info.account_id as i64,
            service_id: info.service_id.clone(),
            display_name: info.display_name.clone(),
            provider_name: info.provider_name.clone(),
            icon_name: info.icon_name.clone(),
        }
    }
}

/// Publisher that registers objects on the bus and emits lifecycle signals
/// from the registry object at `/provider`.
pub struct BusPublisher {
    connection: zbus::Connection,
}

impl BusPublisher {
    pub async fn new(connection: zbus::Connection) -> zbus::Result<Self> {
        connection
            .object_server()
            .at("/provider", RegistryInterface)
            .await?;
        Ok(Self { connection })
    }

    async fn registry(
        &self,
    ) -> Result<zbus::object_server::InterfaceRef<RegistryInterface>, ProviderError> {
        self.connection
            .object_server()
            .interface::<_, RegistryInterface>("/provider")
            .await
            .map_err(bus_error)
    }
}

fn bus_error(err: zbus::Error) -> ProviderError {
    ProviderError::RemoteComms(err.to_string())
}

#[async_trait]
impl AccountPublisher for BusPublisher {
    async fn publish(
        &self,
        record: &AccountRecord,
        account: Arc<AccountData>,
    ) -> Result<(), ProviderError> {
        self.connection
            .object_server()
            .at(record.object_path.as_str(), ProviderInterface::new(account))
            .await
            .map_err(bus_error)?;
        let registry = self.registry().await?;
        RegistryInterface::account_added(registry.signal_emitter(), record)
            .await
            .map_err(bus_error)?;
        Ok(())
    }

    async fn unpublish(&self, record: &AccountRecord) -> Result<(), ProviderError> {
        self.connection
            .object_server()
            .remove::<ProviderInterface, _>(record.object_path.as_str())
            .await
            .map_err(bus_error)?;
        let registry = self.registry().await?;
        RegistryInterface::account_removed(registry.signal_emitter(), record)
            .await
            .map_err(bus_error)?;
        Ok(())
    }
}

pub struct Server {
    config: Config,
    connection: zbus::Connection,
    registry: Arc<AccountRegistry>,
    manager: Option<Arc<dyn AccountsManager>>,
    inactivity: Arc<InactivityTimer>,
}

impl Server {
    /// Wire up the daemon against the session bus (or an injected
    /// connection). Nothing is published until [`Server::run`].
    pub async fn new(
        config: Config,
        factory: impl Fn() -> Arc<dyn ProviderBase> + Send + Sync + 'static,
        connection: Option<zbus::Connection>,
    ) -> Result<Self, ServerError> {
        let connection = match connection {
            Some(connection) => connection,
            None => zbus::Connection::session().await?,
        };
        let inactivity = InactivityTimer::new(config.idle_timeout);
        let peers = Arc::new(PeerCache::new(BusCredentialsSource::new(&connection).await?));
        let publisher = Arc::new(BusPublisher::new(connection.clone()).await?);
        let manager: Option<Arc<dyn AccountsManager>> = if config.service_id.is_empty() {
            None
        } else {
            Some(Arc::new(BusAccountsManager::connect(&connection).await?))
        };
        let registry = Arc::new(AccountRegistry::new(
            config.bus_name.clone(),
            config.service_id.clone(),
            Box::new(factory),
            manager.clone(),
            publisher,
            peers,
            Arc::clone(&inactivity),
        ));
        Ok(Self {
            config,
            connection,
            registry,
            manager,
            inactivity,
        })
    }

    /// Publish the initial accounts, claim the bus name, and serve until the
    /// idle window elapses or a termination signal arrives.
    pub async fn run(self) -> Result<(), ServerError> {
        // every initial object must be visible before the name is claimed so
        // clients never observe a partially-populated namespace
        match &self.manager {
            Some(manager) => {
                for info in manager.accounts(&self.config.service_id).await? {
                    self.registry.add_account(info).await?;
                }
            }
            None => self.registry.add_fixed().await?,
        }
        self.connection
            .request_name(self.config.bus_name.as_str())
            .await?;
        tracing::info!(
            bus_name = %self.config.bus_name,
            unique_name = ?self.connection.unique_name(),
            "bus name acquired"
        );

        let watcher = tokio::spawn(watch_peers(
            self.connection.clone(),
            Arc::clone(&self.registry),
        ));
        let (signal_task, _shutdown_tx, mut shutdown_rx) = process::graceful_shutdown_blocker()?;

        let events = self.manager.as_ref().map(|m| m.events());
        loop {
            tokio::select! {
                _ = self.inactivity.expired() => {
                    let window_ms = self
                        .inactivity
                        .window()
                        .map(|w| w.as_millis())
                        .unwrap_or_default();
                    tracing::info!("exiting after {window_ms} ms of idle time");
                    break;
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("shutting down on signal");
                    break;
                }
                event = next_event(&events) => match event {
                    Some(event) => self.registry.handle_event(event).await,
                    None => {
                        tracing::warn!("accounts event stream closed");
                        break;
                    }
                }
            }
        }
        watcher.abort();
        signal_task.abort();
        Ok(())
    }
}

async fn next_event(events: &Option<flume::Receiver<AccountEvent>>) -> Option<AccountEvent> {
    match events {
        Some(rx) => rx.recv_async().await.ok(),
        None => std::future::pending().await,
    }
}

/// Watch the broker for vanished unique names and reap their state.
async fn watch_peers(connection: zbus::Connection, registry: Arc<AccountRegistry>) {
    let proxy = match zbus::fdo::DBusProxy::new(&connection).await {
        Ok(proxy) => proxy,
        Err(e) => {
            tracing::warn!(error = %e, "cannot watch peer lifetimes");
            return;
        }
    };
    let mut stream = match proxy.receive_name_owner_changed().await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "cannot watch peer lifetimes");
            return;
        }
    };
    while let Some(signal) = stream.next().await {
        let args = match signal.args() {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(error = %e, "bad NameOwnerChanged signal");
                continue;
            }
        };
        if let zbus::names::BusName::Unique(name) = args.name() {
            if args.new_owner().is_none() {
                tracing::debug!(peer = %name, "peer disconnected");
                registry.forget_peer(name.as_str()).await;
            }
        }
    }
}
