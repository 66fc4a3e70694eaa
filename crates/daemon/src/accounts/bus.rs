//! Accounts service client over the session bus.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use zbus::zvariant::Type;

use common::credentials::Credentials;
use common::error::ProviderError;

use super::{credentials_from_reply, AccountEvent, AccountId, AccountInfo, AccountsManager};

/// Wire shape of one account row: `(tssssa{ss})`.
#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct AccountRow {
    pub account_id: u64,
    pub service_id: String,
    pub display_name: String,
    pub provider_name: String,
    pub icon_name: String,
    pub settings: HashMap<String, String>,
}

impl From<AccountRow> for AccountInfo {
    fn from(row: AccountRow) -> Self {
        AccountInfo {
            account_id: row.account_id,
            service_id: row.service_id,
            display_name: row.display_name,
            provider_name: row.provider_name,
            icon_name: row.icon_name,
            settings: row.settings,
        }
    }
}

#[zbus::proxy(
    interface = "org.stratus.Accounts",
    default_service = "org.stratus.Accounts",
    default_path = "/org/stratus/Accounts",
    gen_blocking = false
)]
trait Accounts {
    /// Enabled accounts advertising the given service id.
    async fn accounts_for_service(&self, service_id: &str) -> zbus::Result<Vec<AccountRow>>;

    /// Acquire credentials for an account. The reply is a flat string dict
    /// keyed by `Method` plus the method's fields.
    async fn authenticate(
        &self,
        account_id: u64,
        interactive: bool,
    ) -> zbus::Result<HashMap<String, String>>;

    #[zbus(signal)]
    async fn account_available(&self, account: AccountRow) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn account_disabled(&self, account_id: u64) -> zbus::Result<()>;
}

/// Bus-backed accounts manager. Forwards availability signals into a channel
/// the server controller drains.
pub struct BusAccountsManager {
    proxy: AccountsProxy<'static>,
    events: flume::Receiver<AccountEvent>,
    _forwarder: JoinHandle<()>,
}

impl BusAccountsManager {
    pub async fn connect(connection: &zbus::Connection) -> zbus::Result<Self> {
        let proxy = AccountsProxy::new(connection).await?;
        let (tx, events) = flume::unbounded();
        let signal_proxy = proxy.clone();
        let forwarder = tokio::spawn(async move {
            let streams = async {
                let available = signal_proxy.receive_account_available().await?;
                let disabled = signal_proxy.receive_account_disabled().await?;
                Ok::<_, zbus::Error>((available, disabled))
            }
            .await;
            let (mut available, mut disabled) = match streams {
                Ok(streams) => streams,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot watch accounts service signals");
                    return;
                }
            };
            loop {
                let event = tokio::select! {
                    Some(signal) = available.next() => match signal.args() {
                        Ok(args) => AccountEvent::Available(args.account.into()),
                        Err(e) => {
                            tracing::warn!(error = %e, "bad accountAvailable signal");
                            continue;
                        }
                    },
                    Some(signal) = disabled.next() => match signal.args() {
                        Ok(args) => AccountEvent::Disabled(args.account_id),
                        Err(e) => {
                            tracing::warn!(error = %e, "bad accountDisabled signal");
                            continue;
                        }
                    },
                    else => break,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        Ok(Self {
            proxy,
            events,
            _forwarder: forwarder,
        })
    }
}

#[async_trait]
impl AccountsManager for BusAccountsManager {
    async fn accounts(&self, service_id: &str) -> Result<Vec<AccountInfo>, ProviderError> {
        let rows = self
            .proxy
            .accounts_for_service(service_id)
            .await
            .map_err(|e| ProviderError::RemoteComms(format!("accounts service: {e}")))?;
        Ok(rows.into_iter().map(AccountInfo::from).collect())
    }

    fn events(&self) -> flume::Receiver<AccountEvent> {
        self.events.clone()
    }

    async fn authenticate(
        &self,
        account_id: AccountId,
        interactive: bool,
    ) -> Result<Credentials, ProviderError> {
        let reply = self
            .proxy
            .authenticate(account_id, interactive)
            .await
            .map_err(|e| {
                ProviderError::PermissionDenied(format!("authentication request failed: {e}"))
            })?;
        credentials_from_reply(&reply, "")
    }
}
