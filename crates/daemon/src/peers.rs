//! Peer identity cache.
//!
//! RPC callers are identified by their unique bus name; the broker is asked
//! once per connection for the caller's uid, pid, and security label, and
//! the answer is cached until the peer disconnects. Callers that cannot be
//! resolved are rejected with `PermissionDenied` before dispatch.

use std::collections::HashMap;

use async_trait::async_trait;
use zbus::fdo;
use zbus::names::BusName;

use common::error::ProviderError;
use common::provider::Context;

/// Resolved identity of one bus peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub uid: u32,
    pub pid: u32,
    pub security_label: String,
}

impl PeerIdentity {
    pub fn to_context(&self) -> Context {
        Context {
            uid: self.uid,
            pid: self.pid,
            security_label: self.security_label.clone(),
        }
    }
}

/// Where peer credentials come from. The daemon asks the bus broker; tests
/// swap in a scripted source.
#[async_trait]
pub trait CredentialsSource: Send + Sync + 'static {
    async fn resolve(&self, peer: &str) -> Result<PeerIdentity, ProviderError>;
}

/// Broker-backed credentials source.
pub struct BusCredentialsSource {
    proxy: fdo::DBusProxy<'static>,
}

impl BusCredentialsSource {
    pub async fn new(connection: &zbus::Connection) -> zbus::Result<Self> {
        Ok(Self {
            proxy: fdo::DBusProxy::new(connection).await?,
        })
    }
}

#[async_trait]
impl CredentialsSource for BusCredentialsSource {
    async fn resolve(&self, peer: &str) -> Result<PeerIdentity, ProviderError> {
        let name = BusName::try_from(peer)
            .map_err(|e| ProviderError::LocalComms(format!("bad bus name {peer}: {e}")))?;
        let creds = self
            .proxy
            .get_connection_credentials(name)
            .await
            .map_err(|e| ProviderError::PermissionDenied(format!("{peer}: {e}")))?;
        let uid = creds.unix_user_id().ok_or_else(|| {
            ProviderError::PermissionDenied(format!("{peer}: broker reported no uid"))
        })?;
        let pid = creds.process_id().ok_or_else(|| {
            ProviderError::PermissionDenied(format!("{peer}: broker reported no pid"))
        })?;
        let security_label = creds
            .linux_security_label()
            .map(|label| {
                // LSM labels come NUL-terminated
                let label: &[u8] = label;
                let label = label.strip_suffix(&[0u8]).unwrap_or(label);
                String::from_utf8_lossy(label).into_owned()
            })
            .unwrap_or_default();
        Ok(PeerIdentity {
            uid,
            pid,
            security_label,
        })
    }
}

/// Cache of resolved peers keyed by unique bus name.
pub struct PeerCache {
    source: Box<dyn CredentialsSource>,
    // tokio mutex held across resolution: concurrent lookups for the same
    // peer coalesce into one broker round-trip
    entries: tokio::sync::Mutex<HashMap<String, PeerIdentity>>,
}

impl PeerCache {
    pub fn new(source: impl CredentialsSource) -> Self {
        Self {
            source: Box::new(source),
            entries: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a peer, consulting the broker only on first contact. Any
    /// resolution failure surfaces as `PermissionDenied`.
    pub async fn identify(&self, peer: &str) -> Result<PeerIdentity, ProviderError> {
        let mut entries = self.entries.lock().await;
        if let Some(identity) = entries.get(peer) {
            return Ok(identity.clone());
        }
        match self.source.resolve(peer).await {
            Ok(identity) => {
                entries.insert(peer.to_owned(), identity.clone());
                Ok(identity)
            }
            Err(e) => {
                tracing::debug!(peer, error = %e, "refusing unresolvable peer");
                Err(ProviderError::PermissionDenied(format!(
                    "cannot resolve peer {peer}: {e}"
                )))
            }
        }
    }

    /// Drop the cached entry for a disconnected peer.
    pub async fn forget(&self, peer: &str) {
        self.entries.lock().await.remove(peer);
    }
}
