//! Client surface for the session accounts service.
//!
//! The server controller discovers enabled accounts for its service id here
//! and receives add/disable events; the credential controller runs its
//! authentication requests through the same manager. Tests swap in
//! [`crate::testkit::FakeAccountsManager`].

pub mod bus;

use std::collections::HashMap;

use async_trait::async_trait;

use common::credentials::Credentials;
use common::error::ProviderError;

pub type AccountId = u64;

/// One enabled account as advertised by the accounts service.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub account_id: AccountId,
    pub service_id: String,
    pub display_name: String,
    pub provider_name: String,
    pub icon_name: String,
    /// Free-form account settings, e.g. `host` for password services.
    pub settings: HashMap<String, String>,
}

impl AccountInfo {
    pub fn new(account_id: AccountId, service_id: impl Into<String>) -> Self {
        Self {
            account_id,
            service_id: service_id.into(),
            display_name: String::new(),
            provider_name: String::new(),
            icon_name: String::new(),
            settings: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AccountEvent {
    Available(AccountInfo),
    Disabled(AccountId),
}

#[async_trait]
pub trait AccountsManager: Send + Sync + 'static {
    /// All enabled accounts advertising `service_id`.
    async fn accounts(&self, service_id: &str) -> Result<Vec<AccountInfo>, ProviderError>;

    /// Stream of account availability changes, across all services.
    fn events(&self) -> flume::Receiver<AccountEvent>;

    /// Run one credential acquisition for the account.
    async fn authenticate(
        &self,
        account_id: AccountId,
        interactive: bool,
    ) -> Result<Credentials, ProviderError>;
}

/// Decode an authentication reply dict into credentials.
///
/// The reply carries a `Method` discriminator plus the method's fields. A
/// password reply with empty `UserName`/`Secret` still yields credentials;
/// some service versions deliver the values only through the extra data,
/// which arrives flattened into the same dict.
pub fn credentials_from_reply(
    reply: &HashMap<String, String>,
    fallback_host: &str,
) -> Result<Credentials, ProviderError> {
    let field = |key: &str| reply.get(key).cloned().unwrap_or_default();
    match reply.get("Method").map(String::as_str) {
        Some("oauth1") => Ok(Credentials::OAuth1 {
            consumer_key: field("ConsumerKey"),
            consumer_secret: field("ConsumerSecret"),
            token: field("Token"),
            token_secret: field("TokenSecret"),
        }),
        Some("oauth2") => Ok(Credentials::OAuth2 {
            access_token: field("AccessToken"),
        }),
        Some("password") => {
            let host = match reply.get("Host") {
                Some(host) if !host.is_empty() => host.clone(),
                _ => fallback_host.to_owned(),
            };
            Ok(Credentials::Password {
                username: field("UserName"),
                password: field("Secret"),
                host,
            })
        }
        Some(other) => Err(ProviderError::PermissionDenied(format!(
            "unhandled authentication method: {other}"
        ))),
        None => Err(ProviderError::PermissionDenied(
            "authentication reply carried no method".to_owned(),
        )),
    }
}
