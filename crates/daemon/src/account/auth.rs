//! Per-account credential controller.
//!
//! At most one authentication attempt is in flight per account. A
//! non-interactive request arriving during any attempt joins it; an
//! interactive request arriving during a non-interactive attempt supersedes
//! it, and the superseded waiters resolve `Cancelled`. Credentials are
//! replaced atomically when an attempt completes.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use common::credentials::Credentials;
use common::error::ProviderError;

use crate::accounts::{AccountId, AccountsManager};

type AuthOutcome = Result<Credentials, ProviderError>;

struct Inflight {
    interactive: bool,
    generation: u64,
    tx: watch::Sender<Option<AuthOutcome>>,
}

struct AuthState {
    credentials: Credentials,
    valid: bool,
    inflight: Option<Inflight>,
    generation: u64,
}

struct ControllerInner {
    manager: Arc<dyn AccountsManager>,
    account_id: AccountId,
    /// Substituted into password credentials that arrive without a host.
    fallback_host: String,
    state: Mutex<AuthState>,
}

impl ControllerInner {
    fn lock(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fill_host(&self, credentials: Credentials) -> Credentials {
        match credentials {
            Credentials::Password {
                username,
                password,
                host,
            } if host.is_empty() => Credentials::Password {
                username,
                password,
                host: self.fallback_host.clone(),
            },
            other => other,
        }
    }
}

/// Kick off a fresh attempt and hand back its completion channel.
fn begin(
    inner: &Arc<ControllerInner>,
    state: &mut AuthState,
    interactive: bool,
) -> watch::Receiver<Option<AuthOutcome>> {
    state.valid = false;
    state.credentials = Credentials::None;
    state.generation = state.generation.wrapping_add(1);
    let generation = state.generation;
    let (tx, rx) = watch::channel(None);
    state.inflight = Some(Inflight {
        interactive,
        generation,
        tx: tx.clone(),
    });

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let outcome = inner
            .manager
            .authenticate(inner.account_id, interactive)
            .await
            .map(|credentials| inner.fill_host(credentials));
        {
            let mut state = inner.lock();
            let current = state
                .inflight
                .as_ref()
                .is_some_and(|inflight| inflight.generation == generation);
            if current {
                match &outcome {
                    Ok(credentials) => {
                        state.credentials = credentials.clone();
                        state.valid = true;
                    }
                    Err(e) => {
                        tracing::warn!(
                            account_id = inner.account_id,
                            error = %e,
                            "authentication failed"
                        );
                        state.credentials = Credentials::None;
                        state.valid = false;
                    }
                }
                state.inflight = None;
            }
        }
        let _ = tx.send(Some(outcome));
    });
    rx
}

pub struct CredentialController {
    inner: Arc<ControllerInner>,
}

impl CredentialController {
    pub fn new(
        account_id: AccountId,
        fallback_host: impl Into<String>,
        manager: Arc<dyn AccountsManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(ControllerInner {
                manager,
                account_id,
                fallback_host: fallback_host.into(),
                state: Mutex::new(AuthState {
                    credentials: Credentials::None,
                    valid: false,
                    inflight: None,
                    generation: 0,
                }),
            }),
        })
    }

    /// Current credentials, if the last attempt succeeded.
    pub fn credentials(&self) -> Option<Credentials> {
        let state = self.inner.lock();
        state.valid.then(|| state.credentials.clone())
    }

    /// Mark the current credentials stale so the next caller re-authenticates.
    pub fn invalidate(&self) {
        self.inner.lock().valid = false;
    }

    /// Obtain fresh credentials, joining or superseding an in-flight attempt
    /// per the single-flight rules above.
    pub async fn authenticate(&self, interactive: bool) -> AuthOutcome {
        let mut rx = {
            let mut state = self.inner.lock();
            match state.inflight.as_ref() {
                Some(inflight) if inflight.interactive || !interactive => inflight.tx.subscribe(),
                Some(_) => {
                    // a non-interactive attempt loses to the interactive demand
                    if let Some(old) = state.inflight.take() {
                        let _ = old.tx.send(Some(Err(ProviderError::Cancelled(
                            "superseded by interactive authentication".to_owned(),
                        ))));
                    }
                    begin(&self.inner, &mut state, interactive)
                }
                None => begin(&self.inner, &mut state, interactive),
            }
        };
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            rx.changed()
                .await
                .map_err(|_| ProviderError::Cancelled("authentication abandoned".to_owned()))?;
        }
    }
}
