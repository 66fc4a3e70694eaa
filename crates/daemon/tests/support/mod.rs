//! Shared test utilities for daemon integration tests
#![allow(dead_code)]

use std::sync::Arc;

use common::provider::ProviderBase;
use common::testkit::TestProvider;
use stratus_daemon::account::AccountData;
use stratus_daemon::accounts::{AccountInfo, AccountsManager};
use stratus_daemon::dispatch::Dispatcher;
use stratus_daemon::idle::InactivityTimer;
use stratus_daemon::peers::{PeerCache, PeerIdentity};
use stratus_daemon::testkit::FakeCredentialsSource;

/// The unique bus name every test peer calls from.
pub const PEER: &str = ":1.42";

pub fn identity() -> PeerIdentity {
    PeerIdentity {
        uid: 1000,
        pid: 4242,
        security_label: "unconfined".to_owned(),
    }
}

/// Dispatcher over a fixed account with `PEER` pre-authorized.
pub fn dispatcher_for(provider: Arc<dyn ProviderBase>) -> Dispatcher {
    let source = FakeCredentialsSource::new();
    source.allow(PEER, identity());
    let peers = Arc::new(PeerCache::new(source));
    let timer = InactivityTimer::new(None);
    Dispatcher::new(AccountData::fixed(provider, peers, timer))
}

pub fn test_dispatcher() -> Dispatcher {
    dispatcher_for(Arc::new(TestProvider::new()))
}

/// Dispatcher over an online account bound to the given accounts manager.
pub fn online_dispatcher(
    provider: Arc<dyn ProviderBase>,
    manager: Arc<dyn AccountsManager>,
) -> Dispatcher {
    let source = FakeCredentialsSource::new();
    source.allow(PEER, identity());
    let peers = Arc::new(PeerCache::new(source));
    let timer = InactivityTimer::new(None);
    let info = AccountInfo::new(7, "svc");
    Dispatcher::new(AccountData::online(&info, provider, peers, timer, manager))
}

/// Wrap the descriptor handed back by a streaming RPC the way a client
/// library would.
pub fn client_stream(fd: std::os::fd::OwnedFd) -> tokio::net::UnixStream {
    let std_stream = std::os::unix::net::UnixStream::from(fd);
    tokio::net::UnixStream::from_std(std_stream).unwrap()
}
