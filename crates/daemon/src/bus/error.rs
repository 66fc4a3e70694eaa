//! Mapping of the error taxonomy onto bus error names.
//!
//! Every kind becomes `org.stratus.Provider.Error.<Kind>` with the
//! human-readable detail as the message.

use common::error::ProviderError;
use common::wire::WireError;

#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "org.stratus.Provider.Error")]
pub enum Error {
    #[zbus(error)]
    ZBus(zbus::Error),
    RemoteComms(String),
    LocalComms(String),
    NotExists(String),
    Exists(String),
    Conflict(String),
    PermissionDenied(String),
    Unauthorized(String),
    Cancelled(String),
    LogicError(String),
    InvalidArgument(String),
    ResourceError(String),
    Unknown(String),
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RemoteComms(msg) => Error::RemoteComms(msg),
            ProviderError::LocalComms(msg) => Error::LocalComms(msg),
            ProviderError::NotExists(key) => Error::NotExists(key),
            ProviderError::Exists(key) => Error::Exists(key),
            ProviderError::Conflict(msg) => Error::Conflict(msg),
            ProviderError::PermissionDenied(msg) => Error::PermissionDenied(msg),
            ProviderError::Unauthorized(msg) => Error::Unauthorized(msg),
            ProviderError::Cancelled(msg) => Error::Cancelled(msg),
            ProviderError::LogicError(msg) => Error::LogicError(msg),
            ProviderError::InvalidArgument(msg) => Error::InvalidArgument(msg),
            ProviderError::ResourceError(msg) => Error::ResourceError(msg),
            ProviderError::Unknown(msg) => Error::Unknown(msg),
        }
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        // a backend produced something the codec cannot carry
        Error::LocalComms(err.to_string())
    }
}
