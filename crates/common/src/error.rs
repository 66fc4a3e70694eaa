//! Error taxonomy for provider operations.
//!
//! Backend errors pass through the daemon unchanged except that
//! `Unauthorized` is intercepted once per RPC for re-authentication. Each
//! kind maps 1:1 onto a bus error name on the wire.

use std::io;

/// Errors a provider operation can resolve to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider unreachable or bus transport failure.
    #[error("remote communications error: {0}")]
    RemoteComms(String),

    /// Malformed argument shapes or invariant violations in backend returns.
    #[error("local communications error: {0}")]
    LocalComms(String),

    /// Item or job id unknown; carries the offending identifier.
    #[error("no such item: {0}")]
    NotExists(String),

    /// Name already in use when overwrite was not allowed.
    #[error("item already exists: {0}")]
    Exists(String),

    /// Version tag mismatch on update.
    #[error("conflicting change: {0}")]
    Conflict(String),

    /// Peer not authorized, filesystem EACCES, or auth failure after retry.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Credentials expired or missing; triggers one re-auth retry.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Job cancelled before completion.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Backend contract violation, e.g. too few bytes on upload.
    #[error("logic error: {0}")]
    LogicError(String),

    /// Client-supplied identifier malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Disk full, quota exceeded.
    #[error("resource error: {0}")]
    ResourceError(String),

    /// Catch-all; always carries a non-empty message.
    #[error("unknown error: {0}")]
    Unknown(String),
}

const ENOSPC: i32 = 28;
const EDQUOT: i32 = 122;

impl ProviderError {
    /// Map an I/O error to the taxonomy, using `key` as the identifier for
    /// existence-related kinds.
    pub fn from_io(err: io::Error, key: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ProviderError::NotExists(key.to_owned()),
            io::ErrorKind::AlreadyExists => ProviderError::Exists(key.to_owned()),
            io::ErrorKind::PermissionDenied => {
                ProviderError::PermissionDenied(format!("{key}: {err}"))
            }
            _ if matches!(err.raw_os_error(), Some(ENOSPC) | Some(EDQUOT)) => {
                ProviderError::ResourceError(err.to_string())
            }
            _ => ProviderError::Unknown(format!("{key}: {err}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
