/**
 * Credential shapes an account can carry after
 *  authentication (OAuth1, OAuth2, password, none).
 */
pub mod credentials;
/**
 * The error taxonomy shared by providers and the
 *  daemon runtime. Every backend call resolves to
 *  one of these kinds.
 */
pub mod error;
/**
 * The item model: the atom of the storage API
 *  (roots, folders, files) plus typed metadata
 *  values.
 */
pub mod item;
/**
 * The contract a storage backend implements:
 *  future-returning item operations plus upload
 *  and download jobs that stream bytes over a
 *  socket pair.
 */
pub mod provider;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;
/**
 * Bus wire records for items and account
 *  descriptors, and the codec between them and
 *  the domain model.
 */
pub mod wire;

pub mod testkit;

pub mod prelude {
    pub use crate::credentials::Credentials;
    pub use crate::error::{ProviderError, Result};
    pub use crate::item::{Item, ItemType, MetadataValue};
    pub use crate::provider::{Context, DownloadJob, ProviderBase, UploadJob};
    pub use crate::version::build_info;
    pub use crate::wire::{AccountRecord, ItemRecord};
}
