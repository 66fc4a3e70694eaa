/**
 * Reference provider backend serving a directory
 *  of the local filesystem. Item ids are absolute
 *  paths under the configured root.
 */
pub mod provider;
/**
 * Streaming upload and download jobs over the
 *  transfer socket pair: uploads spool to a
 *  temporary file and rename into place on finish.
 */
pub mod transfer;

pub use provider::{LocalProvider, ROOT_VAR};
