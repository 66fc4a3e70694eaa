/// Deterministic in-process provider for exercising the daemon runtime
/// without a real storage backend.
///
/// `TestProvider` serves a fixed single-root tree with a two-page listing,
/// streams `"Hello world"` downloads a couple of bytes per tick, and hands
/// out byte-counting upload jobs that enforce the declared size on finish.
///
/// Upload jobs read their provider-side socket to EOF, so a test must close
/// (drop) the client descriptor before calling `finish`.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestProvider;
///
/// let provider = std::sync::Arc::new(TestProvider::new());
/// let roots = provider.roots(&ctx).await?;
/// assert_eq!(roots[0].item_id, "root_id");
/// ```
mod provider;

pub use provider::{TestDownloadJob, TestProvider, TestUploadJob, DOWNLOAD_DATA};
