pub mod local;

pub use local::LocalStaging;

use crate::error::Result;
use std::path::Path;
use tokio::io::AsyncBufRead;

pub type StagedReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// File staging supplied by the host workflow engine.
///
/// Staged files are addressed by URI; `stage_file` takes ownership of the
/// local file it is given.
#[async_trait::async_trait]
pub trait Staging: Send + Sync {
    /// Moves a finished local file into staging and returns its URI
    async fn stage_file(&self, path: &Path) -> Result<String>;

    async fn read_file(&self, uri: &str) -> Result<Vec<u8>>;

    /// Streams a staged file
    async fn open(&self, uri: &str) -> Result<StagedReader>;

    /// Withdraws a staged file
    async fn remove(&self, uri: &str) -> Result<()>;
}
