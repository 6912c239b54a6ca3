//! CLI command implementations
//!
//! The cache core is synchronous and may sleep for a long time while a
//! cache drains, so commands run it on tokio's blocking pool.

pub mod cache;
pub mod config;
pub mod lv;
pub mod show;
pub mod vg;

pub use cache::execute as cache;
pub use config::execute as config;
pub use lv::execute as lv;
pub use show::execute as show;
pub use vg::execute as vg;

use crate::config::{Config, ConfigManager};
use crate::error::{LvCacheError, LvCacheResult};
use crate::metadata::store::FileStore;

/// Run `work` on the blocking pool
pub(crate) async fn blocking<T, F>(work: F) -> LvCacheResult<T>
where
    F: FnOnce() -> LvCacheResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LvCacheError::internal(format!("worker task failed: {}", e)))?
}

/// Read-only view of the configured metadata directory
pub(crate) fn metadata_files(config: &Config) -> FileStore {
    FileStore::new(ConfigManager::metadata_dir(config))
}
