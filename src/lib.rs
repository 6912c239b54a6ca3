//! lvcache - dm-cache attach and detach for logical volumes
//!
//! Puts a cache pool in front of an LV by layering the LV's data under a
//! hidden `_corig` LV, and takes it away again after flushing the cache
//! through the cleaner policy.

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod journal;
pub mod metadata;
pub mod ui;

pub use context::CommandContext;
pub use error::{LvCacheError, LvCacheResult};
