//! Dirty block flush wait
//!
//! Polls the dirty block count until it reaches zero, sleeping the calling
//! thread between polls. With the default policy the wait is unbounded:
//! detaching a pool that still holds dirty blocks would lose data, so
//! there is no safe point to give up at unless the operator sets one.

use crate::error::{LvCacheError, LvCacheResult};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Default time between dirty block checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How to wait for a cache to become clean
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Time between dirty block checks
    pub poll_interval: Duration,
    /// Give up after this long; `None` waits forever
    pub max_wait: Option<Duration>,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}

/// Snapshot passed to the progress hook after every non-zero poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushProgress {
    pub dirty: u64,
    pub polls: u32,
    pub elapsed: Duration,
}

/// Callback invoked with flush progress
pub type ProgressHook = Arc<dyn Fn(&FlushProgress) + Send + Sync>;

/// How a completed wait went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Number of dirty block queries, including the final zero
    pub polls: u32,
    pub elapsed: Duration,
}

/// Block until `query` reports zero dirty blocks.
///
/// Query errors end the wait immediately.
pub fn wait_for_flush<Q>(
    policy: &FlushPolicy,
    lv_name: &str,
    mut query: Q,
    on_progress: Option<&ProgressHook>,
) -> LvCacheResult<FlushOutcome>
where
    Q: FnMut() -> LvCacheResult<u64>,
{
    let started = Instant::now();
    let mut polls = 0;

    loop {
        let dirty = query()?;
        polls += 1;
        if dirty == 0 {
            return Ok(FlushOutcome {
                polls,
                elapsed: started.elapsed(),
            });
        }

        let progress = FlushProgress {
            dirty,
            polls,
            elapsed: started.elapsed(),
        };
        info!("{} blocks must still be flushed.", dirty);
        if let Some(hook) = on_progress {
            hook(&progress);
        }

        if let Some(max_wait) = policy.max_wait {
            if progress.elapsed >= max_wait {
                return Err(LvCacheError::FlushTimeout {
                    lv: lv_name.to_string(),
                    dirty,
                    waited_secs: progress.elapsed.as_secs(),
                });
            }
        }

        thread::sleep(policy.poll_interval);
    }
}
