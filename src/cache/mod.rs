//! Cache attach and detach
//!
//! Orchestrates the metadata edits and kernel operations that put a cache
//! pool in front of an LV and take it away again.
//!
//! # Lifecycle
//!
//! | State | Layout |
//! |-------|--------|
//! | Plain | `<lv>` maps its data directly |
//! | Cached | `<lv>` is a cache segment over hidden `<lv>_corig`, linked to the pool |
//! | Detached | `<lv>` maps its data directly, the pool is unused |
//!
//! Create only edits metadata; the caller persists and reloads. Remove
//! drives the kernel itself because the cache must be flushed before the
//! pool can go.

pub mod create;
pub mod flush;
pub mod remove;
pub mod txn;

pub use create::create_cache;
pub use flush::{wait_for_flush, FlushOutcome, FlushPolicy, FlushProgress, ProgressHook};
pub use remove::{remove_cache, RemovalSummary, RemoveStep, StepFailure};
pub use txn::{activation_closure, update_and_reload, TxOutcome, TxPhase};
