//! Live device-mapper access
//!
//! Provides the kernel-facing half of the cache protocol behind one trait
//! so the orchestrators never talk to a particular transport:
//! - `dmsetup`: drives real device-mapper devices through the dmsetup binary
//! - `simulate`: logs every operation and reports a clean cache

mod dmsetup;
mod simulate;
pub mod status;

pub use dmsetup::Dmsetup;
pub use simulate::Simulated;
pub use status::{CacheBlockInfo, CacheStatus};

use crate::error::LvCacheResult;
use crate::metadata::model::{CachePolicy, LvId, VolumeGroup};

/// Kernel operations the cache protocol needs
///
/// Every call addresses a single LV by handle; the implementation derives
/// the device name from the group. Suspending or resuming an LV also acts
/// on the devices stacked underneath it.
pub trait DeviceManager: Send {
    /// Stage the tables for the LV's new metadata without switching to them
    fn preload(&mut self, _vg: &VolumeGroup, _lv: LvId) -> LvCacheResult<()> {
        Ok(())
    }

    /// Quiesce I/O on the LV's live table
    fn suspend(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()>;

    /// Switch to the preloaded tables and resume I/O
    fn resume(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()>;

    /// Make the LV available as a device
    fn activate(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()>;

    /// Remove the LV's device
    fn deactivate(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()>;

    /// Policy the kernel target is running
    fn cache_policy(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<CachePolicy>;

    /// Block counters of the kernel target
    fn cache_block_info(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<CacheBlockInfo>;

    /// Backend name for display
    fn backend_name(&self) -> &'static str;
}

/// Device-mapper name of an LV: `<vg>-<lv>` with dashes inside each name doubled
pub fn dm_name(vg: &str, lv: &str) -> String {
    format!("{}-{}", vg.replace('-', "--"), lv.replace('-', "--"))
}
