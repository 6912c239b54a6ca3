//! Simulated device manager
//!
//! Rehearses metadata changes without touching the kernel. Operations
//! are logged and checked for ordering: suspend and resume act on the
//! whole stack under an LV, and a suspended device cannot be removed.
//! The reported policy is the one recorded in metadata and the cache is
//! always clean.

use crate::cache::txn::activation_closure;
use crate::device::status::CacheBlockInfo;
use crate::device::{dm_name, DeviceManager};
use crate::error::{LvCacheError, LvCacheResult};
use crate::metadata::model::{CachePolicy, LvId, SegType, VolumeGroup};
use std::collections::BTreeSet;
use tracing::info;

/// Device manager that only logs
#[derive(Debug, Default)]
pub struct Simulated {
    suspended: BTreeSet<String>,
}

impl Simulated {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices currently suspended
    pub fn suspended(&self) -> impl Iterator<Item = &str> {
        self.suspended.iter().map(String::as_str)
    }
}

impl DeviceManager for Simulated {
    fn preload(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        info!(
            "[simulate] preload {} table(s) under {}",
            activation_closure(vg, lv).len(),
            dm_name(&vg.name, &vg.lv(lv)?.name)
        );
        Ok(())
    }

    fn suspend(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        info!("[simulate] suspend {}", dm_name(&vg.name, &vg.lv(lv)?.name));
        for id in activation_closure(vg, lv) {
            self.suspended.insert(dm_name(&vg.name, &vg.lv(id)?.name));
        }
        Ok(())
    }

    fn resume(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        info!("[simulate] resume {}", dm_name(&vg.name, &vg.lv(lv)?.name));
        for id in activation_closure(vg, lv) {
            self.suspended.remove(&dm_name(&vg.name, &vg.lv(id)?.name));
        }
        Ok(())
    }

    fn activate(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        let device = dm_name(&vg.name, &vg.lv(lv)?.name);
        info!("[simulate] activate {}", device);
        self.suspended.remove(&device);
        Ok(())
    }

    fn deactivate(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        let device = dm_name(&vg.name, &vg.lv(lv)?.name);
        if self.suspended.contains(&device) {
            return Err(LvCacheError::Device {
                op: "deactivate".to_string(),
                device,
                reason: "device is suspended".to_string(),
            });
        }
        info!("[simulate] deactivate {}", device);
        Ok(())
    }

    fn cache_policy(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<CachePolicy> {
        match vg.first_segment(lv) {
            Some(seg) if seg.segtype == SegType::Cache => Ok(seg
                .policy
                .clone()
                .unwrap_or_else(|| CachePolicy::new(CachePolicy::DEFAULT))),
            _ => Err(LvCacheError::NotCache {
                name: vg.lv_name(lv),
            }),
        }
    }

    fn cache_block_info(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<CacheBlockInfo> {
        if !vg.is_cache(lv) {
            return Err(LvCacheError::NotCache {
                name: vg.lv_name(lv),
            });
        }
        Ok(CacheBlockInfo::default())
    }

    fn backend_name(&self) -> &'static str {
        "simulate"
    }
}
