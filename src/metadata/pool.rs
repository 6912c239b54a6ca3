//! Cache pool construction and linkage
//!
//! A cache pool is an LV with a single `cache-pool` segment whose areas
//! map two hidden sub-LVs: `<pool>_cdata` holding cached blocks and
//! `<pool>_cmeta` holding the dm-cache metadata. A pool serves at most
//! one cache segment at a time.

use crate::error::{LvCacheError, LvCacheResult};
use crate::metadata::model::{Area, CachePolicy, LvId, SegId, SegType, Segment, StatusFlag, VolumeGroup};
use tracing::debug;

pub const POOL_DATA_SUFFIX: &str = "_cdata";
pub const POOL_METADATA_SUFFIX: &str = "_cmeta";

/// Build a cache pool from fresh extents on `pv`
pub fn create_cache_pool(
    vg: &mut VolumeGroup,
    name: &str,
    data_extents: u32,
    metadata_extents: u32,
    pv: &str,
    policy: CachePolicy,
) -> LvCacheResult<LvId> {
    if data_extents == 0 || metadata_extents == 0 {
        return Err(LvCacheError::User(format!(
            "cache pool {} needs data and metadata extents",
            name
        )));
    }
    for suffix in ["", POOL_DATA_SUFFIX, POOL_METADATA_SUFFIX] {
        let candidate = format!("{}{}", name, suffix);
        if vg.find_lv(&candidate).is_some() {
            return Err(LvCacheError::LvExists {
                vg: vg.name.clone(),
                name: candidate,
            });
        }
    }

    let data = vg.create_linear_lv(&format!("{}{}", name, POOL_DATA_SUFFIX), data_extents, pv)?;
    let meta = vg.create_linear_lv(&format!("{}{}", name, POOL_METADATA_SUFFIX), metadata_extents, pv)?;
    for (lv, flag) in [(data, StatusFlag::CachePoolData), (meta, StatusFlag::CachePoolMetadata)] {
        let sub = vg.lv_mut(lv)?;
        sub.set_hidden();
        sub.status.insert(flag);
    }

    let pool = vg.add_lv(name, [StatusFlag::Visible, StatusFlag::CachePool])?;
    let mut segment = Segment::new(SegType::CachePool, data_extents)
        .with_area(Area::Lv { lv: data, le: 0 })
        .with_area(Area::Lv { lv: meta, le: 0 });
    segment.policy = Some(policy);
    vg.append_segment(pool, segment)?;

    debug!("Created cache pool {} ({} data extents)", name, data_extents);
    Ok(pool)
}

/// Link `seg` to the cache pool `pool`.
///
/// A segment without a policy inherits the pool's default.
pub fn attach_pool(vg: &mut VolumeGroup, seg: SegId, pool: LvId) -> LvCacheResult<()> {
    let segment = vg.seg(seg)?;
    let owner = segment.lv;
    if let Some(existing) = segment.pool {
        return Err(LvCacheError::internal(format!(
            "{} already uses pool {}",
            vg.lv_name(owner),
            vg.lv_name(existing)
        )));
    }
    if !vg.is_cache_pool(pool) {
        return Err(LvCacheError::NotCachePool {
            name: vg.lv_name(pool),
        });
    }
    let pool_lv = vg.lv(pool)?;
    if let Some(user) = pool_lv.users.iter().next() {
        let user_lv = vg.seg(*user)?.lv;
        return Err(LvCacheError::PoolInUse {
            pool: pool_lv.name.clone(),
            user: vg.lv_name(user_lv),
        });
    }

    let default_policy = vg.first_segment(pool).and_then(|s| s.policy.clone());
    let segment = vg.seg_mut(seg)?;
    segment.pool = Some(pool);
    if segment.policy.is_none() {
        segment.policy = default_policy;
    }
    vg.lv_mut(pool)?.users.insert(seg);

    debug!("Attached pool {} to {}", vg.lv_name(pool), vg.lv_name(owner));
    Ok(())
}

/// Unlink `seg` from its pool and return the pool
pub fn detach_pool(vg: &mut VolumeGroup, seg: SegId) -> LvCacheResult<LvId> {
    let owner = vg.seg(seg)?.lv;
    let pool = vg.seg(seg)?.pool.ok_or_else(|| {
        LvCacheError::internal(format!("{} has no pool attached", vg.lv_name(owner)))
    })?;

    if !vg.lv_mut(pool)?.users.remove(&seg) {
        return Err(LvCacheError::internal(format!(
            "{} is not registered as a user of pool {}",
            vg.lv_name(owner),
            vg.lv_name(pool)
        )));
    }
    vg.seg_mut(seg)?.pool = None;

    debug!("Detached pool {} from {}", vg.lv_name(pool), vg.lv_name(owner));
    Ok(pool)
}
