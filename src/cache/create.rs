//! Cache attach

use crate::context::CommandContext;
use crate::error::{LvCacheError, LvCacheResult};
use crate::metadata::layer::{insert_layer, CACHE_ORIGIN_SUFFIX};
use crate::metadata::model::{LvId, StatusFlag, VolumeGroup};
use crate::metadata::pool::attach_pool;
use tracing::info;

/// Turn `origin` into a cache LV backed by `pool`.
///
/// The origin's data moves to a hidden `<origin>_corig` LV and the
/// original handle becomes the cache LV, which is returned. Changes stay
/// in memory: the caller writes and activates them, usually together
/// with its own metadata changes.
///
/// Every precondition is checked before the first edit, so a failure
/// leaves `vg` untouched.
pub fn create_cache(
    ctx: &CommandContext,
    vg: &mut VolumeGroup,
    pool: LvId,
    origin: LvId,
) -> LvCacheResult<LvId> {
    let pool_lv = vg.lv(pool)?;
    let origin_lv = vg.lv(origin)?;

    if !vg.is_cache_pool(pool) {
        return Err(LvCacheError::NotCachePool {
            name: pool_lv.name.clone(),
        });
    }
    // No cache over a cache LV, its hidden origin or any pool part.
    if vg.is_cache_type(origin) {
        return Err(LvCacheError::OriginIsCache {
            name: origin_lv.name.clone(),
        });
    }
    if let Some(user) = pool_lv.users.iter().next() {
        let user_lv = vg.seg(*user)?.lv;
        return Err(LvCacheError::PoolInUse {
            pool: pool_lv.name.clone(),
            user: vg.lv_name(user_lv),
        });
    }

    let cache_type = *ctx.segtypes().resolve("cache")?;

    let cache_lv = origin;
    let corig = insert_layer(vg, cache_lv, StatusFlag::Cache, CACHE_ORIGIN_SUFFIX)?;

    let seg = vg
        .first_seg(cache_lv)
        .ok_or_else(|| LvCacheError::internal(format!("{} lost its layer segment", vg.lv_name(cache_lv))))?;
    vg.seg_mut(seg)?.segtype = cache_type.kind;

    attach_pool(vg, seg, pool)?;

    info!(
        "Cache pool {} attached to {} (origin {})",
        vg.lv_name(pool),
        vg.lv_name(cache_lv),
        vg.lv_name(corig)
    );
    Ok(cache_lv)
}
