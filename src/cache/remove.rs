//! Cache detach
//!
//! Removing a cache is a fixed sequence of steps, some of which reach the
//! kernel:
//!
//! | Step | Effect |
//! |------|--------|
//! | policy-query | read the policy the kernel target runs |
//! | policy-swap | switch to `cleaner` and reload, unless already there |
//! | flush-wait | poll until no dirty blocks remain |
//! | detach-pool | unlink the pool from the cache segment |
//! | move-segments | hand the origin's data back to the cache LV |
//! | error-segment | give the emptied origin shell an error mapping |
//! | transaction | persist, suspend, commit, resume the cache LV |
//! | pool-resume | resume the pool the cache LV no longer reaches |
//! | origin-activate / origin-deactivate | tear down the shell's device |
//! | remove-shell | drop the shell from the volume group |
//!
//! There is no rollback. A failure reports the step that failed together
//! with the graph as it stood, and leaves both the metadata and the
//! kernel wherever the sequence stopped.

use crate::cache::flush::{wait_for_flush, FlushOutcome};
use crate::cache::txn::{activation_closure, update_and_reload, TxOutcome};
use crate::context::CommandContext;
use crate::error::{LvCacheError, LvCacheResult};
use crate::metadata::layer::{add_virtual_segment, move_segments, remove_segment_user};
use crate::metadata::model::{CachePolicy, LvId, StatusFlag, VolumeGroup};
use crate::metadata::pool::detach_pool;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

/// One step of cache removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoveStep {
    PolicyQuery,
    PolicySwap,
    FlushWait,
    DetachPool,
    MoveSegments,
    ErrorSegment,
    Transaction,
    PoolResume,
    OriginActivate,
    OriginDeactivate,
    RemoveShell,
}

impl fmt::Display for RemoveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PolicyQuery => "policy-query",
            Self::PolicySwap => "policy-swap",
            Self::FlushWait => "flush-wait",
            Self::DetachPool => "detach-pool",
            Self::MoveSegments => "move-segments",
            Self::ErrorSegment => "error-segment",
            Self::Transaction => "transaction",
            Self::PoolResume => "pool-resume",
            Self::OriginActivate => "origin-activate",
            Self::OriginDeactivate => "origin-deactivate",
            Self::RemoveShell => "remove-shell",
        };
        f.write_str(name)
    }
}

/// A removal that stopped part way
#[derive(Error, Debug)]
#[error("Cache removal of {lv} stopped at {step}: {source}")]
pub struct StepFailure {
    pub step: RemoveStep,
    pub lv: String,
    #[source]
    pub source: LvCacheError,
    /// The volume group as it stood when the step failed
    pub snapshot: VolumeGroup,
}

/// What a completed removal did
#[derive(Debug, Clone)]
pub struct RemovalSummary {
    /// The former cache LV, now plain again
    pub lv: LvId,
    /// Whether the policy had to be switched to cleaner
    pub policy_swapped: bool,
    pub flush: FlushOutcome,
    /// The detached pool, left in place for reuse
    pub pool: LvId,
    /// Name of the origin shell that was removed
    pub removed_origin: String,
    pub tx: TxOutcome,
}

/// Detach the pool from `cache_lv` and return the LV to plain storage.
///
/// Dirty blocks are flushed first; the wait blocks the calling thread.
/// The pool survives as an unused cache pool. Metadata for the final
/// state is written by the caller, as with cache creation.
pub fn remove_cache(
    ctx: &mut CommandContext,
    vg: &mut VolumeGroup,
    cache_lv: LvId,
) -> LvCacheResult<RemovalSummary> {
    let name = vg.lv(cache_lv)?.name.clone();
    if !vg.is_cache(cache_lv) {
        return Err(LvCacheError::NotCache { name });
    }

    match run_removal(ctx, vg, cache_lv) {
        Ok(summary) => Ok(summary),
        Err((step, source)) => {
            error!("Removing cache from {} failed at {}: {}", name, step, source);
            Err(LvCacheError::StepFailed(Box::new(StepFailure {
                step,
                lv: name,
                source,
                snapshot: vg.clone(),
            })))
        }
    }
}

fn run_removal(
    ctx: &mut CommandContext,
    vg: &mut VolumeGroup,
    cache_lv: LvId,
) -> Result<RemovalSummary, (RemoveStep, LvCacheError)> {
    let at = |step: RemoveStep| move |e: LvCacheError| (step, e);
    let name = vg.lv_name(cache_lv);

    // Switch to the cleaner policy so the kernel writes back every dirty block.
    let policy = ctx
        .devices()
        .cache_policy(vg, cache_lv)
        .map_err(at(RemoveStep::PolicyQuery))?;
    let policy_swapped = !policy.is_cleaner();
    if policy_swapped {
        info!("Switching {} from {} to the cleaner policy", name, policy);
        let live = vg.clone();
        let seg = vg
            .first_seg(cache_lv)
            .ok_or_else(|| LvCacheError::internal(format!("{} has no segments", name)))
            .map_err(at(RemoveStep::PolicySwap))?;
        vg.seg_mut(seg).map_err(at(RemoveStep::PolicySwap))?.policy = Some(CachePolicy::cleaner());
        update_and_reload(ctx, vg, &live, cache_lv).map_err(at(RemoveStep::PolicySwap))?;
    }

    let flush_policy = ctx.flush_policy().clone();
    let hook = ctx.flush_progress();
    let flush = {
        let devices = ctx.devices();
        let graph: &VolumeGroup = vg;
        wait_for_flush(
            &flush_policy,
            &name,
            || devices.cache_block_info(graph, cache_lv).map(|info| info.dirty),
            hook.as_ref(),
        )
        .map_err(at(RemoveStep::FlushWait))?
    };

    // The kernel still runs the graph as it is before the detach.
    let live = vg.clone();
    let seg = vg
        .first_seg(cache_lv)
        .ok_or_else(|| LvCacheError::internal(format!("{} has no segments", name)))
        .map_err(at(RemoveStep::DetachPool))?;
    let pool = detach_pool(vg, seg).map_err(at(RemoveStep::DetachPool))?;

    let origin = vg
        .seg(seg)
        .ok()
        .and_then(|s| s.area_lv(0))
        .ok_or_else(|| LvCacheError::internal(format!("{} does not map an origin LV", name)))
        .map_err(at(RemoveStep::MoveSegments))?;
    let origin_name = vg.lv_name(origin);
    {
        let step = at(RemoveStep::MoveSegments);
        vg.lv_mut(origin).map_err(step)?.set_visible();
        remove_segment_user(vg, origin, seg).map_err(step)?;
        move_segments(vg, origin, cache_lv).map_err(step)?;
        vg.lv_mut(cache_lv).map_err(step)?.status.remove(&StatusFlag::Cache);
    }

    let error_type = *ctx
        .segtypes()
        .resolve("error")
        .map_err(at(RemoveStep::ErrorSegment))?;
    let extents = vg.lv(cache_lv).map_err(at(RemoveStep::ErrorSegment))?.le_count;
    add_virtual_segment(vg, origin, &error_type, extents).map_err(at(RemoveStep::ErrorSegment))?;

    let tx = update_and_reload(ctx, vg, &live, cache_lv).map_err(at(RemoveStep::Transaction))?;

    // The cache LV's resume no longer reaches the pool, so it needs its own.
    ctx.devices()
        .resume(vg, pool)
        .map_err(at(RemoveStep::PoolResume))?;
    let mut reached = activation_closure(vg, pool);
    reached.push(origin);
    let stranded: Vec<String> = tx
        .detached
        .iter()
        .filter(|id| !reached.contains(id))
        .map(|id| live.lv_name(*id))
        .collect();
    if !stranded.is_empty() {
        warn!("Left suspended after removing the cache from {}: {:?}", name, stranded);
        return Err((
            RemoveStep::PoolResume,
            LvCacheError::internal(format!("LVs left suspended: {}", stranded.join(", "))),
        ));
    }

    // Bring the shell up on its error table, then take it down for good.
    ctx.devices()
        .activate(vg, origin)
        .map_err(at(RemoveStep::OriginActivate))?;
    ctx.devices()
        .deactivate(vg, origin)
        .map_err(at(RemoveStep::OriginDeactivate))?;
    vg.remove_lv(origin).map_err(at(RemoveStep::RemoveShell))?;

    info!(
        "Removed cache from {}; pool {} is free",
        name,
        vg.lv_name(pool)
    );
    Ok(RemovalSummary {
        lv: cache_lv,
        policy_swapped,
        flush,
        pool,
        removed_origin: origin_name,
        tx,
    })
}
