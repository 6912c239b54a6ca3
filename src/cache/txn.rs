//! Metadata + kernel transaction
//!
//! A change that must reach both the on-disk metadata and the live kernel
//! tables goes through five phases, all addressed to one root LV:
//!
//! 1. persist: stage the new metadata
//! 2. preload: load the new tables next to the live ones
//! 3. suspend: quiesce the root on its current table
//! 4. commit: make the staged metadata durable
//! 5. resume: switch to the new tables and resume the root
//!
//! Suspending or resuming the root acts on everything stacked under it.
//! That set, the activation closure, is computed from the graph rather
//! than assumed, so LVs that drop out of the root's tree are reported
//! back to the caller instead of being left suspended by accident.
//!
//! A failed phase aborts; completed phases are not undone.

use crate::context::CommandContext;
use crate::error::{LvCacheError, LvCacheResult};
use crate::metadata::model::{LvId, VolumeGroup};
use crate::metadata::store::{commit_vg, write_vg};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info};

/// Phase of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxPhase {
    Persist,
    Preload,
    Suspend,
    Commit,
    Resume,
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persist => write!(f, "persist"),
            Self::Preload => write!(f, "preload"),
            Self::Suspend => write!(f, "suspend"),
            Self::Commit => write!(f, "commit"),
            Self::Resume => write!(f, "resume"),
        }
    }
}

/// What a completed transaction touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub root: LvId,
    /// Closure of the root in the live graph (suspended)
    pub suspended: Vec<LvId>,
    /// Closure of the root in the new graph (resumed)
    pub resumed: Vec<LvId>,
    /// Suspended LVs the root resume no longer reaches
    pub detached: Vec<LvId>,
}

/// LVs suspended or resumed along with `root`: the root first, then every
/// LV reachable through segment areas and pool references, depth first.
pub fn activation_closure(vg: &VolumeGroup, root: LvId) -> Vec<LvId> {
    let mut seen = BTreeSet::new();
    let mut order = Vec::new();
    let mut stack = vec![root];

    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let Ok(lv) = vg.lv(id) else { continue };
        order.push(id);

        let mut children: Vec<LvId> = lv
            .segments
            .iter()
            .filter_map(|seg| vg.seg(*seg).ok())
            .flat_map(|seg| seg.referenced_lvs())
            .collect();
        children.reverse();
        stack.extend(children);
    }

    order
}

fn names(vg: &VolumeGroup, ids: &[LvId]) -> Vec<String> {
    ids.iter().map(|id| vg.lv_name(*id)).collect()
}

/// Persist `vg`, then swap the kernel tables under `root`.
///
/// `live` is the graph the kernel is currently running; it decides what
/// the suspend reaches. `vg` is the new graph.
pub fn update_and_reload(
    ctx: &mut CommandContext,
    vg: &mut VolumeGroup,
    live: &VolumeGroup,
    root: LvId,
) -> LvCacheResult<TxOutcome> {
    let root_name = vg.lv(root)?.name.clone();
    let failed = |phase: TxPhase| {
        let lv = root_name.clone();
        move |source: LvCacheError| LvCacheError::Transaction {
            phase,
            lv,
            source: Box::new(source),
        }
    };

    let suspended = activation_closure(live, root);
    debug!(
        "Activation closure of {}: {:?}",
        root_name,
        names(live, &suspended)
    );

    write_vg(ctx.store(), vg).map_err(failed(TxPhase::Persist))?;
    ctx.devices()
        .preload(vg, root)
        .map_err(failed(TxPhase::Preload))?;
    ctx.devices()
        .suspend(live, root)
        .map_err(failed(TxPhase::Suspend))?;
    commit_vg(ctx.store(), vg).map_err(failed(TxPhase::Commit))?;

    let resumed = activation_closure(vg, root);
    ctx.devices()
        .resume(vg, root)
        .map_err(failed(TxPhase::Resume))?;

    let detached: Vec<LvId> = suspended
        .iter()
        .copied()
        .filter(|id| !resumed.contains(id))
        .collect();
    if detached.is_empty() {
        info!("Reloaded {} (seqno {})", root_name, vg.seqno);
    } else {
        info!(
            "Reloaded {} (seqno {}); no longer under it: {:?}",
            root_name,
            vg.seqno,
            names(live, &detached)
        );
    }

    Ok(TxOutcome {
        root,
        suspended,
        resumed,
        detached,
    })
}
