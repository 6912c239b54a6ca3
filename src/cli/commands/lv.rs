//! Lv command - create and remove logical volumes

use super::{blocking, metadata_files};
use crate::cli::args::{LvAction, LvArgs, LvType};
use crate::config::Config;
use crate::error::{LvCacheError, LvCacheResult};
use crate::journal::Journal;
use crate::metadata::model::{CachePolicy, VolumeGroup};
use crate::metadata::pool::{create_cache_pool, POOL_DATA_SUFFIX, POOL_METADATA_SUFFIX};
use crate::metadata::store::{commit_vg, write_vg};
use crate::ui::{self, UiContext};

/// Execute the lv command
pub async fn execute(args: LvArgs, config: &Config) -> LvCacheResult<()> {
    let ctx = UiContext::detect();
    let mut store = metadata_files(config);

    match args.action {
        LvAction::Create {
            vg,
            name,
            extents,
            pv,
            lv_type,
            metadata_extents,
            policy,
        } => {
            let mut group = store.load(&vg)?;
            let lv_name = name.clone();
            let group = blocking(move || {
                match lv_type {
                    LvType::Linear => {
                        group.create_linear_lv(&name, extents, &pv)?;
                    }
                    LvType::CachePool => {
                        create_cache_pool(
                            &mut group,
                            &name,
                            extents,
                            metadata_extents,
                            &pv,
                            CachePolicy::new(policy),
                        )?;
                    }
                }
                write_vg(&mut store, &mut group)?;
                commit_vg(&mut store, &group)?;
                Ok(group)
            })
            .await?;

            let kind = match lv_type {
                LvType::Linear => "linear",
                LvType::CachePool => "cache-pool",
            };
            Journal::new(config)
                .log(
                    "lv.created",
                    &serde_json::json!({"vg": group.name, "lv": lv_name, "type": kind, "extents": extents}),
                )
                .await;
            ui::step_ok_detail(
                &ctx,
                &format!("Logical volume {}/{} created", group.name, lv_name),
                &format!("{}, {} extents", kind, extents),
            );
        }
        LvAction::Remove { vg, name } => {
            let mut group = store.load(&vg)?;
            let lv_name = name.clone();
            let group = blocking(move || {
                remove_lv(&mut group, &name)?;
                write_vg(&mut store, &mut group)?;
                commit_vg(&mut store, &group)?;
                Ok(group)
            })
            .await?;

            Journal::new(config)
                .log(
                    "lv.removed",
                    &serde_json::json!({"vg": group.name, "lv": lv_name}),
                )
                .await;
            ui::step_ok(&ctx, &format!("Logical volume {}/{} removed", group.name, lv_name));
        }
    }

    Ok(())
}

/// Remove a visible LV; a cache pool takes its hidden sub-LVs with it
fn remove_lv(vg: &mut VolumeGroup, name: &str) -> LvCacheResult<()> {
    let id = vg.lv_by_name(name)?;
    let lv = vg.lv(id)?;
    if !lv.is_visible() {
        return Err(LvCacheError::User(format!(
            "{} is an internal LV and cannot be removed directly",
            name
        )));
    }
    if vg.is_cache(id) {
        return Err(LvCacheError::User(format!(
            "{} is cached; run: lvcache cache remove {} {}",
            name, vg.name, name
        )));
    }

    let is_pool = vg.is_cache_pool(id);
    vg.remove_lv(id)?;
    if is_pool {
        for suffix in [POOL_DATA_SUFFIX, POOL_METADATA_SUFFIX] {
            let sub = vg.lv_by_name(&format!("{}{}", name, suffix))?;
            vg.remove_lv(sub)?;
        }
    }
    Ok(())
}
