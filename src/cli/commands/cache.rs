//! Cache command - attach and detach cache pools

use super::{blocking, metadata_files};
use crate::cache::{create_cache, remove_cache, update_and_reload};
use crate::cli::args::{CacheAction, CacheArgs};
use crate::config::Config;
use crate::context::CommandContext;
use crate::error::LvCacheResult;
use crate::journal::Journal;
use crate::metadata::store::{commit_vg, write_vg};
use crate::ui::{self, FlushProgressBar, UiContext};

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> LvCacheResult<()> {
    match args.action {
        CacheAction::Create { vg, pool, origin } => create(config, &vg, &pool, &origin).await,
        CacheAction::Remove { vg, lv, yes } => remove(config, &vg, &lv, yes).await,
    }
}

async fn create(config: &Config, vg_name: &str, pool: &str, origin: &str) -> LvCacheResult<()> {
    let ctx = UiContext::detect();
    let mut vg = metadata_files(config).load(vg_name)?;
    let pool_id = vg.lv_by_name(pool)?;
    let origin_id = vg.lv_by_name(origin)?;
    let mut cmd = CommandContext::from_config(config);

    let (vg, corig, tx) = blocking(move || {
        let live = vg.clone();
        let cache_lv = create_cache(&cmd, &mut vg, pool_id, origin_id)?;
        let tx = update_and_reload(&mut cmd, &mut vg, &live, cache_lv)?;
        let corig = vg
            .first_segment(cache_lv)
            .and_then(|seg| seg.area_lv(0))
            .map(|id| vg.lv_name(id))
            .unwrap_or_default();
        Ok((vg, corig, tx))
    })
    .await?;

    Journal::new(config)
        .log(
            "cache.created",
            &serde_json::json!({
                "vg": vg.name,
                "lv": origin,
                "pool": pool,
                "origin": corig,
                "seqno": vg.seqno,
                "reloaded": tx.resumed.len(),
            }),
        )
        .await;

    ui::step_ok_detail(
        &ctx,
        &format!("Cache pool {} attached to {}/{}", pool, vg.name, origin),
        &format!("data moved to {}", corig),
    );
    Ok(())
}

async fn remove(config: &Config, vg_name: &str, lv: &str, yes: bool) -> LvCacheResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let mut vg = metadata_files(config).load(vg_name)?;
    let cache_lv = vg.lv_by_name(lv)?;

    let prompt = format!("Flush and detach the cache from {}/{}?", vg_name, lv);
    if !ui::confirm(&ctx, &prompt, true).await? {
        ui::step_info(&ctx, "Cancelled");
        return Ok(());
    }

    ui::intro(&ctx, &format!("Removing cache from {}/{}", vg_name, lv));
    let progress = FlushProgressBar::new(&ctx, &format!("{}/{}", vg_name, lv));
    let mut cmd = CommandContext::from_config(config).with_flush_progress(progress.hook());

    let result = blocking(move || {
        let summary = remove_cache(&mut cmd, &mut vg, cache_lv)?;
        write_vg(cmd.store(), &mut vg)?;
        commit_vg(cmd.store(), &vg)?;
        Ok((vg, summary))
    })
    .await;
    progress.finish();

    let journal = Journal::new(config);
    let (vg, summary) = match result {
        Ok(done) => done,
        Err(e) => {
            if let Some(failure) = e.failed_step() {
                journal
                    .log(
                        "cache.remove_failed",
                        &serde_json::json!({
                            "vg": vg_name,
                            "lv": lv,
                            "step": failure.step,
                            "error": failure.source.to_string(),
                            "seqno": failure.snapshot.seqno,
                        }),
                    )
                    .await;
                ui::step_error_detail(&ctx, "Removal stopped", &failure.step.to_string());
            }
            return Err(e);
        }
    };

    let pool = vg.lv_name(summary.pool);
    journal
        .log(
            "cache.removed",
            &serde_json::json!({
                "vg": vg.name,
                "lv": lv,
                "pool": pool,
                "removed_origin": summary.removed_origin,
                "policy_swapped": summary.policy_swapped,
                "flush_polls": summary.flush.polls,
                "flush_secs": summary.flush.elapsed.as_secs(),
                "seqno": vg.seqno,
            }),
        )
        .await;

    if summary.policy_swapped {
        ui::step_ok(&ctx, "Switched to the cleaner policy");
    }
    ui::step_ok_detail(
        &ctx,
        "Cache flushed",
        &format!("{} poll(s)", summary.flush.polls),
    );
    ui::step_ok_detail(
        &ctx,
        &format!("Removed {}", summary.removed_origin),
        &format!("pool {} is unused", pool),
    );
    ui::outro_success(&ctx, &format!("{}/{} is no longer cached", vg.name, lv));
    Ok(())
}
