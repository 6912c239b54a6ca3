//! Vg command - create and list volume groups

use super::{blocking, metadata_files};
use crate::cli::args::{VgAction, VgArgs};
use crate::config::Config;
use crate::error::{LvCacheError, LvCacheResult};
use crate::journal::Journal;
use crate::metadata::model::VolumeGroup;
use crate::metadata::store::{commit_vg, write_vg};
use crate::ui::{self, UiContext};

/// Execute the vg command
pub async fn execute(args: VgArgs, config: &Config) -> LvCacheResult<()> {
    match args.action {
        VgAction::Create { name, extent_size } => create(config, name, extent_size).await,
        VgAction::List => list(config),
    }
}

async fn create(config: &Config, name: String, extent_size: u64) -> LvCacheResult<()> {
    let ctx = UiContext::detect();
    let mut store = metadata_files(config);
    if store.exists(&name) {
        return Err(LvCacheError::VgExists(name));
    }

    let vg = blocking(move || {
        let mut vg = VolumeGroup::new(name, extent_size)?;
        write_vg(&mut store, &mut vg)?;
        commit_vg(&mut store, &vg)?;
        Ok(vg)
    })
    .await?;

    Journal::new(config)
        .log(
            "vg.created",
            &serde_json::json!({"vg": vg.name, "uuid": vg.uuid, "extent_size": vg.extent_size}),
        )
        .await;

    ui::step_ok_detail(
        &ctx,
        &format!("Volume group {} created", vg.name),
        &format!("extent size {} sectors", vg.extent_size),
    );
    Ok(())
}

fn list(config: &Config) -> LvCacheResult<()> {
    let names = metadata_files(config).list()?;
    if names.is_empty() {
        let ctx = UiContext::detect();
        ui::step_info(&ctx, "No volume groups");
        return Ok(());
    }

    for name in names {
        println!("{}", name);
    }
    Ok(())
}
