//! Show command - list the logical volumes of a volume group

use super::metadata_files;
use crate::cli::args::{OutputFormat, ShowArgs};
use crate::config::Config;
use crate::error::LvCacheResult;
use crate::metadata::model::{Area, LogicalVolume, VolumeGroup};
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;

/// One LV as reported by `show`
#[derive(Debug, Serialize)]
struct LvRow {
    name: String,
    #[serde(rename = "type")]
    lv_type: String,
    hidden: bool,
    extents: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy: Option<String>,
    devices: Vec<String>,
}

/// Execute the show command
pub async fn execute(args: ShowArgs, config: &Config) -> LvCacheResult<()> {
    let vg = metadata_files(config).load(&args.vg)?;
    let rows = rows(&vg, args.all);

    match args.format {
        OutputFormat::Table => print_table(&vg, &rows),
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Plain => print_plain(&rows),
    }
    Ok(())
}

fn rows(vg: &VolumeGroup, all: bool) -> Vec<LvRow> {
    vg.lvs()
        .filter(|lv| all || lv.is_visible())
        .map(|lv| row(vg, lv))
        .collect()
}

fn row(vg: &VolumeGroup, lv: &LogicalVolume) -> LvRow {
    let first = vg.first_segment(lv.id);
    let lv_type = first
        .map(|seg| seg.segtype.to_string())
        .unwrap_or_else(|| "empty".to_string());

    let origin = if vg.is_cache(lv.id) {
        first.and_then(|seg| seg.area_lv(0)).map(|id| vg.lv_name(id))
    } else {
        None
    };

    let devices = lv
        .segments
        .iter()
        .filter_map(|id| vg.seg(*id).ok())
        .flat_map(|seg| seg.areas.iter())
        .map(|area| match area {
            Area::Pv { pv, pe } => format!("{}({})", pv, pe),
            Area::Lv { lv, le } => format!("{}({})", vg.lv_name(*lv), le),
        })
        .collect();

    LvRow {
        name: lv.name.clone(),
        lv_type,
        hidden: !lv.is_visible(),
        extents: lv.le_count,
        pool: first.and_then(|seg| seg.pool).map(|id| vg.lv_name(id)),
        origin,
        policy: first.and_then(|seg| seg.policy.as_ref()).map(ToString::to_string),
        devices,
    }
}

/// Hidden LVs are bracketed, as `lvs -a` does
fn display_name(row: &LvRow) -> String {
    if row.hidden {
        format!("[{}]", row.name)
    } else {
        row.name.clone()
    }
}

fn print_table(vg: &VolumeGroup, rows: &[LvRow]) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, &format!("Volume group {} (seqno {})", vg.name, vg.seqno));

    if rows.is_empty() {
        ui::step_info(&ctx, "No logical volumes");
        return;
    }

    println!(
        "{:<20} {:<12} {:>8} {:<12} {:<20} {:<10} {}",
        style("LV").bold(),
        style("TYPE").bold(),
        style("EXTENTS").bold(),
        style("POOL").bold(),
        style("ORIGIN").bold(),
        style("POLICY").bold(),
        style("DEVICES").bold()
    );
    println!("{}", "-".repeat(96));

    for row in rows {
        let name = display_name(row);
        let name = if row.hidden {
            style(name).dim()
        } else {
            style(name)
        };
        println!(
            "{:<20} {:<12} {:>8} {:<12} {:<20} {:<10} {}",
            name,
            row.lv_type,
            row.extents,
            row.pool.as_deref().unwrap_or(""),
            row.origin.as_deref().unwrap_or(""),
            row.policy.as_deref().unwrap_or(""),
            row.devices.join(",")
        );
    }

    println!();
    println!("{} logical volume(s)", rows.len());
}

fn print_json(rows: &[LvRow]) -> LvCacheResult<()> {
    let json = serde_json::to_string_pretty(rows)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(rows: &[LvRow]) {
    for row in rows {
        println!("{}", display_name(row));
    }
}
