//! Layer insertion and removal
//!
//! Inserting a layer interposes a hidden LV between an LV and its data:
//! the new LV takes over every segment of the original, which is left
//! with a single segment mapping the layer. Segment ownership moves by
//! reassigning ids; nothing is copied.

use crate::error::{LvCacheError, LvCacheResult};
use crate::metadata::model::{Area, LvId, SegId, SegType, Segment, StatusFlag, VolumeGroup};
use crate::metadata::segtype::SegmentType;
use tracing::debug;

/// Suffix of the hidden origin LV under a cache LV
pub const CACHE_ORIGIN_SUFFIX: &str = "_corig";

/// Wrap `lv` with a hidden `<name><suffix>` layer and flag it with `status`.
///
/// Returns the layer LV. On error nothing has been modified.
pub fn insert_layer(
    vg: &mut VolumeGroup,
    lv: LvId,
    status: StatusFlag,
    suffix: &str,
) -> LvCacheResult<LvId> {
    let top = vg.lv(lv)?;
    let layer_name = format!("{}{}", top.name, suffix);
    let le_count = top.le_count;

    if vg.is_cache_type(lv) {
        return Err(LvCacheError::internal(format!(
            "cannot insert a layer over cache-type LV {}",
            top.name
        )));
    }
    if le_count == 0 {
        return Err(LvCacheError::internal(format!(
            "cannot insert a layer over empty LV {}",
            top.name
        )));
    }
    // A second cache layer would need to rename the existing one first.
    if vg.find_lv(&layer_name).is_some() {
        return Err(LvCacheError::LayerNameCollision { name: layer_name });
    }

    let layer = vg.add_lv(&layer_name, [])?;
    let moved = std::mem::take(&mut vg.lv_mut(lv)?.segments);
    for seg in &moved {
        vg.seg_mut(*seg)?.lv = layer;
    }

    let layer_lv = vg.lv_mut(layer)?;
    layer_lv.segments = moved;
    layer_lv.le_count = le_count;

    let top = vg.lv_mut(lv)?;
    top.le_count = 0;
    top.status.insert(status);

    let mapping = Segment::new(SegType::Linear, le_count).with_area(Area::Lv { lv: layer, le: 0 });
    vg.append_segment(lv, mapping)?;

    debug!(
        "Inserted layer {} under {} ({} extents)",
        layer_name,
        vg.lv_name(lv),
        le_count
    );
    Ok(layer)
}

/// Forget that `seg` maps `used`
pub fn remove_segment_user(vg: &mut VolumeGroup, used: LvId, seg: SegId) -> LvCacheResult<()> {
    let owner = vg.seg(seg)?.lv;
    let owner_name = vg.lv_name(owner);
    let used_lv = vg.lv_mut(used)?;
    if !used_lv.users.remove(&seg) {
        return Err(LvCacheError::internal(format!(
            "segment {} of {} is not a user of {}",
            seg, owner_name, used_lv.name
        )));
    }
    Ok(())
}

/// Give `to` the segments and extent count of `from`.
///
/// The segments `to` owned before are freed; each must already be
/// detached from its pool and unregistered from the LVs it mapped.
pub fn move_segments(vg: &mut VolumeGroup, from: LvId, to: LvId) -> LvCacheResult<()> {
    if from == to {
        return Err(LvCacheError::internal(format!(
            "cannot move segments of {} onto itself",
            vg.lv_name(from)
        )));
    }
    vg.lv(from)?;

    let discarded = vg.lv(to)?.segments.clone();
    for id in &discarded {
        let seg = vg.seg(*id)?;
        if seg.pool.is_some() {
            return Err(LvCacheError::internal(format!(
                "{} of {} is still attached to a pool",
                id,
                vg.lv_name(to)
            )));
        }
        for target in seg.referenced_lvs() {
            if vg.lv(target)?.users.contains(id) {
                return Err(LvCacheError::internal(format!(
                    "{} of {} still maps {}",
                    id,
                    vg.lv_name(to),
                    vg.lv_name(target)
                )));
            }
        }
    }
    for id in discarded {
        vg.release_segment(id)?;
    }

    let source = vg.lv_mut(from)?;
    let moved = std::mem::take(&mut source.segments);
    let le_count = std::mem::take(&mut source.le_count);
    for seg in &moved {
        vg.seg_mut(*seg)?.lv = to;
    }

    let target = vg.lv_mut(to)?;
    target.segments = moved;
    target.le_count = le_count;

    debug!(
        "Moved {} extents from {} to {}",
        le_count,
        vg.lv_name(from),
        vg.lv_name(to)
    );
    Ok(())
}

/// Append a segment with no backing storage (error or zero target)
pub fn add_virtual_segment(
    vg: &mut VolumeGroup,
    lv: LvId,
    segtype: &SegmentType,
    len: u32,
) -> LvCacheResult<SegId> {
    if !segtype.is_virtual() {
        return Err(LvCacheError::internal(format!(
            "{} is not a virtual segment type",
            segtype.name()
        )));
    }
    vg.append_segment(lv, Segment::new(segtype.kind, len))
}
