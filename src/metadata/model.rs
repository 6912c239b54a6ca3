//! Volume group graph
//!
//! Logical volumes and segments live in two arenas owned by the
//! [`VolumeGroup`] and are addressed by stable ids. An LV owns the list of
//! its segment ids; sub-LV areas and pool references are plain ids with a
//! matching entry in the target LV's `users` set.

use crate::error::{LvCacheError, LvCacheResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Default extent size in 512-byte sectors (4 MiB)
pub const DEFAULT_EXTENT_SIZE: u64 = 8192;

/// Handle of a logical volume inside its volume group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LvId(u32);

impl LvId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lv#{}", self.0)
    }
}

/// Handle of a segment inside its volume group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegId(u32);

impl SegId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg#{}", self.0)
    }
}

/// LV status flags, named as in LVM text metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusFlag {
    Read,
    Write,
    Visible,
    Cache,
    CachePool,
    CachePoolData,
    CachePoolMetadata,
}

/// Kind of device-mapper target a segment maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegType {
    Linear,
    Striped,
    Error,
    Zero,
    Cache,
    CachePool,
}

impl SegType {
    pub const ALL: [SegType; 6] = [
        SegType::Linear,
        SegType::Striped,
        SegType::Error,
        SegType::Zero,
        SegType::Cache,
        SegType::CachePool,
    ];

    /// Name used in metadata and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Striped => "striped",
            Self::Error => "error",
            Self::Zero => "zero",
            Self::Cache => "cache",
            Self::CachePool => "cache-pool",
        }
    }

    /// Virtual segments have no areas
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Error | Self::Zero)
    }
}

impl fmt::Display for SegType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SegType {
    type Err = LvCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| LvCacheError::SegmentTypeNotFound(s.to_string()))
    }
}

/// Where a segment's extents come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Area {
    /// Physical extents on a physical volume
    Pv { pv: String, pe: u32 },
    /// Logical extents of another LV in the same group
    Lv { lv: LvId, le: u32 },
}

/// Cache replacement policy with its tunables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

impl CachePolicy {
    /// Policy that writes back all dirty blocks and admits no new ones
    pub const CLEANER: &'static str = "cleaner";

    /// Policy assigned to new cache pools
    pub const DEFAULT: &'static str = "smq";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn cleaner() -> Self {
        Self::new(Self::CLEANER)
    }

    pub fn is_cleaner(&self) -> bool {
        self.name == Self::CLEANER
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (key, value) in &self.args {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// A typed, extent-ranged piece of an LV's address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Owning LV
    pub lv: LvId,
    pub segtype: SegType,
    /// First logical extent within the owning LV
    pub le: u32,
    /// Length in extents
    pub len: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub areas: Vec<Area>,
    /// Cache pool backing a cache segment (non-owning)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<LvId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<CachePolicy>,
}

impl Segment {
    /// Create a segment with no areas; `le` is assigned on append
    pub fn new(segtype: SegType, len: u32) -> Self {
        Self {
            lv: LvId(0),
            segtype,
            le: 0,
            len,
            areas: Vec::new(),
            pool: None,
            policy: None,
        }
    }

    pub fn with_area(mut self, area: Area) -> Self {
        self.areas.push(area);
        self
    }

    /// LV mapped by area `n`, if that area is an LV
    pub fn area_lv(&self, n: usize) -> Option<LvId> {
        match self.areas.get(n) {
            Some(Area::Lv { lv, .. }) => Some(*lv),
            _ => None,
        }
    }

    /// Every LV this segment references, areas first then the pool
    pub fn referenced_lvs(&self) -> impl Iterator<Item = LvId> + '_ {
        self.areas
            .iter()
            .filter_map(|area| match area {
                Area::Lv { lv, .. } => Some(*lv),
                Area::Pv { .. } => None,
            })
            .chain(self.pool)
    }
}

/// A named block device made of segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub id: LvId,
    pub uuid: Uuid,
    pub name: String,
    pub status: BTreeSet<StatusFlag>,
    pub le_count: u32,
    pub segments: Vec<SegId>,
    /// Segments (of any LV) that map this LV as an area or use it as a pool
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub users: BTreeSet<SegId>,
    pub created_at: DateTime<Utc>,
}

impl LogicalVolume {
    pub fn has(&self, flag: StatusFlag) -> bool {
        self.status.contains(&flag)
    }

    pub fn is_visible(&self) -> bool {
        self.has(StatusFlag::Visible)
    }

    pub fn set_visible(&mut self) {
        self.status.insert(StatusFlag::Visible);
    }

    pub fn set_hidden(&mut self) {
        self.status.remove(&StatusFlag::Visible);
    }
}

/// A transactional collection of logical volumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroup {
    pub name: String,
    pub uuid: Uuid,
    /// Metadata sequence number, bumped on every staged write
    pub seqno: u64,
    /// Extent size in 512-byte sectors
    pub extent_size: u64,
    lvs: Vec<Option<LogicalVolume>>,
    segments: Vec<Option<Segment>>,
}

impl VolumeGroup {
    pub fn new(name: impl Into<String>, extent_size: u64) -> LvCacheResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        if extent_size == 0 {
            return Err(LvCacheError::User(format!(
                "extent size of {} must be non-zero",
                name
            )));
        }
        Ok(Self {
            name,
            uuid: Uuid::new_v4(),
            seqno: 0,
            extent_size,
            lvs: Vec::new(),
            segments: Vec::new(),
        })
    }

    pub fn lv(&self, id: LvId) -> LvCacheResult<&LogicalVolume> {
        self.lvs
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| LvCacheError::internal(format!("stale {} in {}", id, self.name)))
    }

    pub fn lv_mut(&mut self, id: LvId) -> LvCacheResult<&mut LogicalVolume> {
        let vg = &self.name;
        self.lvs
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| LvCacheError::internal(format!("stale {} in {}", id, vg)))
    }

    pub fn seg(&self, id: SegId) -> LvCacheResult<&Segment> {
        self.segments
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| LvCacheError::internal(format!("stale {} in {}", id, self.name)))
    }

    pub fn seg_mut(&mut self, id: SegId) -> LvCacheResult<&mut Segment> {
        let vg = &self.name;
        self.segments
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| LvCacheError::internal(format!("stale {} in {}", id, vg)))
    }

    /// All live LVs in creation order
    pub fn lvs(&self) -> impl Iterator<Item = &LogicalVolume> {
        self.lvs.iter().flatten()
    }

    pub fn find_lv(&self, name: &str) -> Option<LvId> {
        self.lvs().find(|lv| lv.name == name).map(|lv| lv.id)
    }

    /// Look up an LV by name, failing when it does not exist
    pub fn lv_by_name(&self, name: &str) -> LvCacheResult<LvId> {
        self.find_lv(name).ok_or_else(|| LvCacheError::LvNotFound {
            vg: self.name.clone(),
            name: name.to_string(),
        })
    }

    /// Name of an LV for messages; stale handles render as their id
    pub fn lv_name(&self, id: LvId) -> String {
        self.lv(id)
            .map(|lv| lv.name.clone())
            .unwrap_or_else(|_| id.to_string())
    }

    pub fn first_seg(&self, id: LvId) -> Option<SegId> {
        self.lv(id).ok()?.segments.first().copied()
    }

    pub fn first_segment(&self, id: LvId) -> Option<&Segment> {
        self.first_seg(id).and_then(|seg| self.seg(seg).ok())
    }

    fn first_segtype(&self, id: LvId) -> Option<SegType> {
        self.first_segment(id).map(|seg| seg.segtype)
    }

    /// LV whose first segment is a cache segment
    pub fn is_cache(&self, id: LvId) -> bool {
        self.first_segtype(id) == Some(SegType::Cache)
    }

    pub fn is_cache_pool(&self, id: LvId) -> bool {
        self.first_segtype(id) == Some(SegType::CachePool)
    }

    /// LV mapped as the origin (area 0) of some cache segment
    pub fn is_cache_origin(&self, id: LvId) -> bool {
        self.lv(id).is_ok_and(|lv| {
            lv.users.iter().any(|user| {
                self.seg(*user)
                    .is_ok_and(|seg| seg.segtype == SegType::Cache && seg.area_lv(0) == Some(id))
            })
        })
    }

    /// Any LV taking part in a cache stack: cache, origin, pool or pool sub-LV
    pub fn is_cache_type(&self, id: LvId) -> bool {
        if self.is_cache(id) || self.is_cache_pool(id) || self.is_cache_origin(id) {
            return true;
        }
        self.lv(id).is_ok_and(|lv| {
            lv.has(StatusFlag::Cache)
                || lv.has(StatusFlag::CachePool)
                || lv.has(StatusFlag::CachePoolData)
                || lv.has(StatusFlag::CachePoolMetadata)
        })
    }

    /// Add an empty LV; it carries `READ` and `WRITE` plus `status`
    pub fn add_lv(
        &mut self,
        name: &str,
        status: impl IntoIterator<Item = StatusFlag>,
    ) -> LvCacheResult<LvId> {
        validate_name(name)?;
        if self.find_lv(name).is_some() {
            return Err(LvCacheError::LvExists {
                vg: self.name.clone(),
                name: name.to_string(),
            });
        }

        let id = LvId(self.lvs.len() as u32);
        let mut flags: BTreeSet<StatusFlag> = [StatusFlag::Read, StatusFlag::Write].into();
        flags.extend(status);
        self.lvs.push(Some(LogicalVolume {
            id,
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            status: flags,
            le_count: 0,
            segments: Vec::new(),
            users: BTreeSet::new(),
            created_at: Utc::now(),
        }));
        Ok(id)
    }

    /// Append a segment at the end of `lv`, registering it with every LV it references
    pub fn append_segment(&mut self, lv: LvId, mut segment: Segment) -> LvCacheResult<SegId> {
        for target in segment.referenced_lvs() {
            if target == lv {
                return Err(LvCacheError::internal(format!(
                    "segment of {} cannot reference itself",
                    self.lv_name(lv)
                )));
            }
            self.lv(target)?;
        }

        let id = SegId(self.segments.len() as u32);
        let owner = self.lv_mut(lv)?;
        let le_count = owner.le_count.checked_add(segment.len).ok_or_else(|| {
            LvCacheError::User(format!("{} would exceed {} extents", owner.name, u32::MAX))
        })?;
        segment.lv = lv;
        segment.le = owner.le_count;
        owner.le_count = le_count;
        owner.segments.push(id);

        let targets: Vec<LvId> = segment.referenced_lvs().collect();
        self.segments.push(Some(segment));
        for target in targets {
            self.lv_mut(target)?.users.insert(id);
        }
        Ok(id)
    }

    /// Drop a segment from the arena. The caller must already have taken
    /// it out of its owner's list.
    pub(crate) fn release_segment(&mut self, id: SegId) -> LvCacheResult<Segment> {
        self.segments
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or_else(|| LvCacheError::internal(format!("stale {} in {}", id, self.name)))
    }

    /// Remove an LV nothing uses any more, freeing its segments
    pub fn remove_lv(&mut self, id: LvId) -> LvCacheResult<LogicalVolume> {
        let lv = self.lv(id)?;
        if !lv.users.is_empty() {
            return Err(LvCacheError::LvInUse {
                name: lv.name.clone(),
                users: lv.users.len(),
            });
        }

        let segments = lv.segments.clone();
        for seg_id in segments {
            let seg = self.release_segment(seg_id)?;
            for target in seg.referenced_lvs() {
                self.lv_mut(target)?.users.remove(&seg_id);
            }
        }

        let mut removed = self.lvs[id.index()]
            .take()
            .ok_or_else(|| LvCacheError::internal(format!("stale {} in {}", id, self.name)))?;
        removed.segments.clear();
        removed.le_count = 0;
        Ok(removed)
    }

    /// First physical extent past every area allocated on `pv`
    pub fn next_free_pe(&self, pv: &str) -> LvCacheResult<u32> {
        let mut next = 0;
        for seg in self.segments.iter().flatten() {
            for area in &seg.areas {
                if let Area::Pv { pv: name, pe } = area {
                    if name == pv {
                        let end = pe.checked_add(seg.len).ok_or_else(|| {
                            LvCacheError::User(format!("{} has no free extents left", pv))
                        })?;
                        next = next.max(end);
                    }
                }
            }
        }
        Ok(next)
    }

    /// Create a visible linear LV allocated at the end of `pv`
    pub fn create_linear_lv(&mut self, name: &str, extents: u32, pv: &str) -> LvCacheResult<LvId> {
        if extents == 0 {
            return Err(LvCacheError::User(format!("{} needs at least one extent", name)));
        }
        let pe = self.next_free_pe(pv)?;
        if pe.checked_add(extents).is_none() {
            return Err(LvCacheError::User(format!(
                "{} extents for {} do not fit on {} after extent {}",
                extents, name, pv, pe
            )));
        }
        let id = self.add_lv(name, [StatusFlag::Visible])?;
        let segment = Segment::new(SegType::Linear, extents).with_area(Area::Pv {
            pv: pv.to_string(),
            pe,
        });
        self.append_segment(id, segment)?;
        Ok(id)
    }

    /// Check the graph invariants that must hold before metadata is written
    pub fn validate(&self) -> LvCacheResult<()> {
        let invalid = |reason: String| LvCacheError::MetadataInvalid {
            vg: self.name.clone(),
            reason,
        };

        for lv in self.lvs() {
            let mut next_le = 0;
            for seg_id in &lv.segments {
                let seg = self.seg(*seg_id)?;
                if seg.lv != lv.id {
                    return Err(invalid(format!("{} listed by {} but owned by {}", seg_id, lv.name, seg.lv)));
                }
                if seg.le != next_le {
                    return Err(invalid(format!("{} of {} starts at {} not {}", seg_id, lv.name, seg.le, next_le)));
                }
                next_le += seg.len;
            }
            if next_le != lv.le_count {
                return Err(invalid(format!(
                    "{} has {} extents but its segments cover {}",
                    lv.name, lv.le_count, next_le
                )));
            }

            for user in &lv.users {
                let seg = self.seg(*user)?;
                if !seg.referenced_lvs().any(|target| target == lv.id) {
                    return Err(invalid(format!("{} is listed as a user of {} but does not reference it", user, lv.name)));
                }
            }

            if lv.has(StatusFlag::Cache) {
                match self.first_segment(lv.id) {
                    Some(seg) if seg.segtype == SegType::Cache && seg.pool.is_some() => {}
                    _ => return Err(invalid(format!("{} is flagged CACHE without an attached cache segment", lv.name))),
                }
            }
        }

        for (index, seg) in self.segments.iter().enumerate() {
            let Some(seg) = seg else { continue };
            let id = SegId(index as u32);
            let owner = self.lv(seg.lv)?;
            if !owner.segments.contains(&id) {
                return Err(invalid(format!("{} is not listed by its owner {}", id, owner.name)));
            }
            for target in seg.referenced_lvs() {
                if !self.lv(target)?.users.contains(&id) {
                    return Err(invalid(format!("{} of {} is not registered with {}", id, owner.name, self.lv_name(target))));
                }
            }
            if seg.segtype == SegType::Cache {
                if seg.pool.is_none() {
                    return Err(invalid(format!("cache segment of {} has no pool", owner.name)));
                }
                if let Some(origin) = seg.area_lv(0) {
                    if self.is_cache(origin) {
                        return Err(invalid(format!("{} stacks a cache on cache LV {}", owner.name, self.lv_name(origin))));
                    }
                }
            }
        }

        Ok(())
    }
}

/// LVM-compatible name check
fn validate_name(name: &str) -> LvCacheResult<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > 127 {
        Some("name is longer than 127 characters")
    } else if name.starts_with('-') {
        Some("name may not start with '-'")
    } else if name == "." || name == ".." {
        Some("name may not be '.' or '..'")
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'))
    {
        Some("only [a-zA-Z0-9._+-] are allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(LvCacheError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
