//! Volume group metadata
//!
//! The in-memory volume graph, the structural edits the cache protocol
//! performs on it, and the store that persists it.
//!
//! | Module | Role |
//! |--------|------|
//! | `model` | VGs, LVs, segments and their id arenas |
//! | `layer` | Layer insertion, segment moves, virtual segments |
//! | `pool` | Cache pool construction, attach and detach |
//! | `segtype` | Segment type registry |
//! | `store` | Two-phase metadata writes |

pub mod layer;
pub mod model;
pub mod pool;
pub mod segtype;
pub mod store;

pub use layer::{add_virtual_segment, insert_layer, move_segments, remove_segment_user, CACHE_ORIGIN_SUFFIX};
pub use model::{
    Area, CachePolicy, LogicalVolume, LvId, SegId, SegType, Segment, StatusFlag, VolumeGroup,
    DEFAULT_EXTENT_SIZE,
};
pub use pool::{attach_pool, create_cache_pool, detach_pool};
pub use segtype::{SegmentType, SegmentTypeRegistry};
pub use store::{commit_vg, write_vg, FileStore, MetadataStore};
