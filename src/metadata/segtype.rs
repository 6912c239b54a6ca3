//! Segment type registry
//!
//! The command context resolves segment types by name, the way a
//! volume manager looks up its loaded target handlers. A registry that
//! lacks a type makes every operation needing it fail cleanly.

use crate::error::{LvCacheError, LvCacheResult};
use crate::metadata::model::SegType;
use std::collections::BTreeMap;

/// Descriptor for a segment type known to the command context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentType {
    pub kind: SegType,
}

impl SegmentType {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_virtual(&self) -> bool {
        self.kind.is_virtual()
    }
}

/// Name-indexed set of segment types
#[derive(Debug, Clone)]
pub struct SegmentTypeRegistry {
    types: BTreeMap<&'static str, SegmentType>,
}

impl SegmentTypeRegistry {
    /// Registry with every built-in segment type
    pub fn builtin() -> Self {
        Self::with_types(SegType::ALL)
    }

    /// Registry limited to the given types
    pub fn with_types(kinds: impl IntoIterator<Item = SegType>) -> Self {
        let mut registry = Self {
            types: BTreeMap::new(),
        };
        for kind in kinds {
            registry.register(kind);
        }
        registry
    }

    pub fn register(&mut self, kind: SegType) {
        self.types.insert(kind.name(), SegmentType { kind });
    }

    pub fn resolve(&self, name: &str) -> LvCacheResult<&SegmentType> {
        self.types
            .get(name)
            .ok_or_else(|| LvCacheError::SegmentTypeNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.keys().copied()
    }
}

impl Default for SegmentTypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
