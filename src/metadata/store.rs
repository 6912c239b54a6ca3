//! Volume group metadata persistence
//!
//! Writing metadata is two-phase: `stage` makes the new state the pending
//! on-disk copy, `commit` makes it the durable one. Between the two the
//! live devices are suspended, so the kernel never runs a table that
//! disagrees with committed metadata.

use crate::error::{LvCacheError, LvCacheResult};
use crate::metadata::model::VolumeGroup;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Durable storage for volume group metadata
pub trait MetadataStore: Send {
    /// Record `vg` as the pending metadata
    fn stage(&mut self, vg: &VolumeGroup) -> LvCacheResult<()>;

    /// Promote the pending metadata of `vg` to committed
    fn commit(&mut self, vg: &VolumeGroup) -> LvCacheResult<()>;
}

/// Validate `vg`, bump its seqno and stage it
pub fn write_vg(store: &mut dyn MetadataStore, vg: &mut VolumeGroup) -> LvCacheResult<()> {
    vg.validate()?;
    vg.seqno += 1;
    debug!("Staging metadata for {} (seqno {})", vg.name, vg.seqno);
    store.stage(vg)
}

/// Commit the metadata staged by [`write_vg`]
pub fn commit_vg(store: &mut dyn MetadataStore, vg: &VolumeGroup) -> LvCacheResult<()> {
    store.commit(vg)?;
    info!("Committed metadata for {} (seqno {})", vg.name, vg.seqno);
    Ok(())
}

/// JSON metadata files, one per volume group
///
/// `<dir>/<vg>.json` is the committed copy; staging writes
/// `<dir>/<vg>.json.pending`, and committing renames it into place.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the committed metadata for `vg`
    pub fn path(&self, vg: &str) -> PathBuf {
        self.dir.join(format!("{}.json", vg))
    }

    fn pending_path(&self, vg: &str) -> PathBuf {
        self.dir.join(format!("{}.json.pending", vg))
    }

    pub fn exists(&self, vg: &str) -> bool {
        self.path(vg).exists()
    }

    /// Load the committed metadata for `vg`
    pub fn load(&self, vg: &str) -> LvCacheResult<VolumeGroup> {
        let path = self.path(vg);
        if !path.exists() {
            return Err(LvCacheError::VgNotFound(vg.to_string()));
        }
        read_vg(&path)
    }

    /// Names of all volume groups with committed metadata
    pub fn list(&self) -> LvCacheResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let entries = fs::read_dir(&self.dir)
            .map_err(|e| LvCacheError::io(format!("reading {}", self.dir.display()), e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }
}

impl MetadataStore for FileStore {
    fn stage(&mut self, vg: &VolumeGroup) -> LvCacheResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| LvCacheError::DirCreate {
            path: self.dir.clone(),
            source: e,
        })?;

        let path = self.pending_path(&vg.name);
        let content = serde_json::to_string_pretty(vg)?;
        fs::write(&path, content)
            .map_err(|e| LvCacheError::io(format!("writing {}", path.display()), e))?;
        Ok(())
    }

    fn commit(&mut self, vg: &VolumeGroup) -> LvCacheResult<()> {
        let pending = self.pending_path(&vg.name);
        if !pending.exists() {
            return Err(LvCacheError::NothingStaged(vg.name.clone()));
        }

        let staged = read_vg(&pending)?;
        if staged.seqno != vg.seqno {
            return Err(LvCacheError::MetadataStale {
                vg: vg.name.clone(),
                expected: vg.seqno,
                found: staged.seqno,
            });
        }

        let path = self.path(&vg.name);
        fs::rename(&pending, &path)
            .map_err(|e| LvCacheError::io(format!("committing {}", path.display()), e))
    }
}

fn read_vg(path: &Path) -> LvCacheResult<VolumeGroup> {
    let content = fs::read_to_string(path)
        .map_err(|e| LvCacheError::io(format!("reading {}", path.display()), e))?;
    Ok(serde_json::from_str(&content)?)
}
