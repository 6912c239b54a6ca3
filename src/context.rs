//! Command context
//!
//! Bundles what one cache operation needs from its surroundings: the
//! segment type registry, the flush policy, the device manager and the
//! metadata store. The caller is expected to hold the volume group lock
//! for as long as the context is in use.

use crate::cache::flush::{FlushPolicy, ProgressHook};
use crate::config::schema::DeviceBackend;
use crate::config::{Config, ConfigManager};
use crate::device::{DeviceManager, Dmsetup, Simulated};
use crate::metadata::segtype::SegmentTypeRegistry;
use crate::metadata::store::{FileStore, MetadataStore};

/// Collaborators for cache create/remove
pub struct CommandContext {
    segtypes: SegmentTypeRegistry,
    flush: FlushPolicy,
    on_flush_progress: Option<ProgressHook>,
    devices: Box<dyn DeviceManager>,
    store: Box<dyn MetadataStore>,
}

impl CommandContext {
    /// Create a context with the built-in segment types and default flush policy
    pub fn new(devices: Box<dyn DeviceManager>, store: Box<dyn MetadataStore>) -> Self {
        Self {
            segtypes: SegmentTypeRegistry::builtin(),
            flush: FlushPolicy::default(),
            on_flush_progress: None,
            devices,
            store,
        }
    }

    /// Create a context from configuration
    ///
    /// Metadata goes to the configured directory; the device backend is
    /// dmsetup unless the configuration selects the simulator.
    pub fn from_config(config: &Config) -> Self {
        let devices: Box<dyn DeviceManager> = match config.device.backend {
            DeviceBackend::Dmsetup => Box::new(
                Dmsetup::new(config.device.dmsetup.clone())
                    .with_table_generator(config.device.table_generator.clone()),
            ),
            DeviceBackend::Simulate => Box::new(Simulated::new()),
        };
        let store = FileStore::new(ConfigManager::metadata_dir(config));

        Self::new(devices, Box::new(store)).with_flush_policy(config.flush.policy())
    }

    pub fn with_segtypes(mut self, segtypes: SegmentTypeRegistry) -> Self {
        self.segtypes = segtypes;
        self
    }

    pub fn with_flush_policy(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    /// Call `hook` on every poll that still finds dirty blocks
    pub fn with_flush_progress(mut self, hook: ProgressHook) -> Self {
        self.on_flush_progress = Some(hook);
        self
    }

    pub fn segtypes(&self) -> &SegmentTypeRegistry {
        &self.segtypes
    }

    pub fn flush_policy(&self) -> &FlushPolicy {
        &self.flush
    }

    pub fn flush_progress(&self) -> Option<ProgressHook> {
        self.on_flush_progress.clone()
    }

    pub fn devices(&mut self) -> &mut dyn DeviceManager {
        self.devices.as_mut()
    }

    pub fn store(&mut self) -> &mut dyn MetadataStore {
        self.store.as_mut()
    }
}
