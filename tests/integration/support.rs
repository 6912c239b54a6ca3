//! Recording collaborators for driving the cache protocol in tests

use lvcache::cache::FlushPolicy;
use lvcache::device::CacheBlockInfo;
use lvcache::device::DeviceManager;
use lvcache::error::{LvCacheError, LvCacheResult};
use lvcache::metadata::{
    create_cache_pool, CachePolicy, LvId, MetadataStore, VolumeGroup, DEFAULT_EXTENT_SIZE,
};
use lvcache::CommandContext;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered record of every device and store call, shared by both fakes
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn last_position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().rposition(|e| e == entry)
    }
}

/// Device manager answering from a script
pub struct ScriptedDevices {
    log: CallLog,
    policy: CachePolicy,
    dirty: VecDeque<u64>,
    fail_on: Option<String>,
}

impl ScriptedDevices {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            policy: CachePolicy::new("smq"),
            dirty: VecDeque::new(),
            fail_on: None,
        }
    }

    /// Policy reported by the kernel
    pub fn with_policy(mut self, name: &str) -> Self {
        self.policy = CachePolicy::new(name);
        self
    }

    /// Dirty block counts returned by successive queries; 0 once exhausted
    pub fn with_dirty(mut self, counts: &[u64]) -> Self {
        self.dirty = counts.iter().copied().collect();
        self
    }

    /// Fail the call whose log entry matches `entry`
    pub fn failing_on(mut self, entry: &str) -> Self {
        self.fail_on = Some(entry.to_string());
        self
    }

    fn record(&self, op: &str, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        let entry = format!("{} {}", op, vg.lv(lv)?.name);
        self.log.push(entry.clone());
        if self.fail_on.as_deref() == Some(entry.as_str()) {
            return Err(LvCacheError::Device {
                op: op.to_string(),
                device: vg.lv_name(lv),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl DeviceManager for ScriptedDevices {
    fn suspend(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        self.record("suspend", vg, lv)
    }

    fn resume(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        self.record("resume", vg, lv)
    }

    fn activate(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        self.record("activate", vg, lv)
    }

    fn deactivate(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        self.record("deactivate", vg, lv)
    }

    fn cache_policy(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<CachePolicy> {
        self.record("policy", vg, lv)?;
        Ok(self.policy.clone())
    }

    fn cache_block_info(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<CacheBlockInfo> {
        self.record("block-info", vg, lv)?;
        Ok(CacheBlockInfo {
            dirty: self.dirty.pop_front().unwrap_or(0),
            ..CacheBlockInfo::default()
        })
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

/// Metadata store that records stage/commit and keeps the last commit
pub struct RecordingStore {
    log: CallLog,
    committed: Arc<Mutex<Option<VolumeGroup>>>,
    fail_commit: bool,
}

impl RecordingStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            committed: Arc::default(),
            fail_commit: false,
        }
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// Handle on the most recently committed group
    pub fn committed(&self) -> Arc<Mutex<Option<VolumeGroup>>> {
        Arc::clone(&self.committed)
    }
}

impl MetadataStore for RecordingStore {
    fn stage(&mut self, vg: &VolumeGroup) -> LvCacheResult<()> {
        self.log.push(format!("stage {}", vg.seqno));
        Ok(())
    }

    fn commit(&mut self, vg: &VolumeGroup) -> LvCacheResult<()> {
        self.log.push(format!("commit {}", vg.seqno));
        if self.fail_commit {
            return Err(LvCacheError::internal("metadata device full"));
        }
        *self.committed.lock().unwrap() = Some(vg.clone());
        Ok(())
    }
}

/// Context wired to the fakes with an instant flush poll
pub fn context(devices: ScriptedDevices, store: RecordingStore) -> CommandContext {
    CommandContext::new(Box::new(devices), Box::new(store)).with_flush_policy(FlushPolicy {
        poll_interval: Duration::ZERO,
        max_wait: None,
    })
}

/// `vg0` with a 16-extent pool `fast` on ssd0 and a 64-extent LV `data` on hdd0
pub fn group() -> (VolumeGroup, LvId, LvId) {
    let mut vg = VolumeGroup::new("vg0", DEFAULT_EXTENT_SIZE).unwrap();
    let pool = create_cache_pool(&mut vg, "fast", 16, 1, "ssd0", CachePolicy::new("smq")).unwrap();
    let data = vg.create_linear_lv("data", 64, "hdd0").unwrap();
    (vg, pool, data)
}
