//! Cache create/remove against recording collaborators

use crate::support::{context, group, CallLog, RecordingStore, ScriptedDevices};
use lvcache::cache::{
    create_cache, remove_cache, update_and_reload, FlushProgress, ProgressHook, RemoveStep, TxPhase,
};
use lvcache::error::LvCacheError;
use lvcache::metadata::{Area, SegType, SegmentTypeRegistry, StatusFlag};
use std::sync::{Arc, Mutex};

fn fakes() -> (CallLog, ScriptedDevices, RecordingStore) {
    let log = CallLog::default();
    let devices = ScriptedDevices::new(log.clone());
    let store = RecordingStore::new(log.clone());
    (log, devices, store)
}

#[test]
fn create_then_reload_suspends_origin_and_resumes_cache() {
    let (log, devices, store) = fakes();
    let committed = store.committed();
    let mut ctx = context(devices, store);
    let (mut vg, pool, data) = group();

    let live = vg.clone();
    let cache_lv = create_cache(&ctx, &mut vg, pool, data).unwrap();
    let tx = update_and_reload(&mut ctx, &mut vg, &live, cache_lv).unwrap();

    assert_eq!(
        log.entries(),
        vec!["stage 1", "suspend data", "commit 1", "resume data"]
    );
    assert_eq!(tx.suspended, vec![data]);
    assert!(tx.detached.is_empty());
    assert!(tx.resumed.contains(&pool));

    let on_disk = committed.lock().unwrap().clone().unwrap();
    assert!(on_disk.is_cache(cache_lv));
    assert!(on_disk.find_lv("data_corig").is_some());
}

#[test]
fn cache_over_cache_is_rejected() {
    let (_, devices, store) = fakes();
    let ctx = context(devices, store);
    let (mut vg, pool, data) = group();
    create_cache(&ctx, &mut vg, pool, data).unwrap();

    let second = lvcache::metadata::create_cache_pool(
        &mut vg,
        "fast2",
        8,
        1,
        "ssd1",
        lvcache::metadata::CachePolicy::new("smq"),
    )
    .unwrap();
    let before = vg.clone();

    let err = create_cache(&ctx, &mut vg, second, data).unwrap_err();
    assert!(matches!(err, LvCacheError::OriginIsCache { .. }));
    assert_eq!(vg, before);
}

#[test]
fn hidden_origin_cannot_take_a_second_cache() {
    let (log, devices, store) = fakes();
    let mut ctx = context(devices.with_policy("cleaner"), store);
    let (mut vg, pool, data) = group();
    create_cache(&ctx, &mut vg, pool, data).unwrap();

    let second = lvcache::metadata::create_cache_pool(
        &mut vg,
        "fast2",
        8,
        1,
        "ssd1",
        lvcache::metadata::CachePolicy::new("smq"),
    )
    .unwrap();
    let corig = vg.lv_by_name("data_corig").unwrap();
    assert!(vg.is_cache_origin(corig));
    let before = vg.clone();

    let err = create_cache(&ctx, &mut vg, second, corig).unwrap_err();
    assert!(matches!(err, LvCacheError::OriginIsCache { ref name } if name == "data_corig"));
    assert_eq!(vg, before);
    assert!(vg.find_lv("data_corig_corig").is_none());
    vg.validate().unwrap();

    // The outer cache still comes apart cleanly.
    remove_cache(&mut ctx, &mut vg, data).unwrap();
    assert_eq!(log.count("stage 1"), 1);
    assert!(vg.lv(second).unwrap().users.is_empty());
}

#[test]
fn non_pool_is_rejected_without_changes() {
    let (log, devices, store) = fakes();
    let ctx = context(devices, store);
    let (mut vg, _, data) = group();
    let plain = vg.create_linear_lv("plain", 8, "ssd1").unwrap();
    let before = vg.clone();

    let err = create_cache(&ctx, &mut vg, plain, data).unwrap_err();
    assert!(matches!(err, LvCacheError::NotCachePool { .. }));
    assert_eq!(vg, before);
    assert!(log.entries().is_empty());
}

#[test]
fn unknown_cache_segtype_changes_nothing() {
    let (_, devices, store) = fakes();
    let ctx = context(devices, store)
        .with_segtypes(SegmentTypeRegistry::with_types([SegType::Linear, SegType::Error]));
    let (mut vg, pool, data) = group();
    let before = vg.clone();

    let err = create_cache(&ctx, &mut vg, pool, data).unwrap_err();
    assert!(matches!(err, LvCacheError::SegmentTypeNotFound(ref name) if name == "cache"));
    assert_eq!(vg, before);
}

#[test]
fn round_trip_restores_the_original_layout() {
    let (_, devices, store) = fakes();
    let mut ctx = context(devices, store);
    let (mut vg, pool, data) = group();
    let original = vg.first_segment(data).unwrap().clone();
    let names_before: Vec<String> = vg.lvs().map(|lv| lv.name.clone()).collect();

    create_cache(&ctx, &mut vg, pool, data).unwrap();
    assert_eq!(vg.lv(data).unwrap().le_count, 64);
    let summary = remove_cache(&mut ctx, &mut vg, data).unwrap();

    let names_after: Vec<String> = vg.lvs().map(|lv| lv.name.clone()).collect();
    assert_eq!(names_after, names_before);

    let restored = vg.first_segment(data).unwrap();
    assert_eq!(restored.segtype, SegType::Linear);
    assert_eq!(restored.len, 64);
    assert_eq!(restored.areas, original.areas);
    assert_eq!(
        restored.areas,
        vec![Area::Pv {
            pv: "hdd0".to_string(),
            pe: 0
        }]
    );

    let lv = vg.lv(data).unwrap();
    assert_eq!(lv.le_count, 64);
    assert!(!lv.has(StatusFlag::Cache));
    assert!(vg.lv(summary.pool).unwrap().users.is_empty());
    vg.validate().unwrap();
}

#[test]
fn detach_waits_for_the_cache_to_drain() {
    let (log, devices, store) = fakes();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let hook: ProgressHook = Arc::new(move |p: &FlushProgress| {
        sink.lock().unwrap().push((p.polls, p.dirty));
    });
    let mut ctx = context(devices.with_dirty(&[40, 12, 0]), store).with_flush_progress(hook);
    let (mut vg, pool, data) = group();
    create_cache(&ctx, &mut vg, pool, data).unwrap();

    let summary = remove_cache(&mut ctx, &mut vg, data).unwrap();

    assert_eq!(summary.flush.polls, 3);
    assert_eq!(log.count("block-info data"), 3);
    assert_eq!(*seen.lock().unwrap(), vec![(1, 40), (2, 12)]);

    // The detach transaction only starts after the last dirty check.
    let last_query = log.last_position("block-info data").unwrap();
    let detach_suspend = log.last_position("suspend data").unwrap();
    assert!(last_query < detach_suspend);
}

#[test]
fn cleaner_policy_skips_the_swap() {
    let (log, devices, store) = fakes();
    let mut ctx = context(devices.with_policy("cleaner"), store);
    let (mut vg, pool, data) = group();
    create_cache(&ctx, &mut vg, pool, data).unwrap();

    let summary = remove_cache(&mut ctx, &mut vg, data).unwrap();

    assert!(!summary.policy_swapped);
    assert_eq!(log.count("suspend data"), 1);
    assert_eq!(log.count("stage 1"), 1);
    assert_eq!(log.count("stage 2"), 0);
}

#[test]
fn smq_policy_is_swapped_before_flushing() {
    let (log, devices, store) = fakes();
    let committed = store.committed();
    let mut ctx = context(devices, store);
    let (mut vg, pool, data) = group();
    create_cache(&ctx, &mut vg, pool, data).unwrap();

    let summary = remove_cache(&mut ctx, &mut vg, data).unwrap();

    assert!(summary.policy_swapped);
    let swap_resume = log.position("resume data").unwrap();
    let first_query = log.position("block-info data").unwrap();
    assert!(swap_resume < first_query);
    assert_eq!(log.count("suspend data"), 2);

    // The last commit is the detach; the caller writes the removal itself.
    let on_disk = committed.lock().unwrap().clone().unwrap();
    assert_eq!(on_disk.seqno, 2);
    assert!(on_disk.find_lv("data_corig").is_some());
}

#[test]
fn pool_is_resumed_separately_before_the_origin_goes() {
    let (log, devices, store) = fakes();
    let mut ctx = context(devices.with_policy("cleaner"), store);
    let (mut vg, pool, data) = group();
    create_cache(&ctx, &mut vg, pool, data).unwrap();

    remove_cache(&mut ctx, &mut vg, data).unwrap();

    assert_eq!(
        log.entries(),
        vec![
            "policy data",
            "block-info data",
            "stage 1",
            "suspend data",
            "commit 1",
            "resume data",
            "resume fast",
            "activate data_corig",
            "deactivate data_corig",
        ]
    );
}

#[test]
fn commit_failure_is_not_rolled_back() {
    let (log, devices, store) = fakes();
    let mut ctx = context(devices.with_policy("cleaner"), store.failing_commit());
    let (mut vg, pool, data) = group();
    create_cache(&ctx, &mut vg, pool, data).unwrap();

    let err = remove_cache(&mut ctx, &mut vg, data).unwrap_err();
    let failure = err.failed_step().unwrap();
    assert_eq!(failure.step, RemoveStep::Transaction);
    assert!(matches!(
        failure.source,
        LvCacheError::Transaction {
            phase: TxPhase::Commit,
            ..
        }
    ));

    // Suspended and never resumed.
    assert_eq!(log.entries().last().map(String::as_str), Some("commit 1"));
    assert_eq!(log.count("resume data"), 0);

    // In-memory edits stay applied.
    let snapshot = &failure.snapshot;
    assert!(!snapshot.is_cache(data));
    assert!(!snapshot.lv(data).unwrap().has(StatusFlag::Cache));
    assert!(snapshot.lv(pool).unwrap().users.is_empty());
    let shell = snapshot.lv_by_name("data_corig").unwrap();
    let error_seg = snapshot.first_segment(shell).unwrap();
    assert_eq!(error_seg.segtype, SegType::Error);
    assert_eq!(error_seg.len, 64);
    assert_eq!(vg, failure.snapshot);
}

#[test]
fn origin_teardown_failure_names_the_step() {
    let (log, devices, store) = fakes();
    let mut ctx = context(
        devices
            .with_policy("cleaner")
            .failing_on("deactivate data_corig"),
        store,
    );
    let (mut vg, pool, data) = group();
    create_cache(&ctx, &mut vg, pool, data).unwrap();

    let err = remove_cache(&mut ctx, &mut vg, data).unwrap_err();
    let failure = err.failed_step().unwrap();
    assert_eq!(failure.step, RemoveStep::OriginDeactivate);
    assert!(failure.snapshot.find_lv("data_corig").is_some());
    assert_eq!(log.count("resume fast"), 1);
    assert!(err.to_string().contains("origin-deactivate"));
}

#[test]
fn removing_a_plain_lv_fails_before_any_device_call() {
    let (log, devices, store) = fakes();
    let mut ctx = context(devices, store);
    let (mut vg, _, data) = group();

    let err = remove_cache(&mut ctx, &mut vg, data).unwrap_err();
    assert!(matches!(err, LvCacheError::NotCache { .. }));
    assert!(log.entries().is_empty());
}
