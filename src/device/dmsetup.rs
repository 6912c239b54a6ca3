//! dmsetup-backed device manager
//!
//! Runs the dmsetup binary for every kernel operation. Calls block until
//! dmsetup exits, matching the synchronous cache protocol.
//!
//! Tables for `error` and `zero` LVs are built here. Every other table
//! comes from the configured table generator, which is invoked as
//! `<generator> <vg> <lv>` with the volume group metadata as JSON on stdin
//! and prints the table on stdout. Empty output means the LV has no
//! device of its own. Without a generator, any non-virtual table fails
//! with `TableUnsupported` before the kernel is touched.

use crate::cache::txn::activation_closure;
use crate::device::status::{CacheBlockInfo, CacheStatus};
use crate::device::{dm_name, DeviceManager};
use crate::error::{LvCacheError, LvCacheResult};
use crate::metadata::model::{CachePolicy, LvId, VolumeGroup};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::{debug, info};

/// Device manager using the dmsetup command
pub struct Dmsetup {
    binary: PathBuf,
    table_generator: Option<PathBuf>,
}

/// Run `program`, feeding `input` on stdin when given
fn run(program: &Path, args: &[&str], input: Option<&str>) -> std::io::Result<Output> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(input.as_bytes())?;
    }
    child.wait_with_output()
}

impl Dmsetup {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            table_generator: None,
        }
    }

    /// Use `generator` for tables this backend cannot build itself
    pub fn with_table_generator(mut self, generator: Option<PathBuf>) -> Self {
        self.table_generator = generator;
        self
    }

    /// Run dmsetup, failing with its stderr when it exits non-zero
    fn exec(&self, op: &str, device: &str, args: &[&str], input: Option<&str>) -> LvCacheResult<Output> {
        debug!("Executing: {} {:?}", self.binary.display(), args);

        let output = run(&self.binary, args, input)
            .map_err(|e| LvCacheError::command_failed(format!("dmsetup {:?}", args), e))?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(LvCacheError::Device {
                op: op.to_string(),
                device: device.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Check whether a device node exists
    fn exists(&self, device: &str) -> bool {
        Command::new(&self.binary)
            .args(["info", device])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn status(&self, device: &str) -> LvCacheResult<CacheStatus> {
        let output = self.exec("status", device, &["status", device], None)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().next().unwrap_or_default();
        CacheStatus::parse(line).map_err(|reason| LvCacheError::StatusParse {
            device: device.to_string(),
            reason,
        })
    }

    /// Table for `lv` as the metadata in `vg` describes it
    ///
    /// `None` when the LV has no device of its own.
    fn table(&self, vg: &VolumeGroup, lv: LvId, device: &str) -> LvCacheResult<Option<String>> {
        match (virtual_table(vg, lv, device), &self.table_generator) {
            (Err(LvCacheError::TableUnsupported { .. }), Some(generator)) => {
                self.generate(generator, vg, lv, device)
            }
            (result, _) => result.map(Some),
        }
    }

    fn generate(
        &self,
        generator: &Path,
        vg: &VolumeGroup,
        lv: LvId,
        device: &str,
    ) -> LvCacheResult<Option<String>> {
        let metadata = serde_json::to_string(vg)?;
        let name = vg.lv(lv)?.name.clone();
        let output = run(generator, &[&vg.name, &name], Some(&metadata)).map_err(|e| {
            LvCacheError::command_failed(format!("{} {} {}", generator.display(), vg.name, name), e)
        })?;

        if !output.status.success() {
            return Err(LvCacheError::Device {
                op: "table".to_string(),
                device: device.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let table = String::from_utf8_lossy(&output.stdout).into_owned();
        if table.trim().is_empty() {
            debug!("{} has no device of its own", device);
            return Ok(None);
        }
        Ok(Some(table))
    }

    /// Put `table` in the inactive slot of `device`, creating the device if needed
    fn load(&self, device: &str, table: &str) -> LvCacheResult<()> {
        debug!("Loading {} with table:\n{}", device, table);
        if self.exists(device) {
            self.exec("load", device, &["load", device], Some(table))?;
        } else {
            self.exec("create", device, &["create", device], Some(table))?;
        }
        Ok(())
    }
}

/// Table for an LV made only of virtual segments
fn virtual_table(vg: &VolumeGroup, lv: LvId, device: &str) -> LvCacheResult<String> {
    let mut lines = Vec::new();
    for seg_id in &vg.lv(lv)?.segments {
        let seg = vg.seg(*seg_id)?;
        if !seg.segtype.is_virtual() {
            return Err(LvCacheError::TableUnsupported {
                device: device.to_string(),
                segtype: seg.segtype.to_string(),
            });
        }
        lines.push(format!(
            "{} {} {}",
            u64::from(seg.le) * vg.extent_size,
            u64::from(seg.len) * vg.extent_size,
            seg.segtype
        ));
    }
    if lines.is_empty() {
        return Err(LvCacheError::internal(format!("{} has no segments", device)));
    }
    Ok(lines.join("\n") + "\n")
}

impl DeviceManager for Dmsetup {
    fn preload(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        // Every table is built before the first load so a missing one
        // leaves the kernel untouched.
        let mut tables = Vec::new();
        for id in activation_closure(vg, lv).into_iter().rev() {
            let device = dm_name(&vg.name, &vg.lv(id)?.name);
            if let Some(table) = self.table(vg, id, &device)? {
                tables.push((device, table));
            }
        }
        for (device, table) in &tables {
            self.load(device, table)?;
        }
        info!("Preloaded {} table(s) under {}", tables.len(), vg.lv_name(lv));
        Ok(())
    }

    fn suspend(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        for id in activation_closure(vg, lv) {
            let device = dm_name(&vg.name, &vg.lv(id)?.name);
            if id != lv && !self.exists(&device) {
                continue;
            }
            self.exec("suspend", &device, &["suspend", &device], None)?;
            info!("Suspended {}", device);
        }
        Ok(())
    }

    fn resume(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        for id in activation_closure(vg, lv).into_iter().rev() {
            let device = dm_name(&vg.name, &vg.lv(id)?.name);
            if id != lv && !self.exists(&device) {
                continue;
            }
            self.exec("resume", &device, &["resume", &device], None)?;
            info!("Resumed {}", device);
        }
        Ok(())
    }

    fn activate(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        let device = dm_name(&vg.name, &vg.lv(lv)?.name);
        let Some(table) = self.table(vg, lv, &device)? else {
            return Ok(());
        };
        let existed = self.exists(&device);
        self.load(&device, &table)?;
        if existed {
            self.exec("activate", &device, &["resume", &device], None)?;
        }
        info!("Activated {}", device);
        Ok(())
    }

    fn deactivate(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<()> {
        let device = dm_name(&vg.name, &vg.lv(lv)?.name);
        if !self.exists(&device) {
            debug!("{} is not active", device);
            return Ok(());
        }
        self.exec("deactivate", &device, &["remove", &device], None)?;
        info!("Deactivated {}", device);
        Ok(())
    }

    fn cache_policy(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<CachePolicy> {
        let device = dm_name(&vg.name, &vg.lv(lv)?.name);
        Ok(self.status(&device)?.policy)
    }

    fn cache_block_info(&mut self, vg: &VolumeGroup, lv: LvId) -> LvCacheResult<CacheBlockInfo> {
        let device = dm_name(&vg.name, &vg.lv(lv)?.name);
        Ok(self.status(&device)?.blocks)
    }

    fn backend_name(&self) -> &'static str {
        "dmsetup"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{create_cache, update_and_reload, TxPhase};
    use crate::context::CommandContext;
    use crate::device::Simulated;
    use crate::metadata::model::{SegType, Segment, DEFAULT_EXTENT_SIZE};
    use crate::metadata::pool::create_cache_pool;
    use crate::metadata::store::FileStore;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Stand-in dmsetup that logs its arguments and the tables it receives.
    /// `info` fails for the devices listed as missing.
    struct FakeDmsetup {
        dir: TempDir,
    }

    impl FakeDmsetup {
        fn new(missing: &[&str]) -> Self {
            let dir = TempDir::new().unwrap();
            let log = dir.path().join("calls.log");
            let tables = dir.path().join("tables");
            let script = format!(
                "#!/bin/sh\n\
                 echo \"$*\" >> '{log}'\n\
                 case \"$1\" in\n\
                 info) case ' {missing} ' in *\" $2 \"*) exit 1 ;; esac ;;\n\
                 load|create) cat >> '{tables}' ;;\n\
                 esac\n\
                 exit 0\n",
                log = log.display(),
                tables = tables.display(),
                missing = missing.join(" "),
            );
            write_script(&dir.path().join("dmsetup"), &script);

            // The pool itself maps through its sub-LVs and gets no device.
            let generator = "#!/bin/sh\n\
                             cat > /dev/null\n\
                             case \"$2\" in fast) exit 0 ;; esac\n\
                             echo \"0 8 $2-table\"\n";
            write_script(&dir.path().join("tablegen"), generator);
            Self { dir }
        }

        fn dmsetup(&self, with_generator: bool) -> Dmsetup {
            let generator = with_generator.then(|| self.dir.path().join("tablegen"));
            Dmsetup::new(self.dir.path().join("dmsetup")).with_table_generator(generator)
        }

        fn calls(&self) -> Vec<String> {
            fs::read_to_string(self.dir.path().join("calls.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        /// Calls other than existence checks
        fn actions(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|call| !call.starts_with("info "))
                .collect()
        }

        fn tables(&self) -> String {
            fs::read_to_string(self.dir.path().join("tables")).unwrap_or_default()
        }
    }

    fn write_script(path: &Path, body: &str) {
        fs::write(path, body).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// vg0 with `data` cached by `fast`; data_corig is new
    fn cached_group() -> (VolumeGroup, VolumeGroup, LvId) {
        let mut vg = VolumeGroup::new("vg0", DEFAULT_EXTENT_SIZE).unwrap();
        let pool = create_cache_pool(&mut vg, "fast", 16, 1, "ssd0", CachePolicy::new("smq")).unwrap();
        let data = vg.create_linear_lv("data", 64, "hdd0").unwrap();
        let live = vg.clone();
        let ctx = CommandContext::new(Box::new(Simulated::new()), Box::new(FileStore::new("/nonexistent")));
        create_cache(&ctx, &mut vg, pool, data).unwrap();
        (vg, live, data)
    }

    #[test]
    fn virtual_table_covers_every_segment() {
        let mut vg = VolumeGroup::new("vg0", DEFAULT_EXTENT_SIZE).unwrap();
        let shell = vg.add_lv("shell", []).unwrap();
        vg.append_segment(shell, Segment::new(SegType::Error, 2)).unwrap();
        vg.append_segment(shell, Segment::new(SegType::Zero, 1)).unwrap();

        let table = virtual_table(&vg, shell, "vg0-shell").unwrap();
        assert_eq!(table, "0 16384 error\n16384 8192 zero\n");
    }

    #[test]
    fn virtual_table_rejects_data_segments() {
        let mut vg = VolumeGroup::new("vg0", DEFAULT_EXTENT_SIZE).unwrap();
        let data = vg.create_linear_lv("data", 4, "pv0").unwrap();
        let err = virtual_table(&vg, data, "vg0-data").unwrap_err();
        assert!(matches!(err, LvCacheError::TableUnsupported { ref segtype, .. } if segtype == "linear"));
    }

    #[test]
    fn missing_binary_reports_command_failure() {
        let mut dm = Dmsetup::new("/nonexistent/dmsetup");
        let mut vg = VolumeGroup::new("vg0", DEFAULT_EXTENT_SIZE).unwrap();
        let data = vg.create_linear_lv("data", 4, "pv0").unwrap();
        let err = dm.suspend(&vg, data).unwrap_err();
        assert!(matches!(err, LvCacheError::CommandFailed { .. }));
    }

    #[test]
    fn preload_without_generator_leaves_kernel_alone() {
        let fake = FakeDmsetup::new(&[]);
        let mut dm = fake.dmsetup(false);
        let (vg, _, data) = cached_group();

        let err = dm.preload(&vg, data).unwrap_err();
        assert!(matches!(err, LvCacheError::TableUnsupported { .. }));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn preload_loads_the_stack_bottom_up() {
        let fake = FakeDmsetup::new(&["vg0-data_corig"]);
        let mut dm = fake.dmsetup(true);
        let (vg, _, data) = cached_group();

        dm.preload(&vg, data).unwrap();

        assert_eq!(
            fake.actions(),
            vec![
                "load vg0-fast_cmeta",
                "load vg0-fast_cdata",
                "create vg0-data_corig",
                "load vg0-data",
            ]
        );
        assert!(fake.tables().contains("0 8 data-table"));
        assert!(fake.tables().contains("0 8 data_corig-table"));
    }

    #[test]
    fn suspend_goes_top_down_and_resume_bottom_up() {
        let fake = FakeDmsetup::new(&["vg0-fast"]);
        let mut dm = fake.dmsetup(true);
        let (vg, _, data) = cached_group();

        dm.suspend(&vg, data).unwrap();
        dm.resume(&vg, data).unwrap();

        assert_eq!(
            fake.actions(),
            vec![
                "suspend vg0-data",
                "suspend vg0-data_corig",
                "suspend vg0-fast_cdata",
                "suspend vg0-fast_cmeta",
                "resume vg0-fast_cmeta",
                "resume vg0-fast_cdata",
                "resume vg0-data_corig",
                "resume vg0-data",
            ]
        );
    }

    #[test]
    fn reload_loads_new_table_before_suspending() {
        let fake = FakeDmsetup::new(&["vg0-fast", "vg0-data_corig"]);
        let temp = TempDir::new().unwrap();
        let mut ctx = CommandContext::new(
            Box::new(fake.dmsetup(true)),
            Box::new(FileStore::new(temp.path())),
        );
        let (mut vg, live, data) = cached_group();

        update_and_reload(&mut ctx, &mut vg, &live, data).unwrap();

        let actions = fake.actions();
        let position = |call: &str| actions.iter().position(|a| a == call).unwrap();
        assert!(position("load vg0-data") < position("suspend vg0-data"));
        assert!(position("suspend vg0-data") < position("resume vg0-data"));
        assert_eq!(actions.last().map(String::as_str), Some("resume vg0-data"));
    }

    #[test]
    fn reload_without_generator_fails_before_suspend() {
        let fake = FakeDmsetup::new(&[]);
        let temp = TempDir::new().unwrap();
        let mut ctx = CommandContext::new(
            Box::new(fake.dmsetup(false)),
            Box::new(FileStore::new(temp.path())),
        );
        let (mut vg, live, data) = cached_group();

        let err = update_and_reload(&mut ctx, &mut vg, &live, data).unwrap_err();
        assert!(matches!(
            err,
            LvCacheError::Transaction {
                phase: TxPhase::Preload,
                ..
            }
        ));
        assert!(fake.actions().is_empty());
    }

    #[test]
    fn activate_builds_error_table_for_missing_device() {
        let fake = FakeDmsetup::new(&["vg0-shell"]);
        let mut dm = fake.dmsetup(false);
        let mut vg = VolumeGroup::new("vg0", DEFAULT_EXTENT_SIZE).unwrap();
        let shell = vg.add_lv("shell", []).unwrap();
        vg.append_segment(shell, Segment::new(SegType::Error, 2)).unwrap();

        dm.activate(&vg, shell).unwrap();

        assert_eq!(fake.actions(), vec!["create vg0-shell"]);
        assert_eq!(fake.tables(), "0 16384 error\n");
    }
}
