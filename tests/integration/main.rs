//! Integration tests for lvcache

mod cache_tests;
mod support;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn lvcache() -> Command {
        cargo_bin_cmd!("lvcache")
    }

    /// Workspace with a config that keeps metadata in the tempdir and
    /// uses the simulated device backend
    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = format!(
                "[metadata]\ndir = \"{}\"\n\n[flush]\npoll_interval_secs = 0\n\n[device]\nbackend = \"simulate\"\n",
                dir.path().join("meta").display()
            );
            std::fs::write(dir.path().join("config.toml"), config).unwrap();
            Self { dir }
        }

        fn config(&self) -> std::path::PathBuf {
            self.dir.path().join("config.toml")
        }

        fn meta(&self) -> std::path::PathBuf {
            self.dir.path().join("meta")
        }

        fn cmd(&self) -> Command {
            let mut cmd = lvcache();
            cmd.env("LVCACHE_CONFIG", self.config()).env("CI", "1");
            cmd
        }

        fn run(&self, args: &[&str]) {
            self.cmd().args(args).assert().success();
        }

        /// vg0 with pool `fast` and origin `data`
        fn with_group(self) -> Self {
            self.run(&["vg", "create", "vg0"]);
            self.run(&[
                "lv", "create", "vg0", "fast", "--extents", "16", "--pv", "ssd0", "--type",
                "cache-pool",
            ]);
            self.run(&["lv", "create", "vg0", "data", "--extents", "64", "--pv", "hdd0"]);
            self
        }
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn help_displays() {
        lvcache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("dm-cache"));
    }

    #[test]
    fn version_displays() {
        lvcache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("lvcache"));
    }

    #[test]
    fn config_path_follows_flag() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("backend = \"simulate\""));
    }

    #[test]
    fn config_init_refuses_to_overwrite() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));
    }

    #[test]
    fn show_missing_vg() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["show", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Volume group not found"))
            .stderr(predicate::str::contains("lvcache vg create"));
    }

    #[test]
    fn vg_create_twice_fails() {
        let ws = Workspace::new();
        ws.run(&["vg", "create", "vg0"]);
        ws.cmd()
            .args(["vg", "create", "vg0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
        ws.cmd()
            .args(["vg", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("vg0"));
    }

    #[test]
    fn cache_create_and_remove() {
        let ws = Workspace::new().with_group();

        ws.cmd()
            .args(["cache", "create", "vg0", "--pool", "fast", "--origin", "data"])
            .assert()
            .success()
            .stdout(predicate::str::contains("data_corig"));

        ws.cmd()
            .args(["show", "vg0", "--all", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[data_corig]"));

        let cached = read_json(&ws.meta().join("vg0.json"));
        let seqno_cached = cached["seqno"].as_u64().unwrap();

        ws.cmd()
            .args(["cache", "remove", "vg0", "data", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("no longer cached"));

        ws.cmd()
            .args(["show", "vg0", "--all", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("data_corig").not())
            .stdout(predicate::str::contains("[fast_cdata]"));

        // Policy swap, detach, then the final write of the removal
        let removed = read_json(&ws.meta().join("vg0.json"));
        assert_eq!(removed["seqno"].as_u64().unwrap(), seqno_cached + 3);
        assert!(!ws.meta().join("vg0.json.pending").exists());

        let journal = std::fs::read_to_string(ws.meta().join("journal.log")).unwrap();
        let events: Vec<String> = journal
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
            .map(|entry| entry["event"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            events,
            vec!["vg.created", "lv.created", "lv.created", "cache.created", "cache.removed"]
        );
    }

    #[test]
    fn show_json_reports_cache() {
        let ws = Workspace::new().with_group();
        ws.run(&["cache", "create", "vg0", "--pool", "fast", "--origin", "data"]);

        let output = ws
            .cmd()
            .args(["show", "vg0", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let data = rows
            .as_array()
            .unwrap()
            .iter()
            .find(|row| row["name"] == "data")
            .unwrap();
        assert_eq!(data["type"], "cache");
        assert_eq!(data["pool"], "fast");
        assert_eq!(data["origin"], "data_corig");
    }

    #[test]
    fn cache_remove_on_plain_lv_fails() {
        let ws = Workspace::new().with_group();
        ws.cmd()
            .args(["cache", "remove", "vg0", "data", "--yes"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("data is not a cache LV"));
    }

    #[test]
    fn cache_create_with_busy_pool_fails() {
        let ws = Workspace::new().with_group();
        ws.run(&["lv", "create", "vg0", "logs", "--extents", "8", "--pv", "hdd1"]);
        ws.run(&["cache", "create", "vg0", "--pool", "fast", "--origin", "data"]);

        ws.cmd()
            .args(["cache", "create", "vg0", "--pool", "fast", "--origin", "logs"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already in use by data"));
    }

    #[test]
    fn lv_remove_pool_after_detach() {
        let ws = Workspace::new().with_group();
        ws.run(&["cache", "create", "vg0", "--pool", "fast", "--origin", "data"]);
        ws.cmd()
            .args(["lv", "remove", "vg0", "fast"])
            .assert()
            .failure();

        ws.run(&["cache", "remove", "vg0", "data", "--yes"]);
        ws.run(&["lv", "remove", "vg0", "fast"]);
        ws.cmd()
            .args(["show", "vg0", "--all", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("fast").not());
    }
}
