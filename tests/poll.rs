//! Polling comparison against a scripted cvs executable.
#![cfg(unix)]

mod common;

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;

use common::{RecordingChangelog, config_with_exe, fake_cvs, invocations, write_cvs_meta};
use cvssync::poll::{PollingResult, compare_remote_revision};
use cvssync::sync::{BuildContext, Syncer};

struct Fixture {
    _root: tempfile::TempDir,
    workspace: PathBuf,
    script_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let workspace = root.path().join("ws");
        let script_dir = root.path().join("bin");
        std::fs::create_dir_all(&workspace).expect("mkdir");
        std::fs::create_dir_all(&script_dir).expect("mkdir");
        Self {
            _root: root,
            workspace,
            script_dir,
        }
    }

    fn context(&self) -> BuildContext {
        BuildContext {
            workspace: self.workspace.clone(),
            build_dir: PathBuf::new(),
            changelog_file: PathBuf::new(),
            build_time: Utc::now(),
            previous_build_time: None,
            params: HashMap::new(),
        }
    }
}

fn job(excluded_regions: &str) -> String {
    let excluded = if excluded_regions.is_empty() {
        String::new()
    } else {
        format!("excluded_regions = '''{excluded_regions}'''\n")
    };
    format!(
        r#"
can_use_update = true
{excluded}
[[location]]
cvsroot = ":local:/cvs"
module = "mod"
"#
    )
}

#[test]
fn inconsistent_workspace_builds_now_without_running_cvs() {
    let fx = Fixture::new();
    // No CVS metadata at all.
    let exe = fake_cvs(&fx.script_dir, "exit 0");
    let config = config_with_exe(&job(""), &exe);
    let changelog = RecordingChangelog::default();
    let syncer = Syncer::new(&config, &changelog);

    let mut sink: Vec<u8> = Vec::new();
    let result = compare_remote_revision(&syncer, &fx.context(), &mut sink).expect("poll");

    assert_eq!(result, PollingResult::BuildNow);
    assert!(invocations(&fx.script_dir).is_empty());
    assert!(String::from_utf8_lossy(&sink).contains("inconsistent"));
}

#[test]
fn changes_trigger_a_build_and_the_update_is_a_dry_run() {
    let fx = Fixture::new();
    write_cvs_meta(&fx.workspace, ":local:/cvs", None);
    let exe = fake_cvs(&fx.script_dir, "printf 'M src/a.c\\n'");
    let config = config_with_exe(&job(""), &exe);
    let changelog = RecordingChangelog::default();
    let syncer = Syncer::new(&config, &changelog);

    let mut sink: Vec<u8> = Vec::new();
    let result = compare_remote_revision(&syncer, &fx.context(), &mut sink).expect("poll");

    assert_eq!(result, PollingResult::BuildNow);
    let calls = invocations(&fx.script_dir);
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains("-n update"));
}

#[test]
fn no_output_means_no_changes() {
    let fx = Fixture::new();
    write_cvs_meta(&fx.workspace, ":local:/cvs", None);
    let exe = fake_cvs(&fx.script_dir, "exit 0");
    let config = config_with_exe(&job(""), &exe);
    let changelog = RecordingChangelog::default();
    let syncer = Syncer::new(&config, &changelog);

    let mut sink: Vec<u8> = Vec::new();
    let result = compare_remote_revision(&syncer, &fx.context(), &mut sink).expect("poll");

    assert_eq!(result, PollingResult::NoChanges);
}

#[test]
fn partially_excluded_changes_still_build() {
    let fx = Fixture::new();
    write_cvs_meta(&fx.workspace, ":local:/cvs", None);
    let exe = fake_cvs(&fx.script_dir, "printf 'M a.html\\nM b.xml\\n'");
    let config = config_with_exe(&job(r".*\.xml"), &exe);
    let changelog = RecordingChangelog::default();
    let syncer = Syncer::new(&config, &changelog);

    let mut sink: Vec<u8> = Vec::new();
    let result = compare_remote_revision(&syncer, &fx.context(), &mut sink).expect("poll");

    // a.html matches no exclusion pattern.
    assert_eq!(result, PollingResult::BuildNow);
}

#[test]
fn fully_excluded_changes_mean_no_changes() {
    let fx = Fixture::new();
    write_cvs_meta(&fx.workspace, ":local:/cvs", None);
    let exe = fake_cvs(&fx.script_dir, "printf 'M a.html\\nM b.xml\\n'");
    let config = config_with_exe(&job(".*\\.html$\n.*\\.xml$"), &exe);
    let changelog = RecordingChangelog::default();
    let syncer = Syncer::new(&config, &changelog);

    let mut sink: Vec<u8> = Vec::new();
    let result = compare_remote_revision(&syncer, &fx.context(), &mut sink).expect("poll");

    assert_eq!(result, PollingResult::NoChanges);
}

#[test]
fn polling_does_not_mutate_the_workspace() {
    let fx = Fixture::new();
    write_cvs_meta(&fx.workspace, ":local:/cvs", None);
    let sticky = "/app.c/1.1/Mon Jan 21 23:30:44 2008//D2008.01.21.23.30.44\n";
    std::fs::write(fx.workspace.join("CVS").join("Entries"), sticky).expect("write");
    let exe = fake_cvs(&fx.script_dir, "printf 'M a.c\\n'");
    let config = config_with_exe(&job(""), &exe);
    let changelog = RecordingChangelog::default();
    let syncer = Syncer::new(&config, &changelog);

    let mut sink: Vec<u8> = Vec::new();
    compare_remote_revision(&syncer, &fx.context(), &mut sink).expect("poll");

    // The sticky date survives a poll: only real updates clean it.
    let entries =
        std::fs::read_to_string(fx.workspace.join("CVS").join("Entries")).expect("read");
    assert_eq!(entries, sticky);
}

#[test]
fn failed_dry_run_does_not_trigger_a_build() {
    let fx = Fixture::new();
    write_cvs_meta(&fx.workspace, ":local:/cvs", None);
    let exe = fake_cvs(&fx.script_dir, "exit 1");
    let config = config_with_exe(&job(""), &exe);
    let changelog = RecordingChangelog::default();
    let syncer = Syncer::new(&config, &changelog);

    let mut sink: Vec<u8> = Vec::new();
    let result = compare_remote_revision(&syncer, &fx.context(), &mut sink).expect("poll");

    assert_eq!(result, PollingResult::NoChanges);
}
