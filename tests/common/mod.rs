//! Shared helpers for the integration tests: a scripted stand-in for the
//! cvs executable and CVS metadata fixtures.
#![cfg(unix)]
#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cvssync::changelog::{ChangelogRequest, ChangelogSource};
use cvssync::config::JobConfig;
use cvssync::error::SyncError;

/// Write an executable shell script standing in for cvs. Every invocation
/// appends its argument line to `invocations.log` next to the script, then
/// runs `body`.
pub fn fake_cvs(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt as _;

    let log = dir.join("invocations.log");
    let script = format!("#!/bin/sh\nprintf '%s\\n' \"$*\" >> \"{}\"\n{body}\n", log.display());
    let path = dir.join("fake-cvs");
    std::fs::write(&path, script).expect("write fake cvs");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake cvs");
    path
}

/// The argument lines of every fake-cvs invocation so far.
pub fn invocations(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("invocations.log"))
        .map(|s| s.lines().map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Lay down minimal CVS control metadata in `dir`.
pub fn write_cvs_meta(dir: &Path, root: &str, tag: Option<&str>) {
    let cvs = dir.join("CVS");
    std::fs::create_dir_all(&cvs).expect("create CVS dir");
    std::fs::write(cvs.join("Root"), format!("{root}\n")).expect("write Root");
    std::fs::write(cvs.join("Entries"), "/app.c/1.1/Mon Jan 21 23:30:44 2008//\n")
        .expect("write Entries");
    if let Some(tag) = tag {
        std::fs::write(cvs.join("Tag"), format!("{tag}\n")).expect("write Tag");
    }
}

/// Parse a job config whose `cvs_exe` points at the fake script.
pub fn config_with_exe(toml: &str, exe: &Path) -> JobConfig {
    let mut config = JobConfig::parse(toml).expect("test config must parse");
    config.cvs_exe = exe.display().to_string();
    config
}

/// A changelog source that records which locations it was asked about and
/// writes a fixed marker line.
#[derive(Default)]
pub struct RecordingChangelog {
    pub requests: Mutex<Vec<String>>,
}

impl ChangelogSource for RecordingChangelog {
    fn write_changelog(
        &self,
        request: &ChangelogRequest<'_>,
        out: &mut dyn Write,
    ) -> Result<(), SyncError> {
        self.requests
            .lock()
            .expect("lock")
            .push(request.location.module().to_owned());
        out.write_all(b"changelog-entry\n")?;
        Ok(())
    }
}

/// A changelog source that always fails, for exercising the demotion path.
pub struct FailingChangelog;

impl ChangelogSource for FailingChangelog {
    fn write_changelog(
        &self,
        _request: &ChangelogRequest<'_>,
        _out: &mut dyn Write,
    ) -> Result<(), SyncError> {
        Err(SyncError::config("changelog backend unavailable"))
    }
}
