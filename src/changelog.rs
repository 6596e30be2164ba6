//! Changelog extraction interface.
//!
//! Computing the changelog is an external concern: the engine only defines
//! the request (a module location, a time window, and, when an update just
//! ran, the list of changed files that makes the extraction cheap) and one
//! implementation that shells out to `cvs log`. Changelog failure never
//! fails a build; the orchestrator demotes it to a warning and an empty
//! changelog.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::command::CvsRunner;
use crate::config::JobConfig;
use crate::error::SyncError;
use crate::location::ModuleLocation;

/// Keep the command line short enough for the system call limit: above
/// this many changed files the per-file restriction is dropped.
const MAX_CHANGED_FILES: usize = 100;

// ---------------------------------------------------------------------------
// Request / interface
// ---------------------------------------------------------------------------

/// One module location's slice of the changelog window.
#[derive(Debug)]
pub struct ChangelogRequest<'a> {
    /// The resolved location to extract history for.
    pub location: &'a ModuleLocation,
    /// The directory to run the extraction from (the location's local dir).
    pub dir: PathBuf,
    /// Start of the window: the previous build's timestamp.
    pub start: DateTime<Utc>,
    /// End of the window: this build's timestamp.
    pub end: DateTime<Utc>,
    /// Changed files from the update that just ran, already filtered to
    /// ones whose directory still exists. `None` means "unknown, scan the
    /// full module".
    pub files: Option<Vec<String>>,
    /// Whether the job runs in flatten mode (affects the full-scan
    /// fallback).
    pub flatten: bool,
}

/// A source of changelog data for one module location.
pub trait ChangelogSource {
    /// Write this location's changelog for the window into `out`.
    ///
    /// # Errors
    /// Any error is demoted to a warning by the caller; the build proceeds
    /// with an empty changelog.
    fn write_changelog(
        &self,
        request: &ChangelogRequest<'_>,
        out: &mut dyn Write,
    ) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// cvs log implementation
// ---------------------------------------------------------------------------

/// Extracts history by running `cvs log` bounded to the window.
#[derive(Debug)]
pub struct CvsLog {
    runner: CvsRunner,
    can_use_update: bool,
}

impl CvsLog {
    /// Build the extractor from the job configuration.
    #[must_use]
    pub fn new(config: &JobConfig) -> Self {
        Self {
            runner: CvsRunner::new(config),
            can_use_update: config.can_use_update,
        }
    }

    /// The root to pass to `cvs log`.
    ///
    /// Logs of built source trees are unreliable with the local access
    /// method (<https://savannah.nongnu.org/bugs/index.php?15223>), so when
    /// incremental updates are on, local roots are rewritten to `:fork:`.
    fn log_root(&self, cvsroot: &str) -> String {
        if self.can_use_update && cvsroot.starts_with('/') {
            format!(":fork:{cvsroot}")
        } else if self.can_use_update && cvsroot.starts_with(":local:") {
            format!(":fork:{}", &cvsroot[":local:".len()..])
        } else {
            cvsroot.to_owned()
        }
    }
}

impl ChangelogSource for CvsLog {
    fn write_changelog(
        &self,
        request: &ChangelogRequest<'_>,
        out: &mut dyn Write,
    ) -> Result<(), SyncError> {
        let mut args: Vec<String> = vec![
            "-q".to_owned(),
            "-d".to_owned(),
            self.log_root(request.location.cvsroot()),
            "log".to_owned(),
            "-S".to_owned(),
            "-d".to_owned(),
            format!(
                "{}<{}",
                request.start.format("%Y-%m-%d %H:%M:%S %z"),
                request.end.format("%Y-%m-%d %H:%M:%S %z")
            ),
        ];
        // A tag pins the revision completely; a branch restricts the log.
        if !request.location.is_tag() {
            if let Some(branch) = request.location.branch() {
                args.push(format!("-r{branch}"));
            }
        }
        match &request.files {
            Some(files) => args.extend(files.iter().cloned()),
            None => {
                if !request.flatten {
                    args.extend(request.location.normalized_modules());
                }
            }
        }

        let mut sink: Vec<u8> = Vec::new();
        let (code, stdout) = self.runner.run_captured(&args, &request.dir, &mut sink)?;
        if code != 0 {
            return Err(SyncError::Subprocess {
                command: self.runner.render(&args),
                exit_code: Some(code),
            });
        }
        out.write_all(stdout.as_bytes())?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shared helpers for the orchestrator
// ---------------------------------------------------------------------------

/// Restrict the changed-file list for one location's extraction.
///
/// Files whose parent directory no longer exists would make `cvs log` die,
/// so they are filtered out (their history is lost from this changelog).
/// Above [`MAX_CHANGED_FILES`] the restriction is dropped entirely.
#[must_use]
pub fn restrict_files(
    changed_files: Option<&[String]>,
    processing_dir: &Path,
) -> Option<Vec<String>> {
    let files = changed_files?;
    if files.len() >= MAX_CHANGED_FILES {
        return None;
    }
    Some(
        files
            .iter()
            .filter(|f| {
                processing_dir
                    .join(f)
                    .parent()
                    .is_some_and(Path::exists)
            })
            .cloned()
            .collect(),
    )
}
