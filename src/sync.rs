//! The update/checkout orchestrator.
//!
//! One synchronous worker per build. For each resolved module location, in
//! configured order: update in place when incremental mode is on and the
//! workspace is compatible, falling back to a destructive clean checkout
//! when the update subprocess fails; otherwise a direct checkout. Any
//! module's failure aborts the whole operation; no rollback of modules
//! already processed. After all modules succeed the CVS metadata is
//! archived for later tagging and the changelog is computed.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::archive;
use crate::changelog::{ChangelogRequest, ChangelogSource, restrict_files};
use crate::cleanup;
use crate::command::{self, CvsRunner};
use crate::config::JobConfig;
use crate::error::SyncError;
use crate::inspect;
use crate::location::ModuleLocation;
use crate::parse;

// ---------------------------------------------------------------------------
// Build context and outcome
// ---------------------------------------------------------------------------

/// Everything one build contributes to a checkout or poll.
#[derive(Debug)]
pub struct BuildContext {
    /// The workspace root this job syncs into.
    pub workspace: PathBuf,
    /// The build's artifact directory; receives the tagging archive.
    pub build_dir: PathBuf,
    /// Where the changelog artifact is written.
    pub changelog_file: PathBuf,
    /// This build's timestamp. Bounds `-D` date restriction and the
    /// changelog window.
    pub build_time: DateTime<Utc>,
    /// The previous build's timestamp, if any. `None` means there is
    /// nothing to compute a changelog against.
    pub previous_build_time: Option<DateTime<Utc>>,
    /// Build parameters substituted into every location field.
    pub params: HashMap<String, String>,
}

/// Marker recorded on a successful checkout: the build can be tagged later
/// from its metadata archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagCandidate {
    /// The metadata archive backing a later tag application.
    pub archive: PathBuf,
}

/// Result of a successful checkout.
#[derive(Debug)]
pub struct CheckoutOutcome {
    /// Workspace-relative files the update touched. `None` means at least
    /// one module went through a full checkout, so changed-file detection
    /// is unavailable and history scanning must cover the whole window.
    pub changed_files: Option<Vec<String>>,
    /// The build is taggable from this archive.
    pub tag_candidate: TagCandidate,
}

// ---------------------------------------------------------------------------
// Syncer
// ---------------------------------------------------------------------------

/// Drives the external cvs executable for one job.
pub struct Syncer<'a> {
    config: &'a JobConfig,
    runner: CvsRunner,
    changelog: &'a dyn ChangelogSource,
}

impl<'a> Syncer<'a> {
    /// Build a syncer for a validated job configuration.
    #[must_use]
    pub fn new(config: &'a JobConfig, changelog: &'a dyn ChangelogSource) -> Self {
        Self {
            config,
            runner: CvsRunner::new(config),
            changelog,
        }
    }

    /// The job configuration this syncer runs under.
    #[must_use]
    pub const fn config(&self) -> &JobConfig {
        self.config
    }

    /// Synchronize the workspace for one build.
    ///
    /// # Errors
    /// Fails fast on the first module whose checkout (or fallback checkout)
    /// fails, and on an archive write failure. Changelog failure is demoted
    /// to a warning.
    pub fn checkout(
        &self,
        ctx: &BuildContext,
        sink: &mut dyn Write,
    ) -> Result<CheckoutOutcome, SyncError> {
        let flatten = self.config.flatten();
        let resolved: Vec<ModuleLocation> = self
            .config
            .locations
            .iter()
            .map(|location| location.resolve(&ctx.params))
            .collect();

        let mut changed: Option<Vec<String>> = None;
        let mut full_checkout_happened = false;
        for location in &resolved {
            let updatable = self.config.can_use_update
                && inspect::is_updatable(location, &ctx.workspace, flatten).is_none();
            if updatable {
                match self.update(location, false, &ctx.workspace, sink, ctx.build_time)? {
                    Some(files) => changed.get_or_insert_with(Vec::new).extend(files),
                    None => {
                        tracing::warn!(
                            module = location.module(),
                            "update failed; falling back to clean checkout"
                        );
                        self.clean_checkout(location, ctx, sink)?;
                        full_checkout_happened = true;
                    }
                }
            } else {
                self.do_checkout(location, ctx, sink)?;
                full_checkout_happened = true;
            }
        }
        if full_checkout_happened {
            // At least one module has no update output to mine; changed-file
            // detection is unavailable for this build.
            changed = None;
        }

        let archive_path = archive::archive_file(&ctx.build_dir);
        archive::archive_workspace(&ctx.workspace, &resolved, flatten, &archive_path)?;

        self.calc_changelog(ctx, changed.as_deref(), &resolved, flatten, sink);

        Ok(CheckoutOutcome {
            changed_files: changed,
            tag_candidate: TagCandidate {
                archive: archive_path,
            },
        })
    }

    /// Update one location's modules in place and collect the changed
    /// files.
    ///
    /// Returns `Ok(None)` when the update subprocess exits non-zero; the
    /// caller decides whether to fall back to a clean checkout (checkout
    /// path) or move on (polling path). `dry_run` adds `-n` and skips the
    /// sticky-date cleanup, so polling never mutates the workspace.
    ///
    /// # Errors
    /// Only I/O-level failures (the process cannot be spawned or its
    /// output read) are errors.
    pub(crate) fn update(
        &self,
        location: &ModuleLocation,
        dry_run: bool,
        workspace: &Path,
        sink: &mut dyn Write,
        date: DateTime<Utc>,
    ) -> Result<Option<Vec<String>>, SyncError> {
        let flatten = self.config.flatten();
        let args = command::update_args(self.config, location, dry_run, date);
        let mut changed: Vec<String> = Vec::new();

        if flatten {
            let (code, output) = self.runner.run_captured(&args, workspace, sink)?;
            if code != 0 {
                return Ok(None);
            }
            // Clean up the sticky date while the output is parsed.
            let sticky = (!dry_run).then(|| cleanup::spawn_cleanup(workspace.to_owned()));
            parse::parse_update_output("", &output, &mut changed);
            join_cleanup(sticky);
        } else {
            let location_dir = workspace.join(location.local_dir());
            for name in module_names(location, &location_dir) {
                let mut module_args = args.clone();
                let mut run_dir = location_dir.join(&name);
                let mut base = name.clone();
                if !run_dir.is_dir() {
                    // Updating a single file like "foo/bar.txt": run from
                    // "foo" with "bar.txt" as the trailing argument.
                    let file_name = run_dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    module_args.push(file_name);
                    run_dir = run_dir
                        .parent()
                        .map_or_else(|| location_dir.clone(), Path::to_path_buf);
                    if let Some(slash) = base.rfind('/') {
                        if slash > 0 {
                            base.truncate(slash);
                        }
                    }
                }

                let (code, output) = self.runner.run_captured(&module_args, &run_dir, sink)?;
                if code != 0 {
                    return Ok(None);
                }
                let sticky = (!dry_run).then(|| cleanup::spawn_cleanup(run_dir.clone()));
                // Paths become workspace-relative through the module prefix.
                parse::parse_update_output(&format!("{base}/"), &output, &mut changed);
                join_cleanup(sticky);
            }
        }
        Ok(Some(changed))
    }

    /// Destroy the module's target directory contents, then check out
    /// fresh. Used when an in-place update failed.
    fn clean_checkout(
        &self,
        location: &ModuleLocation,
        ctx: &BuildContext,
        sink: &mut dyn Write,
    ) -> Result<(), SyncError> {
        let target = if self.config.flatten() {
            ctx.workspace.clone()
        } else {
            ctx.workspace.join(location.local_dir())
        };
        if let Err(e) = delete_contents(&target) {
            tracing::warn!(path = %target.display(), error = %e, "cannot clean workspace");
            return Err(SyncError::Io(e));
        }
        self.do_checkout(location, ctx, sink)
    }

    /// Direct checkout of one location.
    fn do_checkout(
        &self,
        location: &ModuleLocation,
        ctx: &BuildContext,
        sink: &mut dyn Write,
    ) -> Result<(), SyncError> {
        let flatten = self.config.flatten();
        let workspace_name = ctx
            .workspace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let args =
            command::checkout_args(self.config, location, flatten, &workspace_name, ctx.build_time);
        // Flatten mode re-creates the workspace dir itself, so cvs runs from
        // its parent.
        let run_dir = if flatten {
            ctx.workspace
                .parent()
                .map_or_else(|| ctx.workspace.clone(), Path::to_path_buf)
        } else {
            ctx.workspace.clone()
        };
        std::fs::create_dir_all(&run_dir)?;

        let code = self.runner.run(&args, &run_dir, sink)?;
        if code != 0 {
            return Err(SyncError::Subprocess {
                command: self.runner.render(&args),
                exit_code: Some(code),
            });
        }

        if flatten {
            cleanup::clean_sticky_dates(&ctx.workspace);
        } else {
            let location_dir = ctx.workspace.join(location.local_dir());
            for module in location.normalized_modules() {
                cleanup::clean_sticky_dates(&location_dir.join(module));
            }
        }
        Ok(())
    }

    /// Compute the changelog artifact. Never fails the build: any error is
    /// logged and leaves an empty changelog behind.
    fn calc_changelog(
        &self,
        ctx: &BuildContext,
        changed: Option<&[String]>,
        resolved: &[ModuleLocation],
        flatten: bool,
        sink: &mut dyn Write,
    ) {
        if let Err(e) = self.write_changelog_file(ctx, changed, resolved, flatten, sink) {
            tracing::warn!(error = %e, "changelog computation failed; recording empty changelog");
            if let Err(e) = std::fs::write(&ctx.changelog_file, "") {
                tracing::warn!(
                    path = %ctx.changelog_file.display(),
                    error = %e,
                    "failed to write empty changelog"
                );
            }
        }
    }

    fn write_changelog_file(
        &self,
        ctx: &BuildContext,
        changed: Option<&[String]>,
        resolved: &[ModuleLocation],
        flatten: bool,
        sink: &mut dyn Write,
    ) -> Result<(), SyncError> {
        let no_changes = changed.is_some_and(<[String]>::is_empty);
        let Some(start) = ctx.previous_build_time else {
            // Nothing to compare against.
            writeln!(sink, "$ no changes detected")?;
            std::fs::write(&ctx.changelog_file, "")?;
            return Ok(());
        };
        if no_changes {
            writeln!(sink, "$ no changes detected")?;
            std::fs::write(&ctx.changelog_file, "")?;
            return Ok(());
        }

        writeln!(sink, "$ computing changelog")?;
        let mut out = File::create(&ctx.changelog_file)?;
        for location in resolved {
            let dir = ctx.workspace.join(location.local_dir());
            let request = ChangelogRequest {
                location,
                files: restrict_files(changed, &dir),
                dir,
                start,
                end: ctx.build_time,
                flatten,
            };
            self.changelog.write_changelog(&request, &mut out)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn join_cleanup(handle: Option<std::thread::JoinHandle<()>>) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            tracing::warn!("sticky-date cleanup thread panicked");
        }
    }
}

/// The module names to update for one location: the configured modules
/// plus any existing immediate subdirectory that carries CVS metadata (a
/// project may check out extra modules on its own), except subdirectories
/// that are prefixes of a configured `foo/bar`-style module, because
/// updating the prefix would check out all of `foo/*`.
fn module_names(location: &ModuleLocation, location_dir: &Path) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = location.normalized_modules().into_iter().collect();
    if let Ok(children) = std::fs::read_dir(location_dir) {
        for child in children.flatten() {
            if !child.path().join("CVS").is_dir() {
                continue;
            }
            let top = child.file_name().to_string_lossy().into_owned();
            let prefix = format!("{top}/");
            if names.iter().any(|m| m.starts_with(&prefix)) {
                continue;
            }
            names.insert(top);
        }
    }
    names
}

fn delete_contents(dir: &Path) -> std::io::Result<()> {
    let children = match std::fs::read_dir(dir) {
        Ok(children) => children,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for child in children {
        let child = child?;
        let path = child.path();
        if child.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
