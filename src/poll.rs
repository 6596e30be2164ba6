//! Polling: should a new build be triggered?
//!
//! A dry-run variant of the update path. Nothing in the workspace is
//! mutated; the update output is parsed exactly like a real update's and
//! the changed paths are weighed against the configured exclusion
//! patterns.

use std::io::Write;

use chrono::Utc;
use regex::Regex;

use crate::error::SyncError;
use crate::inspect;
use crate::sync::{BuildContext, Syncer};

/// Outcome of one polling comparison. Errors abort before a result is
/// produced; there is no error value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollingResult {
    /// Something changed (or the workspace is inconsistent): build now.
    BuildNow,
    /// Every module reported no (non-excluded) changes.
    NoChanges,
}

/// Compare the remote repository against the workspace.
///
/// Per location, in configured order: an inconsistent workspace triggers a
/// build immediately (rebuilding from scratch is the safe default); else a
/// dry-run update is parsed for changed files. Changed files trigger a
/// build unless every single one matches at least one exclusion pattern.
/// The first location that qualifies ends the comparison.
///
/// # Errors
/// Returns [`SyncError::Config`] for an invalid exclusion pattern (before
/// any subprocess runs) and [`SyncError::Io`] when the cvs executable
/// cannot be spawned.
pub fn compare_remote_revision(
    syncer: &Syncer<'_>,
    ctx: &BuildContext,
    sink: &mut dyn Write,
) -> Result<PollingResult, SyncError> {
    let config = syncer.config();
    let patterns = config.excluded_patterns()?;
    let flatten = config.flatten();
    let now = Utc::now();

    for location in &config.locations {
        let resolved = location.resolve(&ctx.params);

        if let Some(why) = inspect::is_updatable(&resolved, &ctx.workspace, flatten) {
            writeln!(sink, "Workspace is inconsistent with configuration: {why}")?;
            return Ok(PollingResult::BuildNow);
        }

        let changed = syncer.update(&resolved, true, &ctx.workspace, sink, now)?;
        let Some(changed) = changed else {
            // The dry-run itself failed; this location contributes nothing.
            continue;
        };
        if changed.is_empty() {
            continue;
        }
        if patterns.is_empty() || !all_excluded(&changed, &patterns) {
            return Ok(PollingResult::BuildNow);
        }
    }
    Ok(PollingResult::NoChanges)
}

/// Whether every changed path full-matches at least one exclusion pattern.
fn all_excluded(changed: &[String], patterns: &[Regex]) -> bool {
    changed
        .iter()
        .all(|path| patterns.iter().any(|pattern| pattern.is_match(path)))
}
