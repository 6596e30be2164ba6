//! Archival of CVS control metadata for later tag application.
//!
//! One zip per build, containing only the control files (`CVS/*`), never
//! working-tree content. Re-running a tag command only needs the metadata
//! skeleton, and archiving the whole tree would be wasteful.
//!
//! Which subdirectories are CVS-controlled is read from `CVS/Entries` (plus
//! `Entries.Log` and `Entries.Extra`; see
//! <http://www.monkey.org/openbsd/archive/misc/9607/msg00056.html> for what
//! `Entries.Log` is for); uncontrolled subdirectories are skipped.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::SyncError;
use crate::location::ModuleLocation;

/// Archive path layout placeholder for a module checked out at the default
/// local dir. Keeps two default-dir modules from collapsing onto the same
/// archive path.
pub const TAGGING_SUBDIR: &str = "TAGGING_SUBDIR";

/// The archive's fixed, build-relative file name.
pub const ARCHIVE_FILE_NAME: &str = "workspace.zip";

/// The archive location for a build directory.
#[must_use]
pub fn archive_file(build_dir: &Path) -> PathBuf {
    build_dir.join(ARCHIVE_FILE_NAME)
}

/// Write the metadata archive for a finished checkout.
///
/// Flatten mode archives the workspace root under the single module's name.
/// Otherwise each location's local dir is archived under that dir's name
/// (or [`TAGGING_SUBDIR`] for the default), and locations whose directory
/// never materialized (a module with zero files) are skipped.
///
/// # Errors
/// Returns [`SyncError::Archive`]: later tagging depends on this artifact,
/// so a failed write is build-affecting.
pub fn archive_workspace(
    workspace: &Path,
    locations: &[ModuleLocation],
    flatten: bool,
    archive_path: &Path,
) -> Result<(), SyncError> {
    let archive_err = |detail: String| SyncError::Archive {
        path: archive_path.to_owned(),
        detail,
    };

    let file = File::create(archive_path).map_err(|e| archive_err(e.to_string()))?;
    let mut zip = ZipWriter::new(file);

    if flatten {
        let module = locations
            .first()
            .map(ModuleLocation::normalized_modules)
            .and_then(|modules| modules.into_iter().next())
            .ok_or_else(|| archive_err("no module configured".to_owned()))?;
        archive_dir(workspace, &module, &mut zip, true).map_err(archive_err)?;
    } else {
        for location in locations {
            let dir = workspace.join(location.local_dir());
            if !dir.exists() {
                // A checked-out module that produced zero files.
                continue;
            }
            let rel = if location.has_default_local_dir() {
                TAGGING_SUBDIR
            } else {
                location.local_dir()
            };
            archive_dir(&dir, rel, &mut zip, true).map_err(archive_err)?;
        }
    }

    zip.finish().map_err(|e| archive_err(e.to_string()))?;
    Ok(())
}

/// Recursively archive the CVS control files under `dir`, using `rel` as
/// the path prefix inside the zip.
fn archive_dir(
    dir: &Path,
    rel: &str,
    zip: &mut ZipWriter<File>,
    is_root: bool,
) -> Result<(), String> {
    let mut known = BTreeSet::new();
    for name in ["Entries", "Entries.Log", "Entries.Extra"] {
        parse_entries(&dir.join("CVS").join(name), &mut known)
            .map_err(|e| format!("failed to parse {}/CVS/{name}: {e}", dir.display()))?;
    }
    let has_cvs_dirs = !known.is_empty();
    known.insert("CVS".to_owned());

    let children = std::fs::read_dir(dir).map_err(|_| {
        if is_root {
            format!(
                "no such directory: {}. Did you specify the correct branch? \
                 Perhaps you specified a tag",
                dir.display()
            )
        } else {
            format!(
                "no such directory: {}. Looks like someone is modifying the \
                 workspace concurrently",
                dir.display()
            )
        }
    })?;

    let in_cvs_dir = dir.file_name().is_some_and(|n| n == "CVS");
    for child in children.flatten() {
        let name = child.file_name().to_string_lossy().into_owned();
        let entry_path = format!("{rel}/{name}");
        let path = child.path();
        if path.is_dir() {
            // An uncontrolled subdirectory is skipped, but CVS/* itself has
            // no nested CVS/CVS and must always be descended into.
            if has_cvs_dirs && !known.contains(&name) {
                continue;
            }
            archive_dir(&path, &entry_path, zip, false)?;
        } else if in_cvs_dir {
            // Only the control files themselves go into the archive.
            zip.start_file(&*entry_path, SimpleFileOptions::default())
                .map_err(|e| e.to_string())?;
            let mut reader = BufReader::new(
                File::open(&path).map_err(|e| format!("{}: {e}", path.display()))?,
            );
            std::io::copy(&mut reader, zip).map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

/// Add the file/directory names recorded in one entries file to `known`.
/// A missing file is fine; a malformed line is skipped.
fn parse_entries(path: &Path, known: &mut BTreeSet<String>) -> std::io::Result<()> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for line in contents.lines() {
        if let Some(name) = entry_name(line) {
            known.insert(name.to_owned());
        }
    }
    Ok(())
}

/// The name field of an entries line: the second `/`-separated token, with
/// runs of slashes collapsed (`/app.c/1.5/...` and `D/subdir////` both name
/// their second token).
fn entry_name(line: &str) -> Option<&str> {
    let mut tokens = line.split('/').filter(|t| !t.is_empty());
    if line.starts_with('/') {
        tokens.next()
    } else {
        tokens.nth(1)
    }
}
