//! Sticky-date cleanup of CVS control metadata.
//!
//! A date-restricted checkout leaves a sticky date like
//! `D2008.01.21.23.30.44` as the trailing field of each `CVS/Entries` line,
//! which would pin every later update to that instant. After a checkout or
//! update the affected tree is walked and those trailing fields are
//! truncated, so subsequent updates track the moving target again.
//!
//! Cleanup is best-effort housekeeping: unreadable or unwritable metadata
//! is logged and skipped, and never fails the build. Rewrites are atomic
//! (write-temp-then-rename) so a crash mid-write cannot corrupt metadata.

use std::io::Write as _;
use std::path::Path;
use std::sync::OnceLock;
use std::thread::JoinHandle;

use regex::Regex;

fn sticky_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^D\d{4}\.\d{2}\.\d{2}\.\d{2}\.\d{2}\.\d{2}$").expect("static pattern")
    })
}

/// Recursively strip sticky dates from `CVS/Entries` files under `dir`.
///
/// A directory without `CVS/Entries` is not CVS-controlled; its subtree is
/// skipped entirely.
pub fn clean_sticky_dates(dir: &Path) {
    let entries = dir.join("CVS").join("Entries");
    let contents = match std::fs::read_to_string(&entries) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            // Entries may contain more than we know of; leave it as is.
            tracing::warn!(path = %entries.display(), error = %e, "failed to read CVS/Entries");
            return;
        }
    };

    if let Some(rewritten) = strip_sticky_dates(&contents) {
        if let Err(e) = write_atomically(&entries, &rewritten) {
            tracing::warn!(path = %entries.display(), error = %e, "failed to rewrite CVS/Entries");
        }
    }

    let children = match std::fs::read_dir(dir) {
        Ok(children) => children,
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "failed to list directory");
            return;
        }
    };
    for child in children.flatten() {
        if child.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            clean_sticky_dates(&child.path());
        }
    }
}

/// Truncate every trailing sticky-date field. Returns the rewritten
/// contents, or `None` when nothing changed.
fn strip_sticky_dates(contents: &str) -> Option<String> {
    let mut out = String::with_capacity(contents.len());
    let mut changed = false;
    for line in contents.lines() {
        match line.rfind('/') {
            Some(idx) if sticky_date().is_match(line[idx + 1..].trim()) => {
                out.push_str(&line[..=idx]);
                changed = true;
            }
            // Lines without a separator (or without a sticky date) stay
            // exactly as they are.
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    changed.then_some(out)
}

fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("entries file has no parent directory"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Run cleanup on a worker thread so it can overlap with output parsing of
/// the same module's update result. Join the handle before the next module
/// starts.
#[must_use]
pub fn spawn_cleanup(dir: std::path::PathBuf) -> JoinHandle<()> {
    std::thread::spawn(move || clean_sticky_dates(&dir))
}
