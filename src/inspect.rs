//! Workspace state inspection: is an on-disk checkout compatible with the
//! desired root and branch/tag, or does it need to be thrown away?
//!
//! The check is advisory. It only steers the update-vs-checkout decision,
//! so every failure mode (missing metadata, unreadable files, mismatched
//! sticky state) degrades to a human-readable reason string, never an
//! error.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::location::ModuleLocation;

/// Matches a pserver connection string with an embedded password, like
/// `:pserver:uid:pwd@server:/path`.
///
/// Some cvs clients write the password into `CVS/Root` even when the
/// configured root has none, so both sides of the root comparison are
/// stripped before comparing; a password difference must never force a
/// re-checkout.
fn pserver_with_password() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(:pserver:[^@:]+):[^@:]+(@.+)$").expect("static pattern")
    })
}

/// Normalize a root string for comparison: trim, then cut an embedded
/// pserver password. Other access methods are compared verbatim.
#[must_use]
pub fn strip_password(root: &str) -> String {
    let trimmed = root.trim();
    pserver_with_password().captures(trimmed).map_or_else(
        || trimmed.to_owned(),
        |captures| format!("{}{}", &captures[1], &captures[2]),
    )
}

/// Check whether an existing workspace can be updated in place.
///
/// Returns `None` when every module's on-disk metadata is consistent with
/// `location` (update is safe), otherwise the reason a fresh checkout is
/// required. In flatten mode the workspace root is the single module
/// directory; otherwise every normalized module is checked under the
/// location's local dir, first mismatch wins.
#[must_use]
pub fn is_updatable(location: &ModuleLocation, workspace: &Path, flatten: bool) -> Option<String> {
    if flatten {
        return module_reason(workspace, location);
    }
    for module in location.normalized_modules() {
        let dir = workspace.join(location.local_dir()).join(&module);
        if let Some(reason) = module_reason(&dir, location) {
            return Some(reason);
        }
    }
    None
}

/// Check one module directory. `None` means consistent.
fn module_reason(module_dir: &Path, location: &ModuleLocation) -> Option<String> {
    // A file-mode module like "foo/bar.txt" keeps its metadata in "foo/CVS".
    let dir = if module_dir.is_dir() {
        module_dir
    } else {
        module_dir.parent()?
    };

    let cvs = dir.join("CVS");
    if !cvs.exists() {
        return Some(format!("no CVS dir in {}", dir.display()));
    }

    let root_file = cvs.join("Root");
    match first_line(&root_file) {
        Err(e) => return Some(e.to_string()),
        Ok(stored) => {
            if strip_password(&stored) != strip_password(location.cvsroot()) {
                return Some(format!(
                    "{} content mismatch: expected {} but found {}",
                    root_file.display(),
                    location.cvsroot(),
                    stored.trim()
                ));
            }
        }
    }

    let tag_file = cvs.join("Tag");
    if let Some(branch) = location.branch() {
        // The sticky marker letters are cvs's own control format: N pins a
        // non-branch tag, T a branch tag.
        let expected = format!("{}{branch}", if location.is_tag() { 'N' } else { 'T' });
        match first_line(&tag_file) {
            Ok(stored) if stored.trim() == expected => None,
            Ok(_) | Err(_) => Some(format!("{} branch mismatch", cvs.display())),
        }
    } else {
        if !tag_file.exists() {
            return None;
        }
        match first_line(&tag_file) {
            Err(e) => Some(e.to_string()),
            // A sticky date on the main line is fine.
            Ok(stored) if stored.starts_with('D') => None,
            Ok(stored) => Some(format!("workspace is on branch {stored}")),
        }
    }
}

fn first_line(path: &Path) -> std::io::Result<String> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents.lines().next().unwrap_or_default().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn location(root: &str, branch: Option<&str>, is_tag: bool) -> ModuleLocation {
        ModuleLocation::new(root, "mod", branch, is_tag, None)
    }

    fn write_meta(dir: &Path, root: &str, tag: Option<&str>) -> PathBuf {
        let cvs = dir.join("CVS");
        fs::create_dir_all(&cvs).expect("create CVS dir");
        fs::write(cvs.join("Root"), format!("{root}\n")).expect("write Root");
        if let Some(tag) = tag {
            fs::write(cvs.join("Tag"), format!("{tag}\n")).expect("write Tag");
        }
        cvs
    }

    #[test]
    fn strip_password_cuts_pserver_password() {
        assert_eq!(
            strip_password(":pserver:me:secret@host:/cvs"),
            ":pserver:me@host:/cvs"
        );
    }

    #[test]
    fn strip_password_leaves_other_methods_alone() {
        assert_eq!(strip_password(":ext:me@host:/cvs"), ":ext:me@host:/cvs");
        assert_eq!(strip_password("/srv/cvs"), "/srv/cvs");
    }

    #[test]
    fn missing_metadata_dir_needs_checkout() {
        let ws = tempfile::tempdir().expect("tempdir");
        let loc = location(":local:/cvs", None, false);
        let reason = is_updatable(&loc, ws.path(), true).expect("reason");
        assert!(reason.contains("no CVS dir"));
    }

    #[test]
    fn matching_root_without_branch_is_updatable() {
        let ws = tempfile::tempdir().expect("tempdir");
        write_meta(ws.path(), ":local:/cvs", None);
        let loc = location(":local:/cvs", None, false);
        assert_eq!(is_updatable(&loc, ws.path(), true), None);
    }

    #[test]
    fn root_mismatch_needs_checkout() {
        let ws = tempfile::tempdir().expect("tempdir");
        write_meta(ws.path(), ":local:/other", None);
        let loc = location(":local:/cvs", None, false);
        let reason = is_updatable(&loc, ws.path(), true).expect("reason");
        assert!(reason.contains("content mismatch"));
    }

    #[test]
    fn roots_differing_only_by_password_are_equal() {
        let ws = tempfile::tempdir().expect("tempdir");
        write_meta(ws.path(), ":pserver:me:hunter2@host:/cvs", None);
        let loc = location(":pserver:me@host:/cvs", None, false);
        assert_eq!(is_updatable(&loc, ws.path(), true), None);
    }

    #[test]
    fn branch_marker_must_match_exactly() {
        let ws = tempfile::tempdir().expect("tempdir");
        write_meta(ws.path(), ":local:/cvs", Some("TB1"));
        let loc = location(":local:/cvs", Some("B1"), false);
        assert_eq!(is_updatable(&loc, ws.path(), true), None);

        let other = location(":local:/cvs", Some("B2"), false);
        let reason = is_updatable(&other, ws.path(), true).expect("reason");
        assert!(reason.contains("branch mismatch"));
    }

    #[test]
    fn tag_marker_uses_n_prefix() {
        let ws = tempfile::tempdir().expect("tempdir");
        write_meta(ws.path(), ":local:/cvs", Some("NREL_1"));
        let loc = location(":local:/cvs", Some("REL_1"), true);
        assert_eq!(is_updatable(&loc, ws.path(), true), None);

        // The same name as a branch expects a T marker.
        let as_branch = location(":local:/cvs", Some("REL_1"), false);
        assert!(is_updatable(&as_branch, ws.path(), true).is_some());
    }

    #[test]
    fn missing_tag_file_is_a_branch_mismatch() {
        let ws = tempfile::tempdir().expect("tempdir");
        write_meta(ws.path(), ":local:/cvs", None);
        let loc = location(":local:/cvs", Some("B1"), false);
        let reason = is_updatable(&loc, ws.path(), true).expect("reason");
        assert!(reason.contains("branch mismatch"));
    }

    #[test]
    fn trunk_with_sticky_branch_needs_checkout() {
        let ws = tempfile::tempdir().expect("tempdir");
        write_meta(ws.path(), ":local:/cvs", Some("TB1"));
        let loc = location(":local:/cvs", None, false);
        let reason = is_updatable(&loc, ws.path(), true).expect("reason");
        assert!(reason.contains("on branch"));
    }

    #[test]
    fn trunk_with_sticky_date_is_updatable() {
        let ws = tempfile::tempdir().expect("tempdir");
        write_meta(ws.path(), ":local:/cvs", Some("D2011.06.25.13.30.42"));
        let loc = location(":local:/cvs", None, false);
        assert_eq!(is_updatable(&loc, ws.path(), true), None);
    }

    #[test]
    fn non_flatten_checks_every_module() {
        let ws = tempfile::tempdir().expect("tempdir");
        let a = ws.path().join("a");
        let b = ws.path().join("b");
        fs::create_dir_all(&a).expect("mkdir");
        fs::create_dir_all(&b).expect("mkdir");
        write_meta(&a, ":local:/cvs", None);
        // b has no metadata → first mismatch wins.
        let loc = ModuleLocation::new(":local:/cvs", "a b", None, false, None);
        let reason = is_updatable(&loc, ws.path(), false).expect("reason");
        assert!(reason.contains("no CVS dir"));

        write_meta(&b, ":local:/cvs", None);
        assert_eq!(is_updatable(&loc, ws.path(), false), None);
    }

    #[test]
    fn file_mode_module_uses_parent_metadata() {
        let ws = tempfile::tempdir().expect("tempdir");
        let dir = ws.path().join("docs");
        fs::create_dir_all(&dir).expect("mkdir");
        write_meta(&dir, ":local:/cvs", None);
        fs::write(dir.join("readme.txt"), "hi").expect("write file");
        let loc = ModuleLocation::new(":local:/cvs", "docs/readme.txt", None, false, None);
        assert_eq!(is_updatable(&loc, ws.path(), false), None);
    }
}
