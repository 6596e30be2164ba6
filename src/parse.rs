//! Parsing of `cvs update` output into a changed-file list.
//!
//! Kept as a single pure function so it is testable without spawning a
//! process. See <http://www.network-theory.co.uk/docs/cvsmanual/cvs_153.html>
//! for the output format; `?` lines are ignored because those files are not
//! in the repository.

use std::sync::OnceLock;

use regex::Regex;

fn update_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[UPARMC] (.+)$").expect("static pattern"))
}

fn removal_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^cvs (?:server|update): `?(.+?)'? is no longer in the repository$")
            .expect("static pattern")
    })
}

/// Extract workspace-relative changed paths from captured update output.
///
/// Each matched path is prefixed with `base` (the module path plus a
/// trailing slash, or `""` in flatten mode) so the result is relative to
/// the workspace root rather than the per-module invocation directory.
/// Unmatched lines are ignored.
pub fn parse_update_output(base: &str, output: &str, result: &mut Vec<String>) {
    for line in output.lines() {
        if let Some(captures) = update_line().captures(line) {
            result.push(format!("{base}{}", &captures[1]));
            continue;
        }
        if let Some(captures) = removal_line().captures(line) {
            result.push(format!("{base}{}", &captures[1]));
        }
    }
}
