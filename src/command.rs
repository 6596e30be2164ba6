//! cvs argument-vector construction and subprocess execution.
//!
//! The external cvs executable is the only thing that touches the
//! repository; everything here either builds the exact argument vector for
//! one invocation or runs it with stdout captured *and* mirrored to a live
//! log sink. The exit code is the sole success signal; stderr is mirrored
//! for humans, never parsed.

use std::io::{Read as _, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};

use crate::config::JobConfig;
use crate::error::SyncError;
use crate::location::ModuleLocation;

// ---------------------------------------------------------------------------
// Argument vectors
// ---------------------------------------------------------------------------

/// Compression flag for a given connection string.
///
/// Local access methods (`/...`, `:local:`, `:fork:`) get no compression
/// flag at all; remote roots get maximum compression.
#[must_use]
pub fn compression(config: &JobConfig, cvsroot: &str) -> Option<&'static str> {
    if config.no_compression {
        return None;
    }
    let local = cvsroot.starts_with('/')
        || cvsroot.starts_with(":local:")
        || cvsroot.starts_with(":fork:");
    if local { None } else { Some("-z3") }
}

/// Format a timestamp the way cvs `-D` expects it: a fixed English,
/// full-precision UTC string like `Wednesday, June 25, 2011 1:30:42 PM UTC`.
#[must_use]
pub fn format_cvs_date(date: DateTime<Utc>) -> String {
    date.format("%A, %B %-d, %Y %-I:%M:%S %p UTC").to_string()
}

/// Append `-r`/`-D` revision restriction flags.
///
/// A tag pins the revision completely, so the date restriction is
/// suppressed; a branch (or the trunk) combines with the build date.
fn push_revision_flags(args: &mut Vec<String>, location: &ModuleLocation, date: DateTime<Utc>) {
    if let Some(branch) = location.branch() {
        args.push("-r".to_owned());
        args.push(branch.to_owned());
    }
    if !location.is_tag() {
        args.push("-D".to_owned());
        args.push(format_cvs_date(date));
    }
}

/// Build the argument vector for `cvs update` (without the executable).
///
/// `-PdC`: prune empty directories, build missing ones, use RCS-compatible
/// date handling. `dry_run` adds `-n` for polling.
#[must_use]
pub fn update_args(
    config: &JobConfig,
    location: &ModuleLocation,
    dry_run: bool,
    date: DateTime<Utc>,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    args.push(if config.verbose { "-t" } else { "-q" }.to_owned());
    if let Some(z) = compression(config, location.cvsroot()) {
        args.push(z.to_owned());
    }
    if config.prevent_line_ending_conversion {
        args.push("--lf".to_owned());
    }
    if dry_run {
        args.push("-n".to_owned());
    }
    args.push("update".to_owned());
    args.push("-PdC".to_owned());
    push_revision_flags(&mut args, location, date);
    args
}

/// Build the argument vector for `cvs checkout` (without the executable),
/// including the module names.
///
/// In flatten mode the command runs from the workspace's parent directory
/// and re-creates the workspace dir itself via `-d <name>`; otherwise `-N`
/// keeps full module paths and a non-default local dir is targeted with
/// `-d <local_dir>`.
#[must_use]
pub fn checkout_args(
    config: &JobConfig,
    location: &ModuleLocation,
    flatten: bool,
    workspace_dir_name: &str,
    date: DateTime<Utc>,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    args.push(if config.verbose { "-t" } else { "-Q" }.to_owned());
    if let Some(z) = compression(config, location.cvsroot()) {
        args.push(z.to_owned());
    }
    if config.prevent_line_ending_conversion {
        args.push("--lf".to_owned());
    }
    args.push("-d".to_owned());
    args.push(location.cvsroot().to_owned());
    args.push("co".to_owned());
    args.push("-P".to_owned());
    if let Some(branch) = location.branch() {
        args.push("-r".to_owned());
        args.push(branch.to_owned());
    }
    if flatten {
        args.push("-d".to_owned());
        args.push(workspace_dir_name.to_owned());
    } else {
        args.push("-N".to_owned());
        if !location.has_default_local_dir() {
            args.push("-d".to_owned());
            args.push(location.local_dir().to_owned());
        }
    }
    if !location.is_tag() {
        args.push("-D".to_owned());
        args.push(format_cvs_date(date));
    }
    args.extend(location.normalized_modules());
    args
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runs the cvs executable with the job's environment.
///
/// The environment carries `CVS_RSH` and `CVS_PASSFILE` when configured,
/// and `CVS_BRANCH` when the job has exactly one location with a branch.
#[derive(Debug)]
pub struct CvsRunner {
    exe: String,
    env: Vec<(String, String)>,
}

impl CvsRunner {
    /// Build a runner from the job configuration.
    #[must_use]
    pub fn new(config: &JobConfig) -> Self {
        let mut env = Vec::new();
        if let Some(rsh) = &config.cvs_rsh {
            env.push(("CVS_RSH".to_owned(), rsh.clone()));
        }
        if let Some(pass) = &config.cvspass_file {
            if !pass.is_empty() {
                env.push(("CVS_PASSFILE".to_owned(), pass.clone()));
            }
        }
        if config.locations.len() == 1 {
            if let Some(branch) = config.locations[0].branch() {
                env.push(("CVS_BRANCH".to_owned(), branch.to_owned()));
            }
        }
        Self {
            exe: config.cvs_exe.clone(),
            env,
        }
    }

    /// The environment pairs injected into every invocation.
    #[must_use]
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Render an invocation for log and error messages.
    #[must_use]
    pub fn render(&self, args: &[String]) -> String {
        let mut s = self.exe.clone();
        for a in args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }

    /// Run cvs in `dir`, mirroring both streams to `sink`, discarding the
    /// captured stdout.
    ///
    /// # Errors
    /// Returns [`SyncError::Io`] when the process cannot be spawned or a
    /// stream cannot be read. A non-zero exit is reported in the returned
    /// code, not as an error.
    pub fn run(
        &self,
        args: &[String],
        dir: &Path,
        sink: &mut dyn Write,
    ) -> Result<i32, SyncError> {
        self.run_captured(args, dir, sink).map(|(code, _)| code)
    }

    /// Run cvs in `dir`, capturing stdout while mirroring it to `sink`.
    ///
    /// stderr is drained concurrently (to avoid pipe deadlock) and mirrored
    /// to `sink` after the command completes. Returns the exit code and the
    /// captured stdout.
    ///
    /// # Errors
    /// Returns [`SyncError::Io`] when the process cannot be spawned or a
    /// stream cannot be read.
    pub fn run_captured(
        &self,
        args: &[String],
        dir: &Path,
        sink: &mut dyn Write,
    ) -> Result<(i32, String), SyncError> {
        let mut child = Command::new(&self.exe)
            .args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
            SyncError::Io(std::io::Error::other("child stdout not captured"))
        })?;
        let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
            SyncError::Io(std::io::Error::other("child stderr not captured"))
        })?;

        let mut captured: Vec<u8> = Vec::new();
        let stderr_buf = std::thread::scope(|scope| -> Result<Vec<u8>, SyncError> {
            let drain = scope.spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr_pipe.read_to_end(&mut buf);
                buf
            });
            let mut chunk = [0_u8; 8192];
            loop {
                let n = stdout_pipe.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                captured.extend_from_slice(&chunk[..n]);
                sink.write_all(&chunk[..n])?;
            }
            Ok(drain.join().unwrap_or_default())
        })?;
        sink.write_all(&stderr_buf)?;

        let status = child.wait()?;
        let code = status.code().unwrap_or(-1);
        if code != 0 {
            tracing::warn!(command = %self.render(args), exit_code = code, "cvs failed");
        }
        Ok((code, String::from_utf8_lossy(&captured).into_owned()))
    }
}
