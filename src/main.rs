use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use cvssync::changelog::CvsLog;
use cvssync::config::JobConfig;
use cvssync::poll::{self, PollingResult};
use cvssync::sync::{BuildContext, Syncer};
use cvssync::telemetry;

/// CVS workspace synchronization for CI builds
///
/// cvssync keeps a build workspace in sync with a CVS repository and
/// reports whether anything changed since the last build. It drives the
/// external `cvs` executable; it is not a CVS protocol implementation.
///
/// WORKFLOW:
///
///   1. Describe the job in a TOML file (locations, branch/tag, update
///      policy, exclusion patterns).
///   2. Before a build:   cvssync -c job.toml checkout --workspace ws \
///      --build-dir builds/42
///   3. Between builds:   cvssync -c job.toml poll --workspace ws
///      (prints `build-now` or `no-changes`)
///
/// The cvs output is mirrored to stdout; cvssync's own logs go to stderr.
#[derive(Parser)]
#[command(name = "cvssync")]
#[command(version, about)]
#[command(after_help = "See 'cvssync <command> --help' for more information on a specific command.")]
struct Cli {
    /// Path to the job configuration file
    #[arg(short, long, global = true, default_value = "job.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the workspace for a build
    ///
    /// Updates or checks out every configured module location, archives
    /// the CVS metadata for later tagging, and writes the changelog.
    /// Fails fast on the first module that cannot be synchronized.
    Checkout {
        /// Workspace root directory
        #[arg(short, long)]
        workspace: PathBuf,

        /// Build artifact directory (receives workspace.zip)
        #[arg(short, long)]
        build_dir: PathBuf,

        /// Changelog output file (default: <build-dir>/changelog.txt)
        #[arg(long)]
        changelog: Option<PathBuf>,

        /// This build's timestamp, RFC 3339 (default: now)
        #[arg(long)]
        build_time: Option<String>,

        /// The previous build's timestamp, RFC 3339 (bounds the changelog)
        #[arg(long)]
        previous_build_time: Option<String>,

        /// Build parameter, `name=value`; substituted into `${name}`
        /// placeholders (repeatable)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
    },

    /// Ask whether a build should be triggered
    ///
    /// Runs a dry-run update per module location without mutating the
    /// workspace and prints `build-now` or `no-changes`.
    Poll {
        /// Workspace root directory
        #[arg(short, long)]
        workspace: PathBuf,

        /// Build parameter, `name=value` (repeatable)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
    },

    /// Check that the configured cvs executable works
    ///
    /// Runs `cvs --version` and prints the result.
    Doctor,
}

fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Checkout {
            workspace,
            build_dir,
            changelog,
            build_time,
            previous_build_time,
            params,
        } => checkout(
            &cli.config,
            workspace,
            build_dir,
            changelog,
            build_time.as_deref(),
            previous_build_time.as_deref(),
            &params,
        ),
        Commands::Poll { workspace, params } => run_poll(&cli.config, workspace, &params),
        Commands::Doctor => doctor(&cli.config),
    }
}

#[allow(clippy::too_many_arguments)]
fn checkout(
    config_path: &Path,
    workspace: PathBuf,
    build_dir: PathBuf,
    changelog: Option<PathBuf>,
    build_time: Option<&str>,
    previous_build_time: Option<&str>,
    params: &[String],
) -> Result<()> {
    let config = JobConfig::load(config_path)?;
    let changelog_file = changelog.unwrap_or_else(|| build_dir.join("changelog.txt"));
    std::fs::create_dir_all(&build_dir)
        .with_context(|| format!("cannot create build dir {}", build_dir.display()))?;

    let ctx = BuildContext {
        workspace,
        build_dir,
        changelog_file,
        build_time: parse_time(build_time)?.unwrap_or_else(Utc::now),
        previous_build_time: parse_time(previous_build_time)?,
        params: parse_params(params)?,
    };

    let source = CvsLog::new(&config);
    let syncer = Syncer::new(&config, &source);
    let mut sink = std::io::stdout();
    let outcome = syncer.checkout(&ctx, &mut sink)?;

    match &outcome.changed_files {
        Some(files) => println!("synchronized; {} changed file(s)", files.len()),
        None => println!("synchronized via full checkout"),
    }
    println!(
        "taggable from {}",
        outcome.tag_candidate.archive.display()
    );
    Ok(())
}

fn run_poll(config_path: &Path, workspace: PathBuf, params: &[String]) -> Result<()> {
    let config = JobConfig::load(config_path)?;
    let ctx = BuildContext {
        workspace,
        // Polling produces no artifacts; these are never touched.
        build_dir: PathBuf::new(),
        changelog_file: PathBuf::new(),
        build_time: Utc::now(),
        previous_build_time: None,
        params: parse_params(params)?,
    };

    let source = CvsLog::new(&config);
    let syncer = Syncer::new(&config, &source);
    let mut sink = std::io::stdout();
    match poll::compare_remote_revision(&syncer, &ctx, &mut sink)? {
        PollingResult::BuildNow => println!("build-now"),
        PollingResult::NoChanges => println!("no-changes"),
    }
    Ok(())
}

fn doctor(config_path: &Path) -> Result<()> {
    // A missing config file is fine for doctor: fall back to plain `cvs`.
    let cvs_exe = JobConfig::load(config_path)
        .map_or_else(|_| "cvs".to_owned(), |config| config.cvs_exe);

    let output = std::process::Command::new(&cvs_exe)
        .arg("--version")
        .output()
        .with_context(|| format!("cvs executable `{cvs_exe}` could not be run"))?;
    print!("{}", String::from_utf8_lossy(&output.stdout));
    if !output.status.success() {
        bail!(
            "`{cvs_exe} --version` failed with exit code {}",
            output.status.code().unwrap_or(-1)
        );
    }
    println!("cvs executable OK: {cvs_exe}");
    Ok(())
}

fn parse_params(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut params = HashMap::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("invalid parameter `{pair}`: expected name=value");
        };
        params.insert(name.to_owned(), value.to_owned());
    }
    Ok(params)
}

fn parse_time(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("invalid RFC 3339 timestamp `{v}`"))
        })
        .transpose()
}
