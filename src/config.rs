//! Job configuration (`job.toml`).
//!
//! Defines the typed configuration for one CI job's CVS synchronization:
//! the path to the cvs executable, credential/transport settings, the
//! module locations, and the polling exclusion patterns.
//!
//! Two schema versions exist. Version 2 (current) carries a `[[location]]`
//! list. Version 1 predates multi-location support and stores a single
//! `cvsroot`/`module`/`branch`/`is_tag` at the top level; it is migrated to
//! the current model once at load time, so the live code path only ever
//! sees version-2 data.

use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::error::SyncError;
use crate::location::ModuleLocation;

/// Shape check for `:pserver:` / `:ext:` style connection strings.
///
/// CVSROOT syntax is only loosely defined; this matches the commonly valid
/// `:method:user[:password]@host:[port:]/path` form and is applied only to
/// the access methods that use it.
const ROOT_SHAPE: &str = r"^:(ext|extssh|pserver):[^@:]+(:[^@:]*)?@[^:]+:(\d+:)?.+$";

// ---------------------------------------------------------------------------
// Raw schema (serde)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_version")]
    version: u32,

    #[serde(default = "default_cvs_exe")]
    cvs_exe: String,

    #[serde(default)]
    cvspass_file: Option<String>,

    #[serde(default)]
    cvs_rsh: Option<String>,

    #[serde(default)]
    no_compression: bool,

    #[serde(default)]
    can_use_update: bool,

    #[serde(default)]
    prevent_line_ending_conversion: bool,

    #[serde(default)]
    legacy: bool,

    #[serde(default)]
    verbose: bool,

    #[serde(default)]
    excluded_regions: Option<String>,

    #[serde(default, rename = "location")]
    locations: Vec<RawLocation>,

    // Version-1 fields, consumed by the migration step.
    #[serde(default)]
    cvsroot: Option<String>,
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    is_tag: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLocation {
    cvsroot: String,
    #[serde(default)]
    module: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    is_tag: bool,
    #[serde(default)]
    local_dir: Option<String>,
}

const fn default_version() -> u32 {
    2
}

fn default_cvs_exe() -> String {
    "cvs".to_owned()
}

// ---------------------------------------------------------------------------
// JobConfig
// ---------------------------------------------------------------------------

/// Validated, migrated job configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobConfig {
    /// Path to the cvs executable (default `"cvs"`).
    pub cvs_exe: String,
    /// Path to the `.cvspass` credentials file, exported as `CVS_PASSFILE`.
    pub cvspass_file: Option<String>,
    /// RSH command, exported as `CVS_RSH`.
    pub cvs_rsh: Option<String>,
    /// Disable compression even for remote roots.
    pub no_compression: bool,
    /// Allow incremental `cvs update` when the workspace is compatible.
    pub can_use_update: bool,
    /// Pass `--lf` to cvs (WinCVS/TortoiseCVS interop).
    pub prevent_line_ending_conversion: bool,
    /// Force the legacy one-subdirectory-per-module layout even for a
    /// single-module job.
    pub legacy: bool,
    /// Run cvs with trace output (`-t`) instead of quiet flags.
    pub verbose: bool,
    /// Polling exclusions: one regular expression per non-empty line.
    pub excluded_regions: Option<String>,
    /// The configured module locations, invalid entries already dropped.
    pub locations: Vec<ModuleLocation>,
}

impl JobConfig {
    /// Load and validate a job configuration from a TOML file.
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] when the file cannot be read, does not
    /// parse, fails the schema migration, or fails validation.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!("{}: could not read file: {e}", path.display()))
        })?;
        Self::parse(&contents)
            .map_err(|e| SyncError::config(format!("{}: {e}", path.display())))
    }

    /// Parse and validate a job configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] on invalid TOML, unknown fields, an
    /// unknown schema version, or failed validation.
    pub fn parse(toml_str: &str) -> Result<Self, SyncError> {
        let raw: RawConfig = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            SyncError::config(message)
        })?;
        let cfg = migrate(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Whether the single configured module is checked out directly into
    /// the workspace root.
    #[must_use]
    pub fn flatten(&self) -> bool {
        !self.legacy
            && self.locations.len() == 1
            && self.locations[0].normalized_modules().len() == 1
    }

    /// All normalized module names across every location, in configured
    /// order.
    #[must_use]
    pub fn all_modules(&self) -> Vec<String> {
        self.locations
            .iter()
            .flat_map(ModuleLocation::normalized_modules)
            .collect()
    }

    /// The non-empty exclusion pattern lines, in configured order.
    #[must_use]
    pub fn excluded_regions_normalized(&self) -> Vec<&str> {
        self.excluded_regions
            .as_deref()
            .map(|s| {
                s.split(['\r', '\n'])
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Compile the exclusion patterns as full-string matchers.
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] naming the offending pattern when one
    /// fails to compile.
    pub fn excluded_patterns(&self) -> Result<Vec<Regex>, SyncError> {
        self.excluded_regions_normalized()
            .into_iter()
            .map(|line| {
                // Validate the user's pattern on its own so the error names
                // it verbatim, then anchor it for full-string matching.
                Regex::new(line).map_err(|e| {
                    SyncError::config(format!("invalid exclusion pattern `{line}`: {e}"))
                })?;
                Regex::new(&format!("^(?:{line})$")).map_err(|e| {
                    SyncError::config(format!("invalid exclusion pattern `{line}`: {e}"))
                })
            })
            .collect()
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.locations.is_empty() {
            return Err(SyncError::config(
                "no module location with a non-empty cvsroot is configured",
            ));
        }
        let shape = Regex::new(ROOT_SHAPE).map_err(|e| SyncError::config(e.to_string()))?;
        for location in &self.locations {
            let root = location.cvsroot();
            if (root.starts_with(":pserver") || root.starts_with(":ext"))
                && !shape.is_match(root)
            {
                return Err(SyncError::config(format!("invalid cvsroot `{root}`")));
            }
        }
        self.excluded_patterns()?;
        Ok(())
    }
}

impl fmt::Display for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} location(s), exe={}, incremental={}",
            self.locations.len(),
            self.cvs_exe,
            self.can_use_update
        )
    }
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

/// Migrate a raw document to the current schema.
///
/// Version 1 stores a single location in top-level fields; version 2 uses
/// the `[[location]]` list. Locations with an empty root are dropped here,
/// before validation.
fn migrate(raw: RawConfig) -> Result<JobConfig, SyncError> {
    let locations: Vec<ModuleLocation> = match raw.version {
        1 => {
            if !raw.locations.is_empty() {
                return Err(SyncError::config(
                    "version 1 configuration cannot contain [[location]] entries",
                ));
            }
            let cvsroot = raw.cvsroot.as_deref().unwrap_or_default();
            vec![ModuleLocation::new(
                cvsroot,
                raw.module.as_deref().unwrap_or_default(),
                raw.branch.as_deref(),
                raw.is_tag.unwrap_or(false),
                None,
            )]
        }
        2 => {
            if raw.cvsroot.is_some() || raw.module.is_some() || raw.branch.is_some()
                || raw.is_tag.is_some()
            {
                return Err(SyncError::config(
                    "top-level cvsroot/module/branch/is_tag are version 1 fields; \
                     use [[location]] entries",
                ));
            }
            raw.locations
                .iter()
                .map(|l| {
                    ModuleLocation::new(
                        &l.cvsroot,
                        &l.module,
                        l.branch.as_deref(),
                        l.is_tag,
                        l.local_dir.as_deref(),
                    )
                })
                .collect()
        }
        v => {
            return Err(SyncError::config(format!(
                "unsupported configuration version {v}"
            )));
        }
    };
    let (valid, dropped): (Vec<_>, Vec<_>) =
        locations.into_iter().partition(ModuleLocation::is_valid);
    if !dropped.is_empty() {
        tracing::warn!(count = dropped.len(), "dropping locations with empty cvsroot");
    }
    Ok(JobConfig {
        cvs_exe: raw.cvs_exe,
        cvspass_file: raw.cvspass_file,
        cvs_rsh: raw.cvs_rsh,
        no_compression: raw.no_compression,
        can_use_update: raw.can_use_update,
        prevent_line_ending_conversion: raw.prevent_line_ending_conversion,
        legacy: raw.legacy,
        verbose: raw.verbose,
        excluded_regions: raw.excluded_regions,
        locations: valid,
    })
}
