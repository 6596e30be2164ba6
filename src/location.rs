//! Module locations: one configured mapping from a repository root plus a
//! module list to a branch/tag and a local workspace subdirectory.
//!
//! A location is constructed once from persisted job configuration. Each
//! build derives a transient *resolved* copy by substituting build
//! parameters into every string field; only resolved copies reach the
//! orchestrator.

use std::collections::HashMap;

use crate::params;

/// The branch name that means "no branch" (the trunk).
pub const HEAD_BRANCH: &str = "HEAD";

/// Default local checkout subdirectory: the workspace root itself.
pub const DEFAULT_LOCAL_DIR: &str = ".";

// ---------------------------------------------------------------------------
// ModuleLocation
// ---------------------------------------------------------------------------

/// One configured repository mapping: connection string, module list,
/// branch/tag, and the local subdirectory it is checked out under.
///
/// Equality and hashing cover all five stored fields; the derived module
/// list does not participate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModuleLocation {
    cvsroot: String,
    module: String,
    branch: Option<String>,
    is_tag: bool,
    local_dir: String,
}

impl ModuleLocation {
    /// Build a location from raw configuration values.
    ///
    /// All string fields are trimmed. An empty branch, or the literal
    /// `HEAD`, normalizes to "no branch" (trunk). An empty local dir
    /// defaults to [`DEFAULT_LOCAL_DIR`].
    #[must_use]
    pub fn new(
        cvsroot: &str,
        module: &str,
        branch: Option<&str>,
        is_tag: bool,
        local_dir: Option<&str>,
    ) -> Self {
        let branch = branch
            .map(str::trim)
            .filter(|b| !b.is_empty() && *b != HEAD_BRANCH)
            .map(str::to_owned);
        let local_dir = local_dir
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_LOCAL_DIR)
            .to_owned();
        Self {
            cvsroot: cvsroot.trim().to_owned(),
            module: module.trim().to_owned(),
            branch,
            is_tag,
            local_dir,
        }
    }

    /// The repository connection string, like `:pserver:me@host:/cvs`.
    #[must_use]
    pub fn cvsroot(&self) -> &str {
        &self.cvsroot
    }

    /// The raw module list: whitespace/newline-separated, `\ ` escaping a
    /// space inside a module name.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The configured branch or tag name. `None` means the trunk.
    #[must_use]
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Whether [`branch`](Self::branch) names a fixed tag rather than a
    /// moving branch. A tag suppresses date-restricted updates.
    #[must_use]
    pub const fn is_tag(&self) -> bool {
        self.is_tag
    }

    /// The subdirectory under the workspace root this location is checked
    /// out into.
    #[must_use]
    pub fn local_dir(&self) -> &str {
        &self.local_dir
    }

    /// Whether this location uses the default local dir (the workspace
    /// root).
    #[must_use]
    pub fn has_default_local_dir(&self) -> bool {
        self.local_dir == DEFAULT_LOCAL_DIR
    }

    /// A location with an empty root is dropped at configuration load.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.cvsroot.is_empty()
    }

    /// The module list split on unescaped whitespace, with `\ ` unescaped.
    #[must_use]
    pub fn normalized_modules(&self) -> Vec<String> {
        params::normalize_modules(&self.module)
    }

    /// Derive the transient per-build copy with `${name}` build parameters
    /// substituted into every string field.
    #[must_use]
    pub fn resolve(&self, build_params: &HashMap<String, String>) -> Self {
        Self::new(
            &params::populate(&self.cvsroot, build_params),
            &params::populate(&self.module, build_params),
            self.branch
                .as_deref()
                .map(|b| params::populate(b, build_params))
                .as_deref(),
            self.is_tag,
            Some(&params::populate(&self.local_dir, build_params)),
        )
    }
}
