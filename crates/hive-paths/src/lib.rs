use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PathError {
    #[error("data directory not found — set $XDG_DATA_HOME or $HOME")]
    DataDirNotFound,
}

/// Centralized path construction for the `<workspace>/.hive/` layout.
///
/// Single source of truth for every path Hive creates inside a cell's
/// workspace root. Use `for_workspace()` in production code and
/// `from_dir()`-equivalent (just construct directly) in tests.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    workspace_root: PathBuf,
}

impl WorkspacePaths {
    pub fn for_workspace(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// The base `<workspace>/.hive` directory.
    pub fn hive_dir(&self) -> PathBuf {
        self.workspace_root.join(".hive")
    }

    pub fn cells_dir(&self) -> PathBuf {
        self.hive_dir().join("cells")
    }

    /// Worktree path for a given cell: `<workspaceRoot>/.hive/cells/<cellId>`.
    pub fn cell_dir(&self, cell_id: &str) -> PathBuf {
        self.cells_dir().join(sanitize_for_path(cell_id))
    }

    /// Exported as `HIVE_HOME` into every service process. Created per cell.
    pub fn home_dir(&self) -> PathBuf {
        self.hive_dir().join("home")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.hive_dir().join("logs")
    }

    /// Best-effort capture of a service's stdout/stderr.
    pub fn service_log_file(&self, service_name: &str) -> PathBuf {
        self.logs_dir()
            .join(format!("{}.log", sanitize_for_path(service_name)))
    }

    /// Regenerated on every agent-session ensure; content must be stable
    /// given the same inputs since clients and tools may parse it.
    pub fn instructions_file(&self) -> PathBuf {
        self.hive_dir().join("instructions.md")
    }

    /// Candidate workspace config files, in the order they should be probed.
    /// The first one that exists on disk wins.
    pub fn hive_config_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        for name in ["hive.config.ts", "hive.config.json", "hive.config.jsonc"] {
            candidates.push(self.workspace_root.join(name));
        }
        for name in ["hive.config.ts", "hive.config.json", "hive.config.jsonc"] {
            candidates.push(self.workspace_root.join("hive").join(name));
        }
        candidates
    }
}

/// Replace any char unsafe for a filesystem path component with `-`.
///
/// Mirrors the rule used throughout the orchestrator for turning branch-like
/// or service-like identifiers into single path segments.
pub fn sanitize_for_path(s: &str) -> String {
    s.replace(['/', '\\'], "-")
}

/// Path to the per-user provider credentials store:
/// `~/.local/share/opencode/auth.json` (or its `$XDG_DATA_HOME` equivalent).
pub fn credentials_path() -> Result<PathBuf, PathError> {
    let data_dir = dirs::data_dir().ok_or(PathError::DataDirNotFound)?;
    Ok(data_dir.join("opencode").join("auth.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> WorkspacePaths {
        WorkspacePaths::for_workspace(PathBuf::from("/repos/myapp"))
    }

    #[test]
    fn hive_dir() {
        assert_eq!(paths().hive_dir(), PathBuf::from("/repos/myapp/.hive"));
    }

    #[test]
    fn cells_dir() {
        assert_eq!(
            paths().cells_dir(),
            PathBuf::from("/repos/myapp/.hive/cells")
        );
    }

    #[test]
    fn cell_dir() {
        assert_eq!(
            paths().cell_dir("cell-123"),
            PathBuf::from("/repos/myapp/.hive/cells/cell-123")
        );
    }

    #[test]
    fn cell_dir_sanitizes_slashes() {
        assert_eq!(
            paths().cell_dir("feature/auth"),
            PathBuf::from("/repos/myapp/.hive/cells/feature-auth")
        );
    }

    #[test]
    fn home_dir() {
        assert_eq!(paths().home_dir(), PathBuf::from("/repos/myapp/.hive/home"));
    }

    #[test]
    fn service_log_file() {
        assert_eq!(
            paths().service_log_file("web"),
            PathBuf::from("/repos/myapp/.hive/logs/web.log")
        );
    }

    #[test]
    fn service_log_file_sanitizes_slashes() {
        assert_eq!(
            paths().service_log_file("a/b"),
            PathBuf::from("/repos/myapp/.hive/logs/a-b.log")
        );
    }

    #[test]
    fn instructions_file() {
        assert_eq!(
            paths().instructions_file(),
            PathBuf::from("/repos/myapp/.hive/instructions.md")
        );
    }

    #[test]
    fn hive_config_candidates_checks_root_then_nested_dir() {
        let candidates = paths().hive_config_candidates();
        assert_eq!(
            candidates[0],
            PathBuf::from("/repos/myapp/hive.config.ts")
        );
        assert_eq!(
            candidates[3],
            PathBuf::from("/repos/myapp/hive/hive.config.ts")
        );
        assert_eq!(candidates.len(), 6);
    }

    #[test]
    fn sanitize_for_path_replaces_separators() {
        assert_eq!(sanitize_for_path("feature/auth"), "feature-auth");
        assert_eq!(sanitize_for_path("a/b\\c"), "a-b-c");
        assert_eq!(sanitize_for_path("plain"), "plain");
    }

    #[test]
    fn credentials_path_ends_with_expected_suffix() {
        // $HOME/$XDG_DATA_HOME is set in CI and dev environments.
        let result = credentials_path();
        assert!(result.is_ok());
        let path = result.unwrap();
        assert!(path.ends_with("opencode/auth.json"));
    }
}
