use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::{Repository, WorktreeAddOptions};
use tracing::{info, warn};

use crate::errors::WorktreeError;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Creates and removes git worktrees rooted at `<workspaceRoot>/.hive/cells/<cellId>`
/// (§4.4 step 1). Contract-only in the distilled spec; this crate's
/// implementation is grounded on the teacher's own worktree handler.
pub struct WorktreeAdapter;

impl WorktreeAdapter {
    /// Create a worktree for `cell_id` off `branch` (created from HEAD if it
    /// doesn't already exist), rooted at `workspace_root/.hive/cells/<cellId>`.
    pub fn create_worktree(
        workspace_root: &Path,
        cell_id: &str,
        branch: &str,
    ) -> Result<PathBuf, WorktreeError> {
        let paths = hive_paths::WorkspacePaths::for_workspace(workspace_root);
        let worktree_path = paths.cell_dir(cell_id);

        info!(
            event = "core.worktree.create_started",
            cell_id = cell_id,
            branch = branch,
            path = %worktree_path.display(),
        );

        if worktree_path.exists() {
            return Err(WorktreeError::AlreadyExists(
                worktree_path.display().to_string(),
            ));
        }

        let repo = Repository::discover(workspace_root)
            .map_err(|_| WorktreeError::NotARepository(workspace_root.display().to_string()))?;

        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let admin_name = hive_paths::sanitize_for_path(cell_id);
        let branch_exists = repo
            .find_branch(branch, git2::BranchType::Local)
            .is_ok();
        if !branch_exists {
            let head = repo.head()?.peel_to_commit()?;
            repo.branch(branch, &head, false)?;
        }
        let branch_ref = repo.find_branch(branch, git2::BranchType::Local)?;
        let reference = branch_ref.into_reference();

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));
        add_worktree_with_retry(&repo, &admin_name, &worktree_path, &opts)?;

        info!(
            event = "core.worktree.create_completed",
            cell_id = cell_id,
            branch = branch,
            path = %worktree_path.display(),
        );
        Ok(worktree_path)
    }

    /// Remove a cell's worktree, best-effort. Safe to call if the worktree
    /// was already removed externally.
    pub fn remove_worktree(workspace_root: &Path, cell_id: &str) -> Result<(), WorktreeError> {
        let paths = hive_paths::WorkspacePaths::for_workspace(workspace_root);
        let worktree_path = paths.cell_dir(cell_id);
        if !worktree_path.exists() {
            return Ok(());
        }

        let repo = Repository::discover(workspace_root)
            .map_err(|_| WorktreeError::NotARepository(workspace_root.display().to_string()))?;
        let admin_name = hive_paths::sanitize_for_path(cell_id);
        if let Ok(mut wt) = repo.find_worktree(&admin_name) {
            let _ = wt.prune(None);
        }
        std::fs::remove_dir_all(&worktree_path)?;
        Ok(())
    }
}

/// Retries `repo.worktree()` on `git2::ErrorCode::Exists`: libgit2's
/// `git_worktree_add()` creates `.git/worktrees/` with a non-atomic mkdir,
/// so two concurrent cell creations can race the parent directory. A retry
/// succeeds once that directory exists. Only retries when the admin entry
/// itself doesn't already exist — otherwise the conflict is a genuine
/// duplicate, not the mkdir race.
fn add_worktree_with_retry(
    repo: &Repository,
    name: &str,
    path: &Path,
    opts: &WorktreeAddOptions<'_>,
) -> Result<(), WorktreeError> {
    let mut attempt = 0;
    loop {
        match repo.worktree(name, path, Some(opts)) {
            Ok(_) => return Ok(()),
            Err(e) if e.code() == git2::ErrorCode::Exists && attempt < MAX_RETRIES => {
                let admin_exists = repo.path().join("worktrees").join(name).exists();
                if admin_exists {
                    return Err(e.into());
                }
                attempt += 1;
                warn!(
                    event = "core.worktree.create_retry",
                    attempt = attempt,
                    error = %e,
                );
                std::thread::sleep(RETRY_DELAY);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        Command::new("git").arg("init").arg(dir).output().unwrap();
        Command::new("git")
            .args(["-C", dir.to_str().unwrap(), "config", "user.email", "t@t.com"])
            .output()
            .unwrap();
        Command::new("git")
            .args(["-C", dir.to_str().unwrap(), "config", "user.name", "t"])
            .output()
            .unwrap();
        std::fs::write(dir.join("README.md"), "hi").unwrap();
        Command::new("git")
            .args(["-C", dir.to_str().unwrap(), "add", "."])
            .output()
            .unwrap();
        Command::new("git")
            .args(["-C", dir.to_str().unwrap(), "commit", "-m", "init"])
            .output()
            .unwrap();
    }

    #[test]
    fn create_worktree_at_expected_path() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let path = WorktreeAdapter::create_worktree(dir.path(), "cell-1", "hive/cell-1").unwrap();
        assert_eq!(path, dir.path().join(".hive/cells/cell-1"));
        assert!(path.exists());
    }

    #[test]
    fn create_worktree_rejects_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        WorktreeAdapter::create_worktree(dir.path(), "cell-1", "hive/cell-1").unwrap();
        let err = WorktreeAdapter::create_worktree(dir.path(), "cell-1", "hive/cell-1")
            .unwrap_err();
        assert!(matches!(err, WorktreeError::AlreadyExists(_)));
    }

    #[test]
    fn not_a_repository_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = WorktreeAdapter::create_worktree(dir.path(), "cell-1", "hive/cell-1")
            .unwrap_err();
        assert!(matches!(err, WorktreeError::NotARepository(_)));
    }
}
