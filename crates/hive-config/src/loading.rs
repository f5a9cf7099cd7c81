//! Workspace config loading with mtime-based cache invalidation.
//!
//! # Lookup order
//!
//! `hive.config.json` / `hive.config.jsonc` at the workspace root, then the
//! same names under a nested `hive/` directory. `hive.config.ts` is listed
//! as a candidate name (so workspaces that ship one are recognized rather
//! than silently falling back to defaults) but is not evaluated — parsing
//! a TypeScript module is outside what this crate does; workspaces that
//! need the `.ts` form should also ship a `.json`/`.jsonc` sibling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::errors::ConfigError;
use crate::jsonc::strip_comments;
use crate::types::HiveConfig;
use crate::validation::validate_config;

struct CachedEntry {
    config: HiveConfig,
    source_path: Option<PathBuf>,
    mtime: Option<SystemTime>,
}

/// Per-workspace-root cache of the parsed `HiveConfig`, invalidated whenever
/// the backing file's modification time changes.
#[derive(Default)]
pub struct ConfigCache {
    entries: Mutex<HashMap<PathBuf, CachedEntry>>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or return the cached) `HiveConfig` for a workspace root.
    ///
    /// A missing config file is not an error — it resolves to
    /// `HiveConfig::default()`. Parse and validation failures propagate.
    pub fn load(&self, workspace_root: &Path) -> Result<HiveConfig, ConfigError> {
        let found = find_config_file(workspace_root);
        let mtime = found
            .as_ref()
            .and_then(|path| std::fs::metadata(path).ok())
            .and_then(|meta| meta.modified().ok());

        let mut entries = self.entries.lock().expect("config cache lock poisoned");
        if let Some(entry) = entries.get(workspace_root)
            && entry.source_path == found
            && entry.mtime == mtime
        {
            debug!(
                event = "config.cache.hit",
                workspace_root = %workspace_root.display()
            );
            return Ok(entry.config.clone());
        }

        let config = match &found {
            Some(path) => load_config_file(path)?,
            None => HiveConfig::default(),
        };
        validate_config(&config)?;

        entries.insert(
            workspace_root.to_path_buf(),
            CachedEntry {
                config: config.clone(),
                source_path: found,
                mtime,
            },
        );

        Ok(config)
    }

    /// Drop any cached entry for a workspace root, forcing the next `load`
    /// to re-read from disk regardless of mtime.
    pub fn invalidate(&self, workspace_root: &Path) {
        self.entries
            .lock()
            .expect("config cache lock poisoned")
            .remove(workspace_root);
    }
}

fn find_config_file(workspace_root: &Path) -> Option<PathBuf> {
    let paths = hive_paths::WorkspacePaths::for_workspace(workspace_root);
    for candidate in paths.hive_config_candidates() {
        if candidate.extension().and_then(|e| e.to_str()) == Some("ts") {
            if candidate.exists() {
                warn!(
                    event = "config.load.ts_candidate_skipped",
                    path = %candidate.display(),
                    "hive.config.ts is not evaluated; add a .json/.jsonc sibling"
                );
            }
            continue;
        }
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn load_config_file(path: &Path) -> Result<HiveConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let stripped = strip_comments(&content);
    serde_json::from_str(&stripped).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ConfigCache::new();
        let config = cache.load(dir.path()).unwrap();
        assert!(config.templates.is_empty());
    }

    #[test]
    fn loads_and_caches_until_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("hive.config.json");
        std::fs::write(&config_path, r#"{"promptSources": ["AGENTS.md"]}"#).unwrap();

        let cache = ConfigCache::new();
        let first = cache.load(dir.path()).unwrap();
        assert_eq!(first.prompt_sources, vec!["AGENTS.md".to_string()]);

        // Mutate the file without changing mtime resolution window by writing
        // a different mtime explicitly in the past, then rewriting content.
        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&config_path)
            .unwrap();
        write!(file, r#"{{"promptSources": ["OTHER.md"]}}"#).unwrap();
        drop(file);

        let second = cache.load(dir.path()).unwrap();
        assert_eq!(second.prompt_sources, vec!["OTHER.md".to_string()]);
    }

    #[test]
    fn parses_jsonc_comments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hive.config.jsonc"),
            "{\n  // comment\n  \"promptSources\": [\"AGENTS.md\"]\n}",
        )
        .unwrap();
        let cache = ConfigCache::new();
        let config = cache.load(dir.path()).unwrap();
        assert_eq!(config.prompt_sources, vec!["AGENTS.md".to_string()]);
    }

    #[test]
    fn nested_hive_dir_is_probed_when_root_has_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("hive")).unwrap();
        std::fs::write(
            dir.path().join("hive").join("hive.config.json"),
            r#"{"promptSources": ["NESTED.md"]}"#,
        )
        .unwrap();
        let cache = ConfigCache::new();
        let config = cache.load(dir.path()).unwrap();
        assert_eq!(config.prompt_sources, vec!["NESTED.md".to_string()]);
    }

    #[test]
    fn ts_candidate_alone_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hive.config.ts"), "export default {}").unwrap();
        let cache = ConfigCache::new();
        let config = cache.load(dir.path()).unwrap();
        assert!(config.templates.is_empty());
    }
}
