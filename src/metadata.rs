//! Repository metadata persistence.
//!
//! One JSON file per tracked repository, stored under the configured
//! metadata directory and named after the repository's absolute path with
//! every `/` replaced by `_`. Files are rewritten wholesale through a
//! temporary file and a rename, so a crash mid-write leaves the previous
//! record intact.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::models::RepoMetadata;

/// Reads and writes [`RepoMetadata`] records.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The file holding the record for `repo_path`.
    pub fn path_for(&self, repo_path: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_repo_path(repo_path)))
    }

    /// Load the record for `repo_path`, if one exists.
    pub fn load(&self, repo_path: &str) -> Result<Option<RepoMetadata>> {
        let path = self.path_for(repo_path);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read metadata file: {}", path.display()))?;
        let metadata: RepoMetadata = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse metadata file: {}", path.display()))?;
        Ok(Some(metadata))
    }

    /// Load the record for `repo_path`, or seed a fresh one with
    /// `current_revision`. The boolean is `true` when no record exists.
    ///
    /// A seeded record is not written; it reaches disk only once the
    /// repository has been fully indexed.
    pub fn load_or_seed(
        &self,
        repo_path: &str,
        current_revision: impl FnOnce() -> Result<String>,
    ) -> Result<(RepoMetadata, bool)> {
        if let Some(existing) = self.load(repo_path)? {
            tracing::info!(repo = repo_path, "found existing metadata");
            return Ok((existing, false));
        }

        tracing::info!(repo = repo_path, "no existing metadata, repository not indexed yet");
        let metadata = RepoMetadata {
            repo_path: repo_path.to_string(),
            last_known_commit_hash: current_revision()?,
        };
        Ok((metadata, true))
    }

    /// Persist `metadata`, replacing any previous record.
    pub fn save(&self, metadata: &RepoMetadata) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create metadata directory: {}", self.dir.display())
        })?;

        let path = self.path_for(&metadata.repo_path);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("Failed to write metadata file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace metadata file: {}", path.display()))?;
        Ok(())
    }
}

/// Filesystem-safe encoding of an absolute repository path.
pub fn encode_repo_path(repo_path: &str) -> String {
    repo_path.replace(['/', '\\'], "_")
}

/// Canonical string form of a repository root, used as the key for all
/// tracked state.
pub fn repo_key(root: &Path) -> String {
    let s = root.to_string_lossy();
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
