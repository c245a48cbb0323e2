//! Change detection.
//!
//! Compares a repository's current revision with the revision recorded in
//! its metadata and enumerates the files that need re-indexing.

use anyhow::{Context, Result};
use std::path::Path;

use crate::models::RepoMetadata;
use crate::vcs::Vcs;

/// How changed files are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectMode {
    /// Files that differ between the tracked revision and the current one.
    /// Only runs when the revisions differ.
    CommittedDiff,
    /// Files with uncommitted changes, regardless of revision drift.
    WorkingTree,
}

/// Result of a detection pass that found work to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drift {
    pub previous_revision: String,
    pub current_revision: String,
    /// Relative paths, deduplicated, in the order the VCS reported them.
    pub changed: Vec<String>,
}

/// Detect drift for `metadata` using `mode`.
///
/// Returns `Ok(None)` when there is nothing to do. Revision lookup failures
/// are returned as errors; a repository whose revision cannot be resolved is
/// never treated as clean.
pub fn detect(vcs: &dyn Vcs, metadata: &RepoMetadata, mode: DetectMode) -> Result<Option<Drift>> {
    let repo = Path::new(&metadata.repo_path);
    let current = vcs
        .current_revision(repo)
        .with_context(|| format!("Failed to resolve current revision of {}", metadata.repo_path))?;

    let is_dirty = current != metadata.last_known_commit_hash;

    let changed = match mode {
        DetectMode::CommittedDiff => {
            if !is_dirty {
                return Ok(None);
            }
            vcs.changed_paths_since(repo, &metadata.last_known_commit_hash)
                .with_context(|| {
                    format!(
                        "Failed to list changes since {} in {}",
                        metadata.last_known_commit_hash, metadata.repo_path
                    )
                })?
        }
        DetectMode::WorkingTree => {
            let mut paths = vcs.working_tree_changed_paths(repo).with_context(|| {
                format!("Failed to read working tree status of {}", metadata.repo_path)
            })?;
            // A forced run after new commits must still pick up the committed changes.
            if is_dirty {
                let committed = vcs.changed_paths_since(repo, &metadata.last_known_commit_hash)?;
                for p in committed {
                    if !paths.contains(&p) {
                        paths.push(p);
                    }
                }
            }
            paths
        }
    };

    if changed.is_empty() && !is_dirty {
        return Ok(None);
    }

    Ok(Some(Drift {
        previous_revision: metadata.last_known_commit_hash.clone(),
        current_revision: current,
        changed,
    }))
}


#[cfg(test)]
mod tests {
    use super::fake::FakeVcs;
    use super::*;

    fn meta(rev: &str) -> RepoMetadata {
        RepoMetadata {
            repo_path: "/repo".to_string(),
            last_known_commit_hash: rev.to_string(),
        }
    }

    #[test]
    fn test_clean_repo_is_noop() {
        let vcs = FakeVcs::at("r1");
        *vcs.committed.lock().unwrap() = vec!["ignored.ts".to_string()];
        assert_eq!(detect(&vcs, &meta("r1"), DetectMode::CommittedDiff).unwrap(), None);
    }

    #[test]
    fn test_committed_drift() {
        let vcs = FakeVcs::at("r2");
        *vcs.committed.lock().unwrap() = vec!["a.ts".to_string()];
        let drift = detect(&vcs, &meta("r1"), DetectMode::CommittedDiff)
            .unwrap()
            .unwrap();
        assert_eq!(drift.previous_revision, "r1");
        assert_eq!(drift.current_revision, "r2");
        assert_eq!(drift.changed, vec!["a.ts"]);
    }

    #[test]
    fn test_working_tree_without_revision_change() {
        let vcs = FakeVcs::at("r1");
        *vcs.working.lock().unwrap() = vec!["b.js".to_string()];
        let drift = detect(&vcs, &meta("r1"), DetectMode::WorkingTree)
            .unwrap()
            .unwrap();
        assert_eq!(drift.current_revision, "r1");
        assert_eq!(drift.changed, vec!["b.js"]);
    }

    #[test]
    fn test_working_tree_clean_is_noop() {
        let vcs = FakeVcs::at("r1");
        assert_eq!(detect(&vcs, &meta("r1"), DetectMode::WorkingTree).unwrap(), None);
    }

    #[test]
    fn test_working_tree_merges_committed_changes() {
        let vcs = FakeVcs::at("r2");
        *vcs.working.lock().unwrap() = vec!["b.js".to_string()];
        *vcs.committed.lock().unwrap() = vec!["a.ts".to_string(), "b.js".to_string()];
        let drift = detect(&vcs, &meta("r1"), DetectMode::WorkingTree)
            .unwrap()
            .unwrap();
        assert_eq!(drift.changed, vec!["b.js", "a.ts"]);
    }

    #[test]
    fn test_revision_failure_is_loud() {
        let vcs = FakeVcs::default();
        assert!(detect(&vcs, &meta("r1"), DetectMode::CommittedDiff).is_err());
    }
}
