//! Version-control capability.
//!
//! The pipeline needs three things from the VCS: the current revision, the
//! paths changed between two revisions, and the paths with uncommitted
//! changes in the working tree. [`Vcs`] names exactly those; [`GitCli`]
//! implements them by shelling out to the `git` binary.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

/// Source of revision and change information for a repository.
pub trait Vcs: Send + Sync {
    /// The repository's present revision identifier.
    fn current_revision(&self, repo: &Path) -> Result<String>;

    /// Relative paths whose content differs between `revision` and the
    /// current revision.
    fn changed_paths_since(&self, repo: &Path, revision: &str) -> Result<Vec<String>>;

    /// Relative paths with uncommitted modifications, additions, deletions,
    /// or untracked status.
    fn working_tree_changed_paths(&self, repo: &Path) -> Result<Vec<String>>;
}

/// [`Vcs`] backed by the `git` command-line tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

impl Vcs for GitCli {
    fn current_revision(&self, repo: &Path) -> Result<String> {
        let out = run_git(repo, &["rev-parse", "HEAD"])?;
        let rev = out.trim().to_string();
        if rev.is_empty() {
            bail!("git rev-parse HEAD returned nothing in {}", repo.display());
        }
        Ok(rev)
    }

    /// Renames are reported as a deletion of the old path plus an addition
    /// of the new one, so chunks of the old path get purged.
    fn changed_paths_since(&self, repo: &Path, revision: &str) -> Result<Vec<String>> {
        let out = run_git(
            repo,
            &["diff", "--name-only", "--no-renames", "-z", revision, "HEAD"],
        )?;
        Ok(parse_name_only(&out))
    }

    fn working_tree_changed_paths(&self, repo: &Path) -> Result<Vec<String>> {
        let out = run_git(repo, &["status", "--porcelain", "-z", "--untracked-files=all"])?;
        Ok(parse_porcelain_status(&out))
    }
}

/// Whether `path` looks like the root of a git working tree.
pub fn has_vcs_metadata(path: &Path) -> bool {
    path.join(".git").exists()
}

fn run_git(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git {} failed in {}: {}",
            args.join(" "),
            repo.display(),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `git diff --name-only -z` output: NUL-terminated paths, printed
/// verbatim. Duplicates are removed keeping the first occurrence.
pub fn parse_name_only(output: &str) -> Vec<String> {
    dedup(output.split('\0').filter(|p| !p.is_empty()))
}

/// Parse `git status --porcelain -z` output.
///
/// Each entry is a two-character status code, a space and the path. A
/// rename or copy entry (`R`/`C` in either column) is followed by a second
/// entry holding the origin path; both paths are returned.
pub fn parse_porcelain_status(output: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut entries = output.split('\0').filter(|e| !e.is_empty());
    while let Some(entry) = entries.next() {
        let Some(code) = entry.get(..2) else {
            continue;
        };
        if let Some(path) = entry.get(3..).filter(|p| !p.is_empty()) {
            paths.push(path);
        }
        if code.contains(['R', 'C']) {
            if let Some(origin) = entries.next() {
                paths.push(origin);
            }
        }
    }
    dedup(paths.into_iter())
}

fn dedup<'a>(paths: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    paths
        .filter(|p| seen.insert(*p))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_only() {
        let out = "src/a.ts\0README.md\0src/a.ts\0";
        assert_eq!(parse_name_only(out), vec!["src/a.ts", "README.md"]);
    }

    #[test]
    fn test_parse_name_only_keeps_verbatim_paths() {
        let out = "caf\u{e9}.md\0docs/with space.md\0";
        assert_eq!(parse_name_only(out), vec!["caf\u{e9}.md", "docs/with space.md"]);
    }

    #[test]
    fn test_parse_name_only_empty() {
        assert!(parse_name_only("").is_empty());
        assert!(parse_name_only("\0\0").is_empty());
    }

    #[test]
    fn test_parse_porcelain_status() {
        let out = " M b.js\0?? new/file.rs\0D  gone.txt\0MM b.js\0";
        assert_eq!(
            parse_porcelain_status(out),
            vec!["b.js", "new/file.rs", "gone.txt"]
        );
    }

    #[test]
    fn test_parse_porcelain_rename_yields_both_paths() {
        let out = "R  new.md\0old.md\0 M b.js\0C  copy.rs\0orig.rs\0";
        assert_eq!(
            parse_porcelain_status(out),
            vec!["new.md", "old.md", "b.js", "copy.rs", "orig.rs"]
        );
    }

    #[test]
    fn test_parse_porcelain_spaces_and_unicode() {
        let out = "?? my notes.txt\0 M caf\u{e9}.md\0";
        assert_eq!(
            parse_porcelain_status(out),
            vec!["my notes.txt", "caf\u{e9}.md"]
        );
    }

    #[test]
    fn test_current_revision_fails_outside_repo() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(GitCli.current_revision(tmp.path()).is_err());
        assert!(!has_vcs_metadata(tmp.path()));
    }
}
