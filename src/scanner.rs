//! Corpus scanner.
//!
//! Enumerates the files of a repository that are eligible for indexing.
//! Exclusion combines the configured glob patterns, a deny-list of
//! non-text extensions, and the repository's own `.gitignore`.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ScannerConfig;

/// Scans one repository root with a fixed set of exclusion rules.
pub struct CorpusScanner {
    root: PathBuf,
    exclude_set: GlobSet,
    ignored_extensions: HashSet<String>,
    gitignore: Option<Gitignore>,
}

impl CorpusScanner {
    pub fn new(root: &Path, config: &ScannerConfig) -> Result<Self> {
        if !root.is_dir() {
            bail!("Repository root does not exist: {}", root.display());
        }

        let exclude_set = build_globset(&config.exclude_globs)?;
        let ignored_extensions = config
            .ignored_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        let gitignore = if config.respect_gitignore {
            load_gitignore(root)?
        } else {
            None
        };

        Ok(Self {
            root: root.to_path_buf(),
            exclude_set,
            ignored_extensions,
            gitignore,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative paths of every indexable file, sorted.
    ///
    /// With `subset`, the result is intersected with those relative paths;
    /// a requested path that is excluded or no longer exists is dropped
    /// silently.
    pub fn scan(&self, subset: Option<&[String]>) -> Result<Vec<String>> {
        let wanted: Option<HashSet<&str>> =
            subset.map(|paths| paths.iter().map(String::as_str).collect());

        let mut files = Vec::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_excluded_dir(entry));

        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to walk {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if let Some(ref wanted) = wanted {
                if !wanted.contains(rel_str.as_str()) {
                    continue;
                }
            }

            if self.is_excluded_file(path, &rel_str) {
                continue;
            }

            files.push(rel_str);
        }

        files.sort();
        Ok(files)
    }

    fn is_excluded_dir(&self, entry: &walkdir::DirEntry) -> bool {
        if !entry.file_type().is_dir() {
            return false;
        }
        let path = entry.path();
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if self.exclude_set.is_match(&rel_str) {
            return true;
        }
        self.gitignore
            .as_ref()
            .map(|gi| gi.matched(path, true).is_ignore())
            .unwrap_or(false)
    }

    fn is_excluded_file(&self, path: &Path, rel_str: &str) -> bool {
        if self.exclude_set.is_match(rel_str) {
            return true;
        }

        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if self.ignored_extensions.contains(&ext.to_ascii_lowercase()) {
                return true;
            }
        }

        self.gitignore
            .as_ref()
            .map(|gi| gi.matched_path_or_any_parents(path, false).is_ignore())
            .unwrap_or(false)
    }
}

fn load_gitignore(root: &Path) -> Result<Option<Gitignore>> {
    let file = root.join(".gitignore");
    if !file.is_file() {
        return Ok(None);
    }
    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(&file) {
        tracing::warn!(path = %file.display(), error = %err, "ignoring malformed .gitignore lines");
    }
    let gitignore = builder
        .build()
        .with_context(|| format!("Failed to build ignore rules from {}", file.display()))?;
    Ok(Some(gitignore))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).with_context(|| format!("Invalid exclude glob: {}", pattern))?,
        );
    }
    Ok(builder.build()?)
}
