//! Interactive front end: repository prompt and the chat loop.
//!
//! The loop is a plain iterative read → dispatch cycle over any async line
//! source, so tests drive it with in-memory input and capture the output.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, Lines};

use crate::detect::DetectMode;
use crate::reindex::{CycleReport, Orchestrator, RepoStatus};
use crate::session::{ChatSession, Input};
use crate::vcs::has_vcs_metadata;

/// Environment variable holding the fallback repository path.
pub const DEFAULT_REPO_ENV: &str = "DEFAULT_REPO_PATH";

/// Canonicalize `path` and check it is a repository root.
pub fn validate_repo_path(path: &Path) -> Result<PathBuf> {
    let canonical = std::fs::canonicalize(path)
        .with_context(|| format!("Path does not exist: {}", path.display()))?;
    if !canonical.is_dir() {
        bail!("Not a directory: {}", canonical.display());
    }
    if !has_vcs_metadata(&canonical) {
        bail!("Not a git repository (no .git found): {}", canonical.display());
    }
    Ok(canonical)
}

/// Work out which repository to use.
///
/// An explicit path must be valid. Otherwise `DEFAULT_REPO_PATH` is tried,
/// then the user is prompted until a valid path is entered.
pub async fn resolve_repo_path<R, W>(
    explicit: Option<&Path>,
    input: &mut Lines<R>,
    out: &mut W,
) -> Result<PathBuf>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    if let Some(path) = explicit {
        return validate_repo_path(path);
    }

    if let Ok(default) = std::env::var(DEFAULT_REPO_ENV) {
        if !default.trim().is_empty() {
            match validate_repo_path(Path::new(default.trim())) {
                Ok(path) => return Ok(path),
                Err(e) => tracing::warn!(error = %e, "ignoring {}", DEFAULT_REPO_ENV),
            }
        }
    }

    loop {
        write!(out, "Absolute path of the repository: ")?;
        out.flush()?;
        let line = match input.next_line().await? {
            Some(line) => line,
            None => bail!("No repository path given"),
        };
        let candidate = line.trim();
        if candidate.is_empty() {
            continue;
        }
        match validate_repo_path(Path::new(candidate)) {
            Ok(path) => return Ok(path),
            Err(e) => writeln!(out, "{:#}. Please try again.", e)?,
        }
    }
}

/// Run the chat loop until `exit` or end of input.
pub async fn run_chat_loop<R, W>(
    session: &mut ChatSession,
    orchestrator: &Orchestrator,
    input: &mut Lines<R>,
    out: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write + Send,
{
    writeln!(out, "Ask a question about {}.", orchestrator.repo_path())?;
    writeln!(out, "Type 'update' to reindex uncommitted changes, 'exit' to quit.")?;

    loop {
        write!(out, "\n> ")?;
        out.flush()?;

        let line = match input.next_line().await? {
            Some(line) => line,
            None => break,
        };

        match Input::parse(&line) {
            Input::Exit => break,
            Input::Empty => continue,
            Input::Update => match orchestrator.run_cycle(DetectMode::WorkingTree).await {
                Ok(report) => write_cycle_report(out, &report)?,
                Err(e) => {
                    tracing::error!(error = %format!("{:#}", e), "forced reindex failed");
                    writeln!(out, "error: {:#}", e)?;
                }
            },
            Input::Question(question) => {
                let mut write_error: Option<std::io::Error> = None;
                let result = {
                    let mut sink = |token: &str| {
                        if write_error.is_some() {
                            return;
                        }
                        if let Err(e) = out.write_all(token.as_bytes()).and_then(|_| out.flush()) {
                            write_error = Some(e);
                        }
                    };
                    session.ask(&question, &mut sink).await
                };
                if let Some(e) = write_error {
                    return Err(anyhow::Error::new(e).context("Failed to write answer to output"));
                }
                match result {
                    Ok(answer) => {
                        writeln!(out)?;
                        if !answer.sources.is_empty() {
                            writeln!(out, "\nSources:")?;
                            for source in &answer.sources {
                                writeln!(out, "  {}", source)?;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %format!("{:#}", e), "question failed");
                        writeln!(out, "\nerror: {:#}", e)?;
                    }
                }
            }
        }
    }

    writeln!(out, "bye")?;
    Ok(())
}

/// Print what a reindex cycle did.
pub fn write_cycle_report<W: Write>(out: &mut W, report: &CycleReport) -> Result<()> {
    if !report.committed {
        writeln!(out, "index up to date at {}", short(&report.current_revision))?;
        return Ok(());
    }
    writeln!(
        out,
        "reindexed {} -> {}",
        short(&report.previous_revision),
        short(&report.current_revision)
    )?;
    writeln!(out, "  changed files: {}", report.changed.len())?;
    writeln!(out, "  chunks purged: {}", report.purged)?;
    writeln!(out, "  files embedded: {}", report.ingest.files_embedded)?;
    writeln!(out, "  chunks written: {}", report.ingest.chunks_written)?;
    for (path, reason) in &report.ingest.skipped {
        writeln!(out, "  skipped {} ({})", path, reason)?;
    }
    for (path, reason) in &report.ingest.inserts.rejected {
        writeln!(out, "  rejected chunk of {} ({:?})", path, reason)?;
    }
    Ok(())
}

pub fn write_status<W: Write>(out: &mut W, status: &RepoStatus) -> Result<()> {
    writeln!(out, "repository: {}", status.repo_path)?;
    if !status.indexed {
        writeln!(out, "  not indexed yet; run `repochat index` to build the index")?;
    }
    writeln!(out, "  tracked revision: {}", status.tracked_revision)?;
    writeln!(out, "  current revision: {}", status.current_revision)?;
    writeln!(out, "  drifted: {}", status.drifted())?;
    if status.chunk_counts.is_empty() {
        writeln!(out, "  chunks: none")?;
    }
    for count in &status.chunk_counts {
        writeln!(out, "  chunks @ {}: {}", short(&count.commit_hash), count.chunks)?;
    }
    Ok(())
}

fn short(revision: &str) -> &str {
    revision.get(..12).unwrap_or(revision)
}
