//! Index store abstraction.
//!
//! The [`IndexStore`] trait is the whole storage contract of the pipeline:
//! insert chunks with their vectors, delete the chunks of a set of files
//! for one commit, run a nearest-neighbor query, and report counts. Each
//! backing engine implements it directly; there is no base type.
//!
//! | Engine | Use |
//! |--------|-----|
//! | [`sqlite::SqliteStore`] | Durable store, reopened across restarts |
//! | [`memory::InMemoryStore`] | Tests and throwaway sessions |
//!
//! Records are validated at this boundary by [`validate_chunk`]. Invalid
//! records are logged and skipped; the rest of the batch is still written.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkHit, CommitCount, NewChunk};

/// Restricts a nearest-neighbor query.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Only return chunks from this repository.
    pub repo_path: Option<String>,
}

impl SearchFilter {
    pub fn repo(repo_path: impl Into<String>) -> Self {
        Self {
            repo_path: Some(repo_path.into()),
        }
    }
}

/// Why a record was refused at the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyContent,
    NulByte,
    EmptyVector,
    NonFiniteVector,
    DimensionMismatch,
    InvalidField,
}

/// Outcome of an [`IndexStore::insert_many`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertReport {
    pub inserted: u64,
    /// `(file_path, reason)` for each refused record.
    pub rejected: Vec<(String, RejectReason)>,
}

impl InsertReport {
    pub fn absorb(&mut self, other: InsertReport) {
        self.inserted += other.inserted;
        self.rejected.extend(other.rejected);
    }
}

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert a single chunk.
    async fn insert(&self, chunk: &NewChunk) -> Result<InsertReport> {
        self.insert_many(std::slice::from_ref(chunk)).await
    }

    /// Insert chunks. Valid records are committed in fixed-size
    /// transactional groups; invalid ones are skipped and reported.
    async fn insert_many(&self, chunks: &[NewChunk]) -> Result<InsertReport>;

    /// Delete every chunk whose file path is in `file_paths` and whose
    /// commit hash equals `commit_hash`. Returns the number of chunks
    /// removed (a chunk and its vector count as one).
    async fn delete_matching(&self, file_paths: &[String], commit_hash: &str) -> Result<u64>;

    /// Delete every chunk of a repository.
    async fn delete_repo(&self, repo_path: &str) -> Result<u64>;

    /// The `k` chunks closest to `query` under cosine distance, closest
    /// first.
    async fn nearest_neighbors(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkHit>>;

    /// Live chunk counts per commit hash for a repository.
    async fn chunk_counts(&self, repo_path: &str) -> Result<Vec<CommitCount>>;

    /// Flush pending writes to durable storage.
    async fn persist(&self) -> Result<()>;
}

/// Check one record before it is written.
pub fn validate_chunk(chunk: &NewChunk, expected_dims: Option<usize>) -> Result<(), RejectReason> {
    if chunk.content.contains('\0') {
        return Err(RejectReason::NulByte);
    }
    if chunk.content.trim().is_empty() {
        return Err(RejectReason::EmptyContent);
    }
    for field in [&chunk.repo_path, &chunk.file_path, &chunk.commit_hash, &chunk.id] {
        if field.is_empty() || field.contains('\0') {
            return Err(RejectReason::InvalidField);
        }
    }
    if chunk.vector.is_empty() {
        return Err(RejectReason::EmptyVector);
    }
    if chunk.vector.iter().any(|v| !v.is_finite()) {
        return Err(RejectReason::NonFiniteVector);
    }
    if let Some(dims) = expected_dims {
        if dims > 0 && chunk.vector.len() != dims {
            return Err(RejectReason::DimensionMismatch);
        }
    }
    Ok(())
}

/// Split `chunks` into valid records and a report of rejected ones,
/// logging each rejection.
pub(crate) fn partition_valid<'a>(
    chunks: &'a [NewChunk],
    expected_dims: Option<usize>,
) -> (Vec<&'a NewChunk>, InsertReport) {
    let mut report = InsertReport::default();
    let mut valid = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match validate_chunk(chunk, expected_dims) {
            Ok(()) => valid.push(chunk),
            Err(reason) => {
                tracing::warn!(
                    file = %chunk.file_path,
                    chunk_index = chunk.chunk_index,
                    ?reason,
                    "rejected chunk at store boundary"
                );
                report.rejected.push((chunk.file_path.clone(), reason));
            }
        }
    }
    (valid, report)
}

#[cfg(test)]
pub(crate) fn test_chunk(file: &str, commit: &str, index: i64, vector: Vec<f32>) -> NewChunk {
    NewChunk {
        id: uuid::Uuid::new_v4().to_string(),
        repo_path: "/repo".to_string(),
        file_path: file.to_string(),
        commit_hash: commit.to_string(),
        chunk_index: index,
        content: format!("content of {} #{}", file, index),
        hash: String::new(),
        vector,
    }
}
