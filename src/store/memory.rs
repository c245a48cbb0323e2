//! In-memory [`IndexStore`] implementation for tests and throwaway sessions.
//!
//! Chunks live in a `Vec` behind a `std::sync::RwLock`. Nearest-neighbor
//! search is brute-force cosine distance over every stored vector.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::{ChunkHit, CommitCount, IndexedChunk, NewChunk};

use super::{partition_valid, IndexStore, InsertReport, SearchFilter};

struct StoredChunk {
    chunk: IndexedChunk,
    vector: Vec<f32>,
}

pub struct InMemoryStore {
    chunks: RwLock<Vec<StoredChunk>>,
    dims: Option<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            dims: None,
        }
    }

    /// Reject vectors whose length differs from `dims`.
    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = Some(dims);
        self
    }

    /// Copy of every stored chunk, ordered by file path and index.
    pub fn snapshot(&self) -> Result<Vec<IndexedChunk>> {
        let mut all: Vec<IndexedChunk> = self.read()?.iter().map(|s| s.chunk.clone()).collect();
        all.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        Ok(all)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<StoredChunk>>> {
        self.chunks
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<StoredChunk>>> {
        self.chunks
            .write()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn insert_many(&self, chunks: &[NewChunk]) -> Result<InsertReport> {
        let (valid, mut report) = partition_valid(chunks, self.dims);
        let mut stored = self.write()?;
        for c in valid {
            stored.push(StoredChunk {
                chunk: IndexedChunk {
                    id: c.id.clone(),
                    repo_path: c.repo_path.clone(),
                    file_path: c.file_path.clone(),
                    commit_hash: c.commit_hash.clone(),
                    chunk_index: c.chunk_index,
                    content: c.content.clone(),
                },
                vector: c.vector.clone(),
            });
            report.inserted += 1;
        }
        Ok(report)
    }

    async fn delete_matching(&self, file_paths: &[String], commit_hash: &str) -> Result<u64> {
        let mut stored = self.write()?;
        let before = stored.len();
        stored.retain(|s| {
            !(s.chunk.commit_hash == commit_hash && file_paths.contains(&s.chunk.file_path))
        });
        Ok((before - stored.len()) as u64)
    }

    async fn delete_repo(&self, repo_path: &str) -> Result<u64> {
        let mut stored = self.write()?;
        let before = stored.len();
        stored.retain(|s| s.chunk.repo_path != repo_path);
        Ok((before - stored.len()) as u64)
    }

    async fn nearest_neighbors(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkHit>> {
        let stored = self.read()?;
        let mut hits: Vec<ChunkHit> = stored
            .iter()
            .filter(|s| match &filter.repo_path {
                Some(repo) => &s.chunk.repo_path == repo,
                None => true,
            })
            .map(|s| ChunkHit {
                chunk: s.chunk.clone(),
                distance: cosine_distance(query, &s.vector),
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn chunk_counts(&self, repo_path: &str) -> Result<Vec<CommitCount>> {
        let stored = self.read()?;
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for s in stored.iter().filter(|s| s.chunk.repo_path == repo_path) {
            *counts.entry(s.chunk.commit_hash.as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(commit_hash, chunks)| CommitCount {
                commit_hash: commit_hash.to_string(),
                chunks,
            })
            .collect())
    }

    async fn persist(&self) -> Result<()> {
        Ok(())
    }
}

/// Closest first; ties broken by file path and chunk index so results are
/// stable across runs.
pub(crate) fn sort_hits(hits: &mut [ChunkHit]) {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
}
