//! Embedding pass of a reindex cycle.
//!
//! Coordinates the per-file flow: read → sanitize → chunk → embed → store.
//! Content failures skip the single file and are reported; embedding and
//! store failures abort the pass so the caller does not advance the tracked
//! revision.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::chunk::{sanitize, Chunker, TextChunk};
use crate::embedding::Embedder;
use crate::models::{NewChunk, SkipReason};
use crate::store::{IndexStore, InsertReport};

/// Totals for one embedding pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub files_embedded: u64,
    pub chunks_written: u64,
    /// Relative path and reason for each file left out.
    pub skipped: Vec<(String, SkipReason)>,
    pub inserts: InsertReport,
}

/// Turns files into stored, embedded chunks.
pub struct Ingestor {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn IndexStore>,
    batch_size: usize,
    max_file_bytes: u64,
}

impl Ingestor {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
        batch_size: usize,
        max_file_bytes: u64,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            batch_size: batch_size.max(1),
            max_file_bytes,
        }
    }

    /// Embed `files` (relative to `root`) and write their chunks tagged
    /// with `commit_hash`.
    ///
    /// Each file's chunks go to the store in a single `insert_many` call.
    pub async fn ingest_files(
        &self,
        root: &Path,
        repo_path: &str,
        files: &[String],
        commit_hash: &str,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for rel in files {
            let chunks = match self.prepare_file(root, rel) {
                Ok(chunks) => chunks,
                Err(reason) => {
                    tracing::warn!(file = %rel, %reason, "skipping file");
                    report.skipped.push((rel.clone(), reason));
                    continue;
                }
            };
            if chunks.is_empty() {
                report.skipped.push((rel.clone(), SkipReason::Empty));
                continue;
            }

            let file_path = absolute_path(root, rel);
            let vectors = self
                .embed_chunks(&chunks)
                .await
                .with_context(|| format!("Failed to embed {}", file_path))?;

            let records: Vec<NewChunk> = chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| NewChunk {
                    id: Uuid::new_v4().to_string(),
                    repo_path: repo_path.to_string(),
                    file_path: file_path.clone(),
                    commit_hash: commit_hash.to_string(),
                    chunk_index: chunk.index as i64,
                    hash: content_hash(&chunk.text),
                    content: chunk.text,
                    vector,
                })
                .collect();

            let inserted = self
                .store
                .insert_many(&records)
                .await
                .with_context(|| format!("Failed to store chunks for {}", file_path))?;

            tracing::info!(
                file = %rel,
                chunks = inserted.inserted,
                rejected = inserted.rejected.len(),
                "embedded file"
            );

            if inserted.inserted > 0 {
                report.files_embedded += 1;
            }
            report.chunks_written += inserted.inserted;
            report.inserts.absorb(inserted);
        }

        Ok(report)
    }

    /// Read, sanitize, and chunk one file.
    pub fn prepare_file(&self, root: &Path, rel: &str) -> Result<Vec<TextChunk>, SkipReason> {
        let path = root.join(rel);
        let meta = std::fs::metadata(&path).map_err(|_| SkipReason::Unreadable)?;
        if meta.len() > self.max_file_bytes {
            return Err(SkipReason::TooLarge);
        }
        let raw = std::fs::read(&path).map_err(|_| SkipReason::Unreadable)?;
        let text = sanitize(&raw)?;
        Ok(self.chunker.chunk(&path, &text))
    }

    async fn embed_chunks(&self, chunks: &[TextChunk]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self.embedder.embed(&texts).await?;
            if embedded.len() != texts.len() {
                anyhow::bail!(
                    "Embedder returned {} vectors for {} chunks",
                    embedded.len(),
                    texts.len()
                );
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

/// Absolute path string stored for the file `rel` under `root`.
pub fn absolute_path(root: &Path, rel: &str) -> String {
    root.join(rel).to_string_lossy().into_owned()
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
pub(crate) mod testing {
    use anyhow::Result;
    use async_trait::async_trait;
    use sha2::{Digest, Sha256};

    use crate::embedding::Embedder;

    /// Embeds text by hashing its words into a fixed number of buckets.
    pub struct HashEmbedder {
        pub dims: usize,
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        fn model_name(&self) -> &str {
            "hash"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dims];
                    for word in t.split_whitespace() {
                        let digest = Sha256::digest(word.to_lowercase().as_bytes());
                        v[digest[0] as usize % self.dims] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }
}
