//! SQLite-backed [`IndexStore`] implementation.
//!
//! Chunk rows live in `chunks`, their vectors in `chunk_vectors` as
//! little-endian `f32` BLOBs. Nearest-neighbor search loads the candidate
//! vectors for one repository and ranks them by cosine distance.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::migrate;
use crate::models::{ChunkHit, CommitCount, IndexedChunk, NewChunk};

use super::memory::sort_hits;
use super::{partition_valid, IndexStore, InsertReport, SearchFilter};

/// Upper bound on `IN (...)` list length per statement.
const MAX_IN_PARAMS: usize = 500;

pub struct SqliteStore {
    pool: SqlitePool,
    group_size: usize,
    dims: Option<usize>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            group_size: 1000,
            dims: None,
        }
    }

    /// Connect to the database at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        tracing::debug!(path = %path.display(), "opened index store");
        Ok(Self::new(pool))
    }

    /// Number of records committed per insert transaction.
    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size.max(1);
        self
    }

    /// Reject vectors whose length differs from `dims`.
    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = Some(dims);
        self
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn insert_many(&self, chunks: &[NewChunk]) -> Result<InsertReport> {
        let (valid, mut report) = partition_valid(chunks, self.dims);
        let now = chrono::Utc::now().timestamp();

        for group in valid.chunks(self.group_size) {
            let mut tx = self.pool.begin().await?;

            for chunk in group {
                sqlx::query(
                    r#"
                    INSERT INTO chunks (id, repo_path, file_path, commit_hash, chunk_index,
                                        content, hash, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&chunk.id)
                .bind(&chunk.repo_path)
                .bind(&chunk.file_path)
                .bind(&chunk.commit_hash)
                .bind(chunk.chunk_index)
                .bind(&chunk.content)
                .bind(&chunk.hash)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                let blob = vec_to_blob(&chunk.vector);
                sqlx::query("INSERT INTO chunk_vectors (chunk_id, dims, embedding) VALUES (?, ?, ?)")
                    .bind(&chunk.id)
                    .bind(chunk.vector.len() as i64)
                    .bind(&blob)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            report.inserted += group.len() as u64;
        }

        Ok(report)
    }

    async fn delete_matching(&self, file_paths: &[String], commit_hash: &str) -> Result<u64> {
        if file_paths.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;

        for group in file_paths.chunks(MAX_IN_PARAMS) {
            let marks = placeholders(group.len());

            let vectors_sql = format!(
                "DELETE FROM chunk_vectors WHERE chunk_id IN \
                 (SELECT id FROM chunks WHERE commit_hash = ? AND file_path IN ({}))",
                marks
            );
            let mut q = sqlx::query(&vectors_sql).bind(commit_hash);
            for path in group {
                q = q.bind(path);
            }
            q.execute(&mut *tx).await?;

            let chunks_sql = format!(
                "DELETE FROM chunks WHERE commit_hash = ? AND file_path IN ({})",
                marks
            );
            let mut q = sqlx::query(&chunks_sql).bind(commit_hash);
            for path in group {
                q = q.bind(path);
            }
            deleted += q.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }

    async fn delete_repo(&self, repo_path: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE repo_path = ?)",
        )
        .bind(repo_path)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM chunks WHERE repo_path = ?")
            .bind(repo_path)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }

    async fn nearest_neighbors(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.repo_path, c.file_path, c.commit_hash, c.chunk_index, c.content,
                   v.embedding
            FROM chunks c
            JOIN chunk_vectors v ON v.chunk_id = c.id
            WHERE (? IS NULL OR c.repo_path = ?)
            "#,
        )
        .bind(filter.repo_path.as_deref())
        .bind(filter.repo_path.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<ChunkHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                ChunkHit {
                    chunk: IndexedChunk {
                        id: row.get("id"),
                        repo_path: row.get("repo_path"),
                        file_path: row.get("file_path"),
                        commit_hash: row.get("commit_hash"),
                        chunk_index: row.get("chunk_index"),
                        content: row.get("content"),
                    },
                    distance: cosine_distance(query, &vector),
                }
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn chunk_counts(&self, repo_path: &str) -> Result<Vec<CommitCount>> {
        let rows = sqlx::query(
            r#"
            SELECT commit_hash, COUNT(*) AS n
            FROM chunks
            WHERE repo_path = ?
            GROUP BY commit_hash
            ORDER BY commit_hash
            "#,
        )
        .bind(repo_path)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let n: i64 = row.get("n");
                CommitCount {
                    commit_hash: row.get("commit_hash"),
                    chunks: n as u64,
                }
            })
            .collect())
    }

    async fn persist(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_chunk;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("data").join("index.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn test_insert_search_and_reopen() {
        let (tmp, store) = open_temp().await;
        let report = store
            .insert_many(&[
                test_chunk("/repo/a.ts", "r1", 0, vec![1.0, 0.0]),
                test_chunk("/repo/b.ts", "r1", 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(report.inserted, 2);
        store.persist().await.unwrap();
        store.close().await;

        let reopened = SqliteStore::open(&tmp.path().join("data").join("index.sqlite"))
            .await
            .unwrap();
        let hits = reopened
            .nearest_neighbors(&[1.0, 0.1], 2, &SearchFilter::repo("/repo"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.file_path, "/repo/a.ts");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_delete_matching_counts_pairs_once() {
        let (_tmp, store) = open_temp().await;
        store
            .insert_many(&[
                test_chunk("/repo/a.ts", "r1", 0, vec![1.0]),
                test_chunk("/repo/a.ts", "r1", 1, vec![1.0]),
                test_chunk("/repo/a.ts", "r2", 0, vec![1.0]),
                test_chunk("/repo/c.ts", "r1", 0, vec![1.0]),
            ])
            .await
            .unwrap();

        let deleted = store
            .delete_matching(&["/repo/a.ts".to_string(), "/repo/gone.ts".to_string()], "r1")
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let counts = store.chunk_counts("/repo").await.unwrap();
        assert_eq!(
            counts,
            vec![
                CommitCount { commit_hash: "r1".to_string(), chunks: 1 },
                CommitCount { commit_hash: "r2".to_string(), chunks: 1 },
            ]
        );

        let orphans: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunk_vectors WHERE chunk_id NOT IN (SELECT id FROM chunks)",
        )
        .fetch_one(&store.pool)
        .await
        .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn test_small_groups_and_rejections() {
        let (_tmp, store) = open_temp().await;
        let store = store.with_group_size(2).with_dims(1);
        let mut chunks: Vec<NewChunk> = (0..5)
            .map(|i| test_chunk("/repo/big.ts", "r1", i, vec![1.0]))
            .collect();
        chunks.push(test_chunk("/repo/bad.ts", "r1", 0, vec![f32::INFINITY]));

        let report = store.insert_many(&chunks).await.unwrap();
        assert_eq!(report.inserted, 5);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(store.chunk_counts("/repo").await.unwrap()[0].chunks, 5);
    }

    #[tokio::test]
    async fn test_delete_repo_leaves_others() {
        let (_tmp, store) = open_temp().await;
        let mut other = test_chunk("/other/x.ts", "r1", 0, vec![1.0]);
        other.repo_path = "/other".to_string();
        store
            .insert_many(&[test_chunk("/repo/a.ts", "r1", 0, vec![1.0]), other])
            .await
            .unwrap();

        assert_eq!(store.delete_repo("/repo").await.unwrap(), 1);
        assert!(store.chunk_counts("/repo").await.unwrap().is_empty());
        assert_eq!(store.chunk_counts("/other").await.unwrap().len(), 1);
    }
}
