//! Core data models used throughout the indexing and chat pipeline.
//!
//! These types represent the tracked repository state, the chunks written to
//! and read from the index, and the turns of a conversation.

use serde::{Deserialize, Serialize};

/// Per-repository tracking record, persisted as JSON.
///
/// `last_known_commit_hash` is the revision the index is believed to
/// reflect. Only the reindex orchestrator advances it, and only after a
/// cycle has fully succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMetadata {
    pub repo_path: String,
    pub last_known_commit_hash: String,
}

/// A chunk ready to be written to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub id: String,
    pub repo_path: String,
    /// Absolute path of the originating file.
    pub file_path: String,
    pub commit_hash: String,
    pub chunk_index: i64,
    pub content: String,
    /// SHA-256 of `content`.
    pub hash: String,
    pub vector: Vec<f32>,
}

/// A chunk as read back from the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedChunk {
    pub id: String,
    pub repo_path: String,
    pub file_path: String,
    pub commit_hash: String,
    pub chunk_index: i64,
    pub content: String,
}

/// A nearest-neighbor result. Lower `distance` is closer.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk: IndexedChunk,
    pub distance: f32,
}

/// Number of live chunks tagged with one commit hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCount {
    pub commit_hash: String,
    pub chunks: u64,
}

/// One answered question in a chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Why a file was left out of an embedding pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unreadable,
    Binary,
    Empty,
    TooLarge,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::Unreadable => "unreadable",
            SkipReason::Binary => "binary content",
            SkipReason::Empty => "empty after sanitization",
            SkipReason::TooLarge => "too large",
        };
        f.write_str(s)
    }
}
