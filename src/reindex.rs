//! Reindex orchestrator.
//!
//! A cycle walks `Clean → Detecting → Dirty → Purging → Embedding →
//! Committed → Clean`, or `Detecting → Clean` when nothing drifted. The
//! tracked revision is advanced last, and only when every earlier step
//! succeeded, so a failed cycle is retried in full on the next trigger.
//!
//! A repository without a metadata record has never been fully indexed.
//! Its first cycle, whatever the trigger, is a full index, and the record
//! is only written once that succeeds.
//!
//! Cycles are serialised by a `tokio::sync::Mutex` around the repository
//! metadata. Readers of the index store are never blocked.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::detect::{detect, DetectMode};
use crate::embedding::Embedder;
use crate::ingest::{absolute_path, IngestReport, Ingestor};
use crate::metadata::{repo_key, MetadataStore};
use crate::models::{CommitCount, RepoMetadata};
use crate::scanner::CorpusScanner;
use crate::store::IndexStore;
use crate::vcs::Vcs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReindexPhase {
    Clean = 0,
    Detecting = 1,
    Dirty = 2,
    Purging = 3,
    Embedding = 4,
    Committed = 5,
}

impl ReindexPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ReindexPhase::Detecting,
            2 => ReindexPhase::Dirty,
            3 => ReindexPhase::Purging,
            4 => ReindexPhase::Embedding,
            5 => ReindexPhase::Committed,
            _ => ReindexPhase::Clean,
        }
    }
}

/// What a cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// `false` when detection found no drift.
    pub committed: bool,
    pub previous_revision: String,
    pub current_revision: String,
    /// Absolute paths of the changed files.
    pub changed: Vec<String>,
    pub purged: u64,
    pub ingest: IngestReport,
}

/// Tracked and live state of a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoStatus {
    pub repo_path: String,
    /// `false` until a full index has completed.
    pub indexed: bool,
    pub tracked_revision: String,
    pub current_revision: String,
    pub chunk_counts: Vec<CommitCount>,
}

impl RepoStatus {
    pub fn drifted(&self) -> bool {
        self.tracked_revision != self.current_revision
    }
}

struct Tracked {
    metadata: RepoMetadata,
    indexed: bool,
}

pub struct Orchestrator {
    root: PathBuf,
    repo_path: String,
    vcs: Arc<dyn Vcs>,
    store: Arc<dyn IndexStore>,
    scanner: CorpusScanner,
    ingestor: Ingestor,
    metadata_store: MetadataStore,
    state: Mutex<Tracked>,
    phase: AtomicU8,
}

impl Orchestrator {
    /// Set up the orchestrator for the repository at `root`. The boolean is
    /// `true` for a repository that has not been fully indexed yet.
    pub fn open(
        root: &Path,
        config: &Config,
        vcs: Arc<dyn Vcs>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
    ) -> Result<(Self, bool)> {
        let repo_path = repo_key(root);
        let root = PathBuf::from(&repo_path);
        let scanner = CorpusScanner::new(&root, &config.scanner)?;
        let metadata_store = MetadataStore::new(&config.metadata.dir);
        let (metadata, is_new) =
            metadata_store.load_or_seed(&repo_path, || vcs.current_revision(&root))?;

        let ingestor = Ingestor::new(
            Chunker::new(&config.chunking),
            embedder,
            store.clone(),
            config.embedding.batch_size,
            config.scanner.max_file_bytes,
        );

        Ok((
            Self {
                root,
                repo_path,
                vcs,
                store,
                scanner,
                ingestor,
                metadata_store,
                state: Mutex::new(Tracked {
                    metadata,
                    indexed: !is_new,
                }),
                phase: AtomicU8::new(ReindexPhase::Clean as u8),
            },
            is_new,
        ))
    }

    pub fn repo_path(&self) -> &str {
        &self.repo_path
    }

    pub fn phase(&self) -> ReindexPhase {
        ReindexPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// The revision the index currently reflects.
    pub async fn tracked_revision(&self) -> String {
        self.state.lock().await.metadata.last_known_commit_hash.clone()
    }

    /// Whether a full index of the repository has ever completed.
    pub async fn is_indexed(&self) -> bool {
        self.state.lock().await.indexed
    }

    fn set_phase(&self, phase: ReindexPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        tracing::debug!(repo = %self.repo_path, ?phase, "reindex phase");
    }

    /// Run one detect → purge → embed → commit cycle, or a full index when
    /// the repository has never been indexed.
    pub async fn run_cycle(&self, mode: DetectMode) -> Result<CycleReport> {
        let mut state = self.state.lock().await;
        let result = if state.indexed {
            self.cycle(&mut state, mode).await
        } else {
            tracing::info!(repo = %self.repo_path, "repository not indexed yet, running full index");
            self.full_index(&mut state).await
        };
        self.set_phase(ReindexPhase::Clean);
        result
    }

    async fn cycle(&self, state: &mut Tracked, mode: DetectMode) -> Result<CycleReport> {
        self.set_phase(ReindexPhase::Detecting);
        let drift = match detect(self.vcs.as_ref(), &state.metadata, mode)? {
            Some(drift) => drift,
            None => {
                tracing::debug!(repo = %self.repo_path, "no drift");
                return Ok(CycleReport {
                    committed: false,
                    previous_revision: state.metadata.last_known_commit_hash.clone(),
                    current_revision: state.metadata.last_known_commit_hash.clone(),
                    ..Default::default()
                });
            }
        };

        self.set_phase(ReindexPhase::Dirty);
        tracing::info!(
            repo = %self.repo_path,
            from = %drift.previous_revision,
            to = %drift.current_revision,
            changed = drift.changed.len(),
            "drift detected"
        );
        let changed: Vec<String> = drift
            .changed
            .iter()
            .map(|rel| absolute_path(&self.root, rel))
            .collect();

        self.set_phase(ReindexPhase::Purging);
        let mut purged = self
            .store
            .delete_matching(&changed, &drift.previous_revision)
            .await
            .context("Failed to purge stale chunks")?;
        // Leftovers of an earlier attempt that failed before committing.
        if drift.current_revision != drift.previous_revision {
            purged += self
                .store
                .delete_matching(&changed, &drift.current_revision)
                .await
                .context("Failed to purge stale chunks")?;
        }
        tracing::info!(repo = %self.repo_path, purged, "purged stale chunks");

        self.set_phase(ReindexPhase::Embedding);
        let files = self.scanner.scan(Some(drift.changed.as_slice()))?;
        let ingest = self
            .ingestor
            .ingest_files(&self.root, &self.repo_path, &files, &drift.current_revision)
            .await?;

        self.set_phase(ReindexPhase::Committed);
        self.commit(state, &drift.current_revision).await?;

        Ok(CycleReport {
            committed: true,
            previous_revision: drift.previous_revision,
            current_revision: drift.current_revision,
            changed,
            purged,
            ingest,
        })
    }

    /// Drop every chunk of the repository and embed the whole corpus at the
    /// current revision.
    pub async fn rebuild(&self) -> Result<CycleReport> {
        let mut state = self.state.lock().await;
        let result = self.full_index(&mut state).await;
        self.set_phase(ReindexPhase::Clean);
        result
    }

    async fn full_index(&self, state: &mut Tracked) -> Result<CycleReport> {
        self.set_phase(ReindexPhase::Detecting);
        let current = self
            .vcs
            .current_revision(&self.root)
            .with_context(|| format!("Failed to resolve current revision of {}", self.repo_path))?;

        self.set_phase(ReindexPhase::Purging);
        let purged = self
            .store
            .delete_repo(&self.repo_path)
            .await
            .context("Failed to clear repository chunks")?;

        self.set_phase(ReindexPhase::Embedding);
        let files = self.scanner.scan(None)?;
        tracing::info!(repo = %self.repo_path, files = files.len(), revision = %current, "full index");
        let ingest = self
            .ingestor
            .ingest_files(&self.root, &self.repo_path, &files, &current)
            .await?;

        self.set_phase(ReindexPhase::Committed);
        let previous = state.metadata.last_known_commit_hash.clone();
        self.commit(state, &current).await?;

        Ok(CycleReport {
            committed: true,
            previous_revision: previous,
            current_revision: current,
            changed: files.iter().map(|rel| absolute_path(&self.root, rel)).collect(),
            purged,
            ingest,
        })
    }

    async fn commit(&self, state: &mut Tracked, revision: &str) -> Result<()> {
        let next = RepoMetadata {
            repo_path: self.repo_path.clone(),
            last_known_commit_hash: revision.to_string(),
        };
        self.store.persist().await?;
        self.metadata_store.save(&next)?;
        state.metadata = next;
        state.indexed = true;
        tracing::info!(repo = %self.repo_path, revision, "advanced tracked revision");
        Ok(())
    }

    pub async fn status(&self) -> Result<RepoStatus> {
        let (tracked_revision, indexed) = {
            let state = self.state.lock().await;
            (state.metadata.last_known_commit_hash.clone(), state.indexed)
        };
        let current_revision = self.vcs.current_revision(&self.root)?;
        let chunk_counts = self.store.chunk_counts(&self.repo_path).await?;
        Ok(RepoStatus {
            repo_path: self.repo_path.clone(),
            indexed,
            tracked_revision,
            current_revision,
            chunk_counts,
        })
    }

    /// Run committed-diff cycles every `interval` until the task is aborted.
    /// Failures are logged and retried on the next tick.
    pub fn spawn_poller(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let this = self;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match this.run_cycle(DetectMode::CommittedDiff).await {
                    Ok(report) if report.committed => {
                        tracing::info!(
                            repo = %this.repo_path,
                            files = report.ingest.files_embedded,
                            chunks = report.ingest.chunks_written,
                            "background reindex complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(repo = %this.repo_path, error = %format!("{:#}", e), "reindex cycle failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::detect::fake::FakeVcs;
    use crate::ingest::testing::HashEmbedder;
    use crate::store::memory::InMemoryStore;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        root: PathBuf,
        vcs: Arc<FakeVcs>,
        store: Arc<InMemoryStore>,
        orchestrator: Orchestrator,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/a.ts"), "export const a = 1;\n").unwrap();
        std::fs::write(root.join("README.md"), "# Readme\n\nHello.\n").unwrap();

        let mut config = Config::default();
        config.metadata.dir = tmp.path().join("metadatas");
        config.scanner.respect_gitignore = false;

        let vcs = Arc::new(FakeVcs::at("r1"));
        let store = Arc::new(InMemoryStore::new());
        let (orchestrator, is_new) = Orchestrator::open(
            &root,
            &config,
            vcs.clone(),
            Arc::new(HashEmbedder { dims: 8 }),
            store.clone(),
        )
        .unwrap();
        assert!(is_new);

        Fixture {
            tmp,
            root,
            vcs,
            store,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_no_drift_is_noop() {
        let f = fixture();
        f.orchestrator.rebuild().await.unwrap();
        let report = f.orchestrator.run_cycle(DetectMode::CommittedDiff).await.unwrap();
        assert!(!report.committed);
        assert_eq!(report.purged, 0);
        assert_eq!(report.ingest.files_embedded, 0);
        assert_eq!(f.orchestrator.phase(), ReindexPhase::Clean);
    }

    #[tokio::test]
    async fn test_cycle_purges_and_reembeds_changed_file() {
        let f = fixture();
        f.orchestrator.rebuild().await.unwrap();
        assert_eq!(f.store.snapshot().unwrap().len(), 2);

        std::fs::write(f.root.join("src/a.ts"), "export const a = 2;\n").unwrap();
        *f.vcs.revision.lock().unwrap() = Some("r2".to_string());
        *f.vcs.committed.lock().unwrap() = vec!["src/a.ts".to_string()];

        let report = f.orchestrator.run_cycle(DetectMode::CommittedDiff).await.unwrap();
        assert!(report.committed);
        assert_eq!(report.purged, 1);
        assert_eq!(report.ingest.files_embedded, 1);
        assert_eq!(f.orchestrator.tracked_revision().await, "r2");

        let chunks = f.store.snapshot().unwrap();
        let a = absolute_path(&f.root, "src/a.ts");
        let readme = absolute_path(&f.root, "README.md");
        assert!(chunks.iter().filter(|c| c.file_path == a).all(|c| c.commit_hash == "r2"));
        assert!(chunks.iter().any(|c| c.file_path == a && c.content.contains("= 2")));
        assert!(chunks.iter().filter(|c| c.file_path == readme).all(|c| c.commit_hash == "r1"));
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_revision_and_retry_converges() {
        let f = fixture();
        f.orchestrator.rebuild().await.unwrap();

        *f.vcs.revision.lock().unwrap() = None;
        assert!(f.orchestrator.run_cycle(DetectMode::CommittedDiff).await.is_err());
        assert_eq!(f.orchestrator.tracked_revision().await, "r1");
        assert_eq!(f.orchestrator.phase(), ReindexPhase::Clean);

        // A half-finished earlier attempt left r2 chunks behind.
        let a = absolute_path(&f.root, "src/a.ts");
        let mut leftover = crate::store::test_chunk(&a, "r2", 0, vec![1.0; 8]);
        leftover.repo_path = f.orchestrator.repo_path().to_string();
        f.store.insert(&leftover).await.unwrap();

        *f.vcs.revision.lock().unwrap() = Some("r2".to_string());
        *f.vcs.committed.lock().unwrap() = vec!["src/a.ts".to_string()];
        let report = f.orchestrator.run_cycle(DetectMode::CommittedDiff).await.unwrap();
        assert_eq!(report.purged, 2);

        let a_chunks: Vec<_> = f
            .store
            .snapshot()
            .unwrap()
            .into_iter()
            .filter(|c| c.file_path == a)
            .collect();
        assert_eq!(a_chunks.len(), 1);
        assert_eq!(a_chunks[0].commit_hash, "r2");
    }

    #[tokio::test]
    async fn test_working_tree_mode_without_new_commit() {
        let f = fixture();
        f.orchestrator.rebuild().await.unwrap();

        std::fs::write(f.root.join("b.js"), "module.exports = 42;\n").unwrap();
        *f.vcs.working.lock().unwrap() = vec!["b.js".to_string()];

        let committed = f.orchestrator.run_cycle(DetectMode::CommittedDiff).await.unwrap();
        assert!(!committed.committed);

        let forced = f.orchestrator.run_cycle(DetectMode::WorkingTree).await.unwrap();
        assert!(forced.committed);
        assert_eq!(forced.changed, vec![absolute_path(&f.root, "b.js")]);
        let b = absolute_path(&f.root, "b.js");
        assert!(f.store.snapshot().unwrap().iter().any(|c| c.file_path == b && c.commit_hash == "r1"));
    }

    #[tokio::test]
    async fn test_failed_first_index_is_retried_after_restart() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();
        let mut config = Config::default();
        config.metadata.dir = tmp.path().join("metadatas");
        config.scanner.respect_gitignore = false;
        let vcs = Arc::new(FakeVcs::at("r1"));
        let store = Arc::new(InMemoryStore::new());

        let (down, is_new) = Orchestrator::open(
            &root,
            &config,
            vcs.clone(),
            Arc::new(crate::embedding::DisabledEmbedder),
            store.clone(),
        )
        .unwrap();
        assert!(is_new);
        assert!(down.rebuild().await.is_err());
        assert!(!down.is_indexed().await);
        assert!(MetadataStore::new(&config.metadata.dir)
            .load(down.repo_path())
            .unwrap()
            .is_none());

        let (up, is_new) = Orchestrator::open(
            &root,
            &config,
            vcs.clone(),
            Arc::new(HashEmbedder { dims: 8 }),
            store.clone(),
        )
        .unwrap();
        assert!(is_new);

        // Even a plain committed-diff cycle indexes everything.
        let report = up.run_cycle(DetectMode::CommittedDiff).await.unwrap();
        assert!(report.committed);
        assert_eq!(report.ingest.files_embedded, 1);
        assert!(up.is_indexed().await);
        let status = up.status().await.unwrap();
        assert!(status.indexed);
        assert_eq!(status.chunk_counts.len(), 1);
        assert_eq!(status.chunk_counts[0].commit_hash, "r1");
        assert!(MetadataStore::new(&config.metadata.dir)
            .load(up.repo_path())
            .unwrap()
            .is_some());

        let again = up.run_cycle(DetectMode::CommittedDiff).await.unwrap();
        assert!(!again.committed);
    }

    #[tokio::test]
    async fn test_metadata_survives_reopen() {
        let f = fixture();
        *f.vcs.revision.lock().unwrap() = Some("r9".to_string());
        f.orchestrator.rebuild().await.unwrap();

        let mut config = Config::default();
        config.metadata.dir = f.tmp.path().join("metadatas");
        let (reopened, is_new) = Orchestrator::open(
            &f.root,
            &config,
            f.vcs.clone(),
            Arc::new(HashEmbedder { dims: 8 }),
            f.store.clone(),
        )
        .unwrap();
        assert!(!is_new);
        assert_eq!(reopened.tracked_revision().await, "r9");
    }
}
