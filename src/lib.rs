//! # repo-chat
//!
//! A command-line assistant that mirrors a local git repository into a
//! vector index and answers questions about it with retrieval-augmented
//! chat.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────┐   ┌──────────────┐
//! │  detect  │──▶│   reindex    │──▶│ scanner │──▶│ chunk+embed  │
//! │ (git)    │   │ orchestrator │   └─────────┘   └──────┬───────┘
//! └──────────┘   └──────┬───────┘                        │
//!                       │ purge                          ▼ insert
//!                       └──────────────────────▶ ┌──────────────┐
//!                                                │ index store  │
//! ┌──────────┐   ┌──────────────┐  nearest       │ sqlite / mem │
//! │   repl   │──▶│ chat session │──────────────▶ └──────────────┘
//! └──────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`metadata`] | Per-repository tracked revision |
//! | [`vcs`] | Git capability |
//! | [`detect`] | Change detection |
//! | [`scanner`] | Corpus scanning and ignore rules |
//! | [`chunk`] | Language-aware text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Streaming chat provider abstraction |
//! | [`store`] | Index store contract and engines |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`ingest`] | Read, chunk, embed and store files |
//! | [`reindex`] | Reindex state machine and poller |
//! | [`session`] | Conversation history and answer composition |
//! | [`repl`] | Interactive loop |

pub mod chunk;
pub mod config;
pub mod db;
pub mod detect;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod reindex;
pub mod repl;
pub mod scanner;
pub mod session;
pub mod store;
pub mod vcs;
