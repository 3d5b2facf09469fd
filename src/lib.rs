//! # Corpus Sync
//!
//! Incremental synchronization of a local markdown corpus into a hosted
//! vector store.
//!
//! Each pass compares the documents on disk against a persistent local cache,
//! uploads only what was added or changed, retires superseded remote copies,
//! and commits the new state so the next pass starts from an accurate
//! picture of what the store holds.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────┐   ┌────────────┐
//! │  Corpus  │──▶│ Reconciler │──▶│  Driver  │──▶│  Gateway   │
//! │ scan+fm  │   │  (pure)    │   │ (phases) │   │  OpenAI    │
//! └──────────┘   └─────┬──────┘   └────┬─────┘   └────────────┘
//!                      │               │
//!                      └──── Cache ◀───┘
//!                         (JSON file)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! csync sync --dry-run           # show what would change
//! csync sync                     # run one pass
//! csync sync --full --prune      # re-upload everything, drop deleted docs
//! csync status                   # cache and last-pass summary
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Snapshots, decisions, counters |
//! | [`frontmatter`] | Timestamp extraction from frontmatter |
//! | [`fingerprint`] | Content digests |
//! | [`corpus`] | Directory scanning |
//! | [`cache`] | Persistent sync cache |
//! | [`reconcile`] | Per-document change classification |
//! | [`gateway`] | Remote store abstraction (OpenAI, in-memory) |
//! | [`sync`] | Pass orchestration |
//! | [`report`] | Execution reports and status |
//! | [`progress`] | Progress events on stderr |
//! | [`logging`] | Tracing subscriber setup |

pub mod cache;
pub mod config;
pub mod corpus;
pub mod fingerprint;
pub mod frontmatter;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod progress;
pub mod reconcile;
pub mod report;
pub mod sync;
