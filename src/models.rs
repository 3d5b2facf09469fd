//! Core data models shared by the scanner, reconciler, and sync driver.
//!
//! A [`DocumentSnapshot`] is what exists locally right now; a [`Decision`]
//! is what the reconciler concluded about it for this pass.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// One local document discovered during a pass.
///
/// Built fresh by the scanner on every pass and never persisted directly;
/// only its fields flow into cache entries.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    /// Logical identity, derived from the path relative to the corpus root.
    pub name: String,
    pub path: PathBuf,
    pub content_fingerprint: String,
    /// Declared in the document's frontmatter, unvalidated.
    pub created_at: Option<String>,
    /// Declared in the document's frontmatter, unvalidated.
    pub updated_at: Option<String>,
    pub body: Vec<u8>,
}

impl DocumentSnapshot {
    pub fn has_timestamps(&self) -> bool {
        self.created_at.is_some() && self.updated_at.is_some()
    }
}

/// Why a document is uploaded as new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddReason {
    /// The cache held no entries at all.
    Bootstrap,
    NewName,
    /// A previous upload never completed.
    MissingArtifact,
    CreatedAfterWatermark,
}

/// Why a known document is uploaded again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    DeclaredNewer,
    ContentChanged,
    Forced,
}

/// Why a document is left alone this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `created_at` or `updated_at` missing from the frontmatter.
    MissingTimestamps,
    /// A declared timestamp or the watermark could not be parsed.
    UnparsableTimestamps,
    Unchanged,
    /// No watermark to compare against.
    NoWatermark,
}

impl SkipReason {
    /// Skips where the reconciler could not decide. The cache entry for such
    /// a document is left exactly as it was.
    pub fn is_undecided(&self) -> bool {
        matches!(
            self,
            SkipReason::MissingTimestamps | SkipReason::UnparsableTimestamps
        )
    }
}

/// Classification of one local document for the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    Added(AddReason),
    Updated(UpdateReason),
    Skipped(SkipReason),
}

impl Decision {
    /// Whether the document's content is uploaded this pass.
    pub fn needs_upload(&self) -> bool {
        matches!(self, Decision::Added(_) | Decision::Updated(_))
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Added(AddReason::Bootstrap) => write!(f, "NEW (cold start)"),
            Decision::Added(AddReason::NewName) => write!(f, "NEW"),
            Decision::Added(AddReason::MissingArtifact) => write!(f, "NEW (retry)"),
            Decision::Added(AddReason::CreatedAfterWatermark) => write!(f, "NEW (created)"),
            Decision::Updated(UpdateReason::DeclaredNewer) => write!(f, "MODIFIED"),
            Decision::Updated(UpdateReason::ContentChanged) => write!(f, "MODIFIED (content)"),
            Decision::Updated(UpdateReason::Forced) => write!(f, "MODIFIED (forced)"),
            Decision::Skipped(SkipReason::MissingTimestamps) => {
                write!(f, "SKIPPED (missing timestamps)")
            }
            Decision::Skipped(SkipReason::UnparsableTimestamps) => {
                write!(f, "SKIPPED (unparsable timestamps)")
            }
            Decision::Skipped(SkipReason::Unchanged) => write!(f, "unchanged"),
            Decision::Skipped(SkipReason::NoWatermark) => write!(f, "unchanged (no watermark)"),
        }
    }
}

/// Added / updated / skipped totals for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassCounts {
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl PassCounts {
    pub fn record(&mut self, decision: &Decision) {
        match decision {
            Decision::Added(_) => self.added += 1,
            Decision::Updated(_) => self.updated += 1,
            Decision::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.added + self.updated + self.skipped
    }
}
