//! Persisted synchronization cache.
//!
//! The cache is the only record of what the remote store holds on our
//! behalf. It is a single JSON object keyed by document name, plus one
//! reserved `_metadata` key:
//!
//! ```json
//! {
//!   "_metadata": {
//!     "last_sync_time": "2024-03-01T12:00:00Z",
//!     "files_added": 2,
//!     "files_updated": 1,
//!     "files_skipped": 40
//!   },
//!   "adding-a-youtube-video.md": {
//!     "content_fingerprint": "9f86d0…",
//!     "created_at": "2024-01-05T10:00:00Z",
//!     "updated_at": "2024-02-01T08:30:00Z",
//!     "remote_artifact_id": "file-abc123",
//!     "path": "articles/adding-a-youtube-video.md",
//!     "last_synced_at": "2024-03-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! Loading never fails: a missing file is an empty cache, and an unreadable
//! or corrupt one is set aside and also treated as empty, which sends the
//! next pass down the bootstrap path. Saving is a full rewrite through a
//! temp file and rename, so readers only ever see a complete cache.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::{DocumentSnapshot, PassCounts};

/// Reserved key holding [`SyncMetadata`].
pub const METADATA_KEY: &str = "_metadata";

/// Last known synchronization state of one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, alias = "hash", skip_serializing_if = "Option::is_none")]
    pub content_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// `None` means the last upload attempt did not complete.
    #[serde(default, alias = "file_id")]
    pub remote_artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
    /// Fields this version does not know about, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Process-wide state stored under [`METADATA_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Watermark: start time of the last committed pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,
    #[serde(default)]
    pub files_added: u64,
    #[serde(default)]
    pub files_updated: u64,
    #[serde(default)]
    pub files_skipped: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pass_id: Option<String>,
}

impl SyncMetadata {
    pub fn counts(&self) -> PassCounts {
        PassCounts {
            added: self.files_added,
            updated: self.files_updated,
            skipped: self.files_skipped,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(rename = "_metadata", default)]
    metadata: SyncMetadata,
    #[serde(flatten)]
    entries: BTreeMap<String, CacheEntry>,
}

/// In-memory view of the cache file for one pass.
#[derive(Debug, Clone, Default)]
pub struct SyncCache {
    entries: BTreeMap<String, CacheEntry>,
    metadata: SyncMetadata,
}

impl SyncCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the cache at `path`, degrading to an empty cache on any problem.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no sync cache yet, starting fresh");
            return Self::new();
        }

        let parsed = fs::read_to_string(path)
            .with_context(|| format!("Failed to read sync cache: {}", path.display()))
            .and_then(|content| {
                serde_json::from_str::<CacheFile>(&content)
                    .with_context(|| format!("Failed to parse sync cache: {}", path.display()))
            });

        match parsed {
            Ok(file) => {
                let cache = Self {
                    entries: file.entries,
                    metadata: file.metadata,
                };
                tracing::debug!(
                    entries = cache.entries.len(),
                    last_sync_time = cache.metadata.last_sync_time.as_deref().unwrap_or("-"),
                    "loaded sync cache"
                );
                cache
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "sync cache is corrupt or unreadable, treating every document as new");
                set_aside(path);
                Self::new()
            }
        }
    }

    /// Rewrite the whole cache at `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = CacheFile {
            metadata: self.metadata.clone(),
            entries: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file).context("Failed to serialize sync cache")?;
        write_atomic(path, json.as_bytes())
            .with_context(|| format!("Failed to write sync cache: {}", path.display()))
    }

    pub fn entry(&self, name: &str) -> Option<&CacheEntry> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &CacheEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metadata(&self) -> &SyncMetadata {
        &self.metadata
    }

    /// Refresh the recorded timestamps and path for a document, keeping its
    /// artifact id, fingerprint and any unknown fields. Only
    /// [`record_upload`](Self::record_upload) sets the fingerprint.
    pub fn merge_snapshot(&mut self, doc: &DocumentSnapshot) {
        let entry = self.entries.entry(doc.name.clone()).or_default();
        entry.created_at = doc.created_at.clone();
        entry.updated_at = doc.updated_at.clone();
        entry.path = Some(doc.path.display().to_string());
    }

    /// Record the outcome of uploading `doc`. `None` marks an upload that did
    /// not complete so the next pass retries it.
    pub fn record_upload(&mut self, doc: &DocumentSnapshot, artifact_id: Option<String>, now: &str) {
        self.merge_snapshot(doc);
        if let Some(entry) = self.entries.get_mut(&doc.name) {
            entry.content_fingerprint = Some(doc.content_fingerprint.clone());
            if artifact_id.is_some() {
                entry.last_synced_at = Some(now.to_string());
            }
            entry.remote_artifact_id = artifact_id;
        }
    }

    /// Forget the live artifact of `name` without touching anything else.
    pub fn clear_artifact(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.remote_artifact_id = None;
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<CacheEntry> {
        self.entries.remove(name)
    }

    /// Advance the watermark and record this pass's totals.
    pub fn finish_pass(&mut self, now: &str, counts: PassCounts, pass_id: &str) {
        self.metadata.last_sync_time = Some(now.to_string());
        self.metadata.files_added = counts.added;
        self.metadata.files_updated = counts.updated;
        self.metadata.files_skipped = counts.skipped;
        self.metadata.last_pass_id = Some(pass_id.to_string());
    }
}

/// Copy a corrupt cache next to itself so its artifact ids are not lost
/// for manual recovery.
fn set_aside(path: &Path) {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".corrupt");
    let backup = PathBuf::from(backup);
    match fs::copy(path, &backup) {
        Ok(_) => tracing::warn!(backup = %backup.display(), "corrupt sync cache copied aside"),
        Err(e) => tracing::warn!(error = %e, "could not copy corrupt sync cache aside"),
    }
}

/// Write-to-temp-then-rename in the target's directory.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id()
    );
    let temp_path = path.with_file_name(temp_name);

    let result = (|| -> Result<()> {
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        temp_file.write_all(content)?;
        temp_file.sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
