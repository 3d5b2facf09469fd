//! In-memory [`ArtifactGateway`] implementation for tests and dry runs.
//!
//! Artifacts live in a `HashMap` behind `std::sync::Mutex`. Individual
//! operations can be made to fail so callers can exercise partial-failure
//! paths without a network.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ArtifactGateway, AttachReceipt, DeleteOutcome, GatewayError, GatewayResult, IngestionStatus,
    UploadedArtifact,
};

struct StoredArtifact {
    name: String,
    content: Vec<u8>,
}

#[derive(Default)]
struct State {
    artifacts: HashMap<String, StoredArtifact>,
    collections: HashMap<String, Vec<String>>,
    last_batch: HashMap<String, Vec<String>>,
    failing_uploads: HashSet<String>,
    failing_deletes: HashSet<String>,
    fail_attach: bool,
    stall_ingestion: bool,
    failed_ingestion: u64,
    calls: CallCounts,
}

/// Number of calls made per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub uploads: u64,
    pub deletes: u64,
    pub attaches: u64,
    pub status_polls: u64,
}

/// In-memory artifact store.
pub struct MemoryGateway {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Make every upload of the document `name` fail.
    pub fn fail_uploads_for(&self, name: &str) {
        self.state.lock().unwrap().failing_uploads.insert(name.to_string());
    }

    /// Make deletion of `artifact_id` fail.
    pub fn fail_deletes_for(&self, artifact_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(artifact_id.to_string());
    }

    pub fn fail_attach(&self, fail: bool) {
        self.state.lock().unwrap().fail_attach = fail;
    }

    /// Keep attached batches "in progress" forever.
    pub fn stall_ingestion(&self, stall: bool) {
        self.state.lock().unwrap().stall_ingestion = stall;
    }

    /// Report up to `count` artifacts of each attached batch as failed to
    /// ingest.
    pub fn fail_ingestion(&self, count: u64) {
        self.state.lock().unwrap().failed_ingestion = count;
    }

    /// Clear all injected failures.
    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_uploads.clear();
        state.failing_deletes.clear();
        state.fail_attach = false;
        state.stall_ingestion = false;
        state.failed_ingestion = 0;
    }

    pub fn contains(&self, artifact_id: &str) -> bool {
        self.state.lock().unwrap().artifacts.contains_key(artifact_id)
    }

    pub fn artifact_count(&self) -> usize {
        self.state.lock().unwrap().artifacts.len()
    }

    /// Content of a live artifact.
    pub fn content(&self, artifact_id: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .artifacts
            .get(artifact_id)
            .map(|a| a.content.clone())
    }

    /// Document names that currently have more than one live artifact.
    pub fn duplicate_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut seen = HashMap::<&str, usize>::new();
        for artifact in state.artifacts.values() {
            *seen.entry(artifact.name.as_str()).or_default() += 1;
        }
        let mut dupes: Vec<String> = seen
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(name, _)| name.to_string())
            .collect();
        dupes.sort();
        dupes
    }

    /// Live artifact ids attached to `collection`.
    pub fn attached(&self, collection: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .collections
            .get(collection)
            .map(|ids| {
                ids.iter()
                    .filter(|id| state.artifacts.contains_key(*id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().unwrap().calls
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactGateway for MemoryGateway {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload(&self, name: &str, content: &[u8]) -> GatewayResult<UploadedArtifact> {
        let mut state = self.state.lock().unwrap();
        state.calls.uploads += 1;
        if state.failing_uploads.contains(name) {
            return Err(GatewayError::Rejected {
                operation: "upload",
                subject: name.to_string(),
            });
        }
        let id = format!("file-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        state.artifacts.insert(
            id.clone(),
            StoredArtifact {
                name: name.to_string(),
                content: content.to_vec(),
            },
        );
        Ok(UploadedArtifact { id })
    }

    async fn delete(&self, artifact_id: &str) -> GatewayResult<DeleteOutcome> {
        let mut state = self.state.lock().unwrap();
        state.calls.deletes += 1;
        if state.failing_deletes.contains(artifact_id) {
            return Err(GatewayError::Rejected {
                operation: "delete",
                subject: artifact_id.to_string(),
            });
        }
        match state.artifacts.remove(artifact_id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    async fn attach(&self, artifact_ids: &[String], collection: &str) -> GatewayResult<AttachReceipt> {
        let mut state = self.state.lock().unwrap();
        state.calls.attaches += 1;
        if state.fail_attach {
            return Err(GatewayError::Rejected {
                operation: "attach",
                subject: collection.to_string(),
            });
        }
        if let Some(missing) = artifact_ids.iter().find(|id| !state.artifacts.contains_key(*id)) {
            return Err(GatewayError::Http {
                status: 404,
                body: format!("No such file: {}", missing),
            });
        }
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(artifact_ids.iter().cloned());
        state
            .last_batch
            .insert(collection.to_string(), artifact_ids.to_vec());
        let batch_id = format!("batch-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(AttachReceipt {
            batch_id: Some(batch_id),
        })
    }

    async fn ingestion_status(&self, collection: &str) -> GatewayResult<IngestionStatus> {
        let mut state = self.state.lock().unwrap();
        state.calls.status_polls += 1;
        let total = state
            .last_batch
            .get(collection)
            .map(|ids| ids.len() as u64)
            .unwrap_or(0);
        if state.stall_ingestion {
            Ok(IngestionStatus {
                completed: 0,
                in_progress: total,
                failed: 0,
                total,
            })
        } else {
            let failed = state.failed_ingestion.min(total);
            Ok(IngestionStatus {
                completed: total - failed,
                in_progress: 0,
                failed,
                total,
            })
        }
    }
}
