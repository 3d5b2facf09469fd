//! Remote artifact gateway abstraction.
//!
//! The sync driver never talks HTTP directly. Everything it needs from the
//! hosted store goes through the [`ArtifactGateway`] trait, and every call
//! returns an explicit result type instead of a loosely shaped response.
//!
//! Implementations:
//! - **[`OpenAiGateway`]**: OpenAI Files + Vector Stores API.
//! - **[`MemoryGateway`]**: in-process store with failure injection, for tests.
//!
//! # Contract
//!
//! - `upload` returns the id of a new artifact holding exactly `content`.
//! - `delete` is idempotent: an unknown or already-deleted id is
//!   [`DeleteOutcome::NotFound`], not an error.
//! - `attach` adds a batch of uploaded artifacts to a collection in one call.
//! - `ingestion_status` reports how far the collection's most recent batch
//!   has been processed.

pub mod memory;
pub mod openai;

use async_trait::async_trait;

pub use memory::MemoryGateway;
pub use openai::OpenAiGateway;

/// A freshly uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedArtifact {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The artifact did not exist (already retired or never created).
    NotFound,
}

/// Acknowledgement of a batched attach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachReceipt {
    pub batch_id: Option<String>,
}

/// Ingestion progress counters reported by the remote store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionStatus {
    pub completed: u64,
    pub in_progress: u64,
    pub failed: u64,
    pub total: u64,
}

impl IngestionStatus {
    /// Everything expected has either completed or failed.
    pub fn is_settled(&self, expected: u64) -> bool {
        self.completed >= expected || self.completed + self.failed >= expected
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("remote store returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request to remote store failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response from remote store: {0}")]
    Decode(String),

    #[error("gateway misconfigured: {0}")]
    Config(String),

    #[error("remote store rejected {operation} for {subject}")]
    Rejected {
        operation: &'static str,
        subject: String,
    },
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Operations the sync driver needs from the hosted store.
///
/// Implementations must be `Send + Sync` so one instance can be shared
/// through the per-pass context.
#[async_trait]
pub trait ArtifactGateway: Send + Sync {
    /// Short name used in logs and reports (e.g. `"openai"`).
    fn name(&self) -> &str;

    async fn upload(&self, name: &str, content: &[u8]) -> GatewayResult<UploadedArtifact>;

    async fn delete(&self, artifact_id: &str) -> GatewayResult<DeleteOutcome>;

    async fn attach(&self, artifact_ids: &[String], collection: &str) -> GatewayResult<AttachReceipt>;

    async fn ingestion_status(&self, collection: &str) -> GatewayResult<IngestionStatus>;
}
