//! OpenAI Files + Vector Stores gateway.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | upload | `POST /files` (multipart, `purpose=assistants`) |
//! | delete | `DELETE /files/{id}` |
//! | attach | `POST /vector_stores/{vs}/file_batches` |
//! | ingestion status | `GET /vector_stores/{vs}/file_batches/{batch}`, or `GET /vector_stores/{vs}` before any batch |
//!
//! Requires the `OPENAI_API_KEY` environment variable.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{
    ArtifactGateway, AttachReceipt, DeleteOutcome, GatewayError, GatewayResult, IngestionStatus,
    UploadedArtifact,
};
use crate::config::RemoteConfig;

const BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

pub struct OpenAiGateway {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    max_retries: u32,
    /// Most recent file batch per vector store, used for ingestion status.
    last_batch: Mutex<HashMap<String, String>>,
}

impl OpenAiGateway {
    /// Build a gateway from configuration and `OPENAI_API_KEY`.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &RemoteConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            last_batch: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// Send a request with retry/backoff. `build` is called once per attempt
    /// because multipart bodies cannot be replayed.
    async fn send<F>(&self, build: F) -> GatewayResult<Response>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match build().bearer_auth(&self.api_key).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let body = response.text().await.unwrap_or_default();
                    let err = GatewayError::Http {
                        status: status.as_u16(),
                        body,
                    };

                    // Rate limited or server error: retry
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        tracing::debug!(attempt, status = status.as_u16(), "retryable remote error");
                        last_err = Some(err);
                        continue;
                    }

                    // Client error (not 429): fail now
                    return Err(err);
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "remote request failed");
                    last_err = Some(GatewayError::Transport(e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| GatewayError::Decode("request failed after retries".into())))
    }

    async fn send_json<T, F>(&self, build: F) -> GatewayResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let response = self.send(build).await?;
        let text = response.text().await?;
        decode(&text)
    }
}

fn decode<T: DeserializeOwned>(text: &str) -> GatewayResult<T> {
    serde_json::from_str(text).map_err(|e| GatewayError::Decode(format!("{}: {}", e, text)))
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DeletedObject {
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct FileCounts {
    #[serde(default)]
    completed: u64,
    #[serde(default)]
    in_progress: u64,
    #[serde(default)]
    failed: u64,
    #[serde(default)]
    cancelled: u64,
    #[serde(default)]
    total: u64,
}

impl From<FileCounts> for IngestionStatus {
    fn from(counts: FileCounts) -> Self {
        IngestionStatus {
            completed: counts.completed,
            in_progress: counts.in_progress,
            failed: counts.failed + counts.cancelled,
            total: counts.total,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileBatch {
    id: String,
    #[serde(default)]
    file_counts: FileCounts,
}

#[derive(Debug, Deserialize)]
struct VectorStore {
    #[serde(default)]
    file_counts: FileCounts,
}

#[async_trait]
impl ArtifactGateway for OpenAiGateway {
    fn name(&self) -> &str {
        "openai"
    }

    async fn upload(&self, name: &str, content: &[u8]) -> GatewayResult<UploadedArtifact> {
        let url = self.url("files");
        let file_name = name.rsplit('/').next().unwrap_or(name).to_string();
        let file: FileObject = self
            .send_json(|| {
                let form = Form::new().text("purpose", "assistants").part(
                    "file",
                    Part::bytes(content.to_vec()).file_name(file_name.clone()),
                );
                self.client.post(&url).multipart(form)
            })
            .await?;
        Ok(UploadedArtifact { id: file.id })
    }

    async fn delete(&self, artifact_id: &str) -> GatewayResult<DeleteOutcome> {
        let url = self.url(&format!("files/{}", artifact_id));
        match self
            .send_json::<DeletedObject, _>(|| self.client.delete(&url))
            .await
        {
            Ok(deleted) if deleted.deleted => Ok(DeleteOutcome::Deleted),
            Ok(_) => Err(GatewayError::Decode(format!(
                "delete of {} was not acknowledged",
                artifact_id
            ))),
            Err(GatewayError::Http { status: 404, .. }) => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn attach(&self, artifact_ids: &[String], collection: &str) -> GatewayResult<AttachReceipt> {
        if collection.trim().is_empty() {
            return Err(GatewayError::Config("vector store id is empty".into()));
        }
        let url = self.url(&format!("vector_stores/{}/file_batches", collection));
        let body = serde_json::json!({ "file_ids": artifact_ids });
        let batch: FileBatch = self
            .send_json(|| {
                self.client
                    .post(&url)
                    .header(BETA_HEADER.0, BETA_HEADER.1)
                    .json(&body)
            })
            .await?;

        if let Ok(mut last) = self.last_batch.lock() {
            last.insert(collection.to_string(), batch.id.clone());
        }
        Ok(AttachReceipt {
            batch_id: Some(batch.id),
        })
    }

    async fn ingestion_status(&self, collection: &str) -> GatewayResult<IngestionStatus> {
        let batch_id = self
            .last_batch
            .lock()
            .ok()
            .and_then(|last| last.get(collection).cloned());

        let counts = match batch_id {
            Some(batch_id) => {
                let url = self.url(&format!(
                    "vector_stores/{}/file_batches/{}",
                    collection, batch_id
                ));
                let batch: FileBatch = self
                    .send_json(|| self.client.get(&url).header(BETA_HEADER.0, BETA_HEADER.1))
                    .await?;
                batch.file_counts
            }
            None => {
                let url = self.url(&format!("vector_stores/{}", collection));
                let store: VectorStore = self
                    .send_json(|| self.client.get(&url).header(BETA_HEADER.0, BETA_HEADER.1))
                    .await?;
                store.file_counts
            }
        };
        Ok(counts.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(api_base: &str) -> RemoteConfig {
        RemoteConfig {
            api_base: api_base.to_string(),
            ..RemoteConfig::default()
        }
    }

    #[test]
    fn url_joins_without_double_slash() {
        let gw = OpenAiGateway::with_api_key(&remote("https://api.example.com/v1/"), "k".into())
            .unwrap();
        assert_eq!(gw.url("files"), "https://api.example.com/v1/files");
        assert_eq!(gw.url("/files/file-1"), "https://api.example.com/v1/files/file-1");
    }

    #[test]
    fn decodes_file_batch_counts() {
        let batch: FileBatch = decode(
            r#"{
                "id": "vsfb_123",
                "object": "vector_store.file_batch",
                "status": "in_progress",
                "file_counts": {"in_progress": 1, "completed": 2, "failed": 0, "cancelled": 1, "total": 4}
            }"#,
        )
        .unwrap();
        assert_eq!(batch.id, "vsfb_123");
        let status: IngestionStatus = batch.file_counts.into();
        assert_eq!(
            status,
            IngestionStatus {
                completed: 2,
                in_progress: 1,
                failed: 1,
                total: 4
            }
        );
    }

    #[test]
    fn vector_store_without_counts_is_zero() {
        let store: VectorStore = decode(r#"{"id": "vs_1", "object": "vector_store"}"#).unwrap();
        let status: IngestionStatus = store.file_counts.into();
        assert_eq!(status, IngestionStatus::default());
    }

    #[test]
    fn decode_error_keeps_body() {
        let err = decode::<FileObject>("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, GatewayError::Decode(ref msg) if msg.contains("bad gateway")));
    }

    #[test]
    fn deleted_object_defaults_to_not_deleted() {
        let obj: DeletedObject = decode(r#"{"id": "file-1", "object": "file"}"#).unwrap();
        assert!(!obj.deleted);
    }

    #[tokio::test]
    async fn attach_rejects_empty_collection() {
        let gw = OpenAiGateway::with_api_key(&remote("http://127.0.0.1:9"), "k".into()).unwrap();
        let err = gw.attach(&["file-1".to_string()], " ").await.unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
