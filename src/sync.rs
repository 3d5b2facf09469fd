//! Sync pass orchestration.
//!
//! Coordinates one full pass: scan → reconcile → retire → upload → attach →
//! wait for ingestion → commit. Remote failures are isolated per item and
//! never abort the pass; the cache is always committed so the next pass
//! knows exactly which documents still need an upload.
//!
//! ```text
//! Idle → Scanning → Reconciling → Retiring → Uploading → Attaching
//!      → WaitingForIngestion → Committing → Idle
//!                    (any) → Aborted
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::SyncCache;
use crate::config::Config;
use crate::corpus::{scan_corpus, CorpusScan};
use crate::gateway::{ArtifactGateway, DeleteOutcome, OpenAiGateway};
use crate::models::{Decision, DocumentSnapshot, PassCounts};
use crate::progress::{ProgressEvent, ProgressMode, ProgressSink, Silent};
use crate::reconcile::{reconcile, ReconcileOptions, ReconcilePlan, Retirement};
use crate::report;

/// Per-invocation switches, mostly from the CLI.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Re-upload every known document with usable timestamps.
    pub full: bool,
    /// Retire artifacts of documents that disappeared from the corpus.
    pub prune: bool,
    pub vector_store_override: Option<String>,
}

/// Everything one pass needs, built once and passed down explicitly.
pub struct SyncContext {
    pub config: Config,
    pub gateway: Arc<dyn ArtifactGateway>,
    pub progress: Box<dyn ProgressSink>,
    pub options: SyncOptions,
    pub pass_id: String,
}

impl SyncContext {
    pub fn new(config: Config, gateway: Arc<dyn ArtifactGateway>, options: SyncOptions) -> Self {
        Self {
            config,
            gateway,
            progress: Box::new(Silent),
            options,
            pass_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    fn vector_store_id(&self) -> Option<String> {
        self.config
            .vector_store_id(self.options.vector_store_override.as_deref())
    }

    fn prune_enabled(&self) -> bool {
        self.options.prune || self.config.sync.prune_missing
    }

    fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            change_detection: self.config.sync.change_detection,
            force: self.options.full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Scanning,
    Reconciling,
    Retiring,
    Uploading,
    Attaching,
    WaitingForIngestion,
    Committing,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Succeeded,
    /// The pass ran to completion but the delta did not reach the store.
    Failed,
    /// The pass stopped early; the watermark was not advanced.
    Aborted,
}

impl fmt::Display for PassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PassStatus::Succeeded => "succeeded",
            PassStatus::Failed => "failed",
            PassStatus::Aborted => "aborted",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IngestionOutcome {
    /// Nothing was attached this pass.
    Skipped,
    Completed { completed: u64 },
    /// Processing settled but some files failed remotely.
    Partial { completed: u64, failed: u64 },
    TimedOut { completed: u64, expected: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentDecision {
    pub name: String,
    pub decision: Decision,
}

/// Outcome of one pass, consumed by reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass_id: String,
    /// Backend the pass talked to.
    pub gateway: String,
    pub status: PassStatus,
    pub started_at: String,
    pub finished_at: String,
    pub counts: PassCounts,
    pub decisions: Vec<DocumentDecision>,
    pub uploaded: u64,
    pub upload_failures: Vec<String>,
    pub retired: u64,
    pub retire_failures: Vec<String>,
    pub orphaned: Vec<String>,
    pub pruned: Vec<String>,
    pub ingestion: IngestionOutcome,
    pub phases: Vec<SyncPhase>,
    pub error: Option<String>,
}

impl PassReport {
    fn new(pass_id: &str, gateway: &str, started_at: &str) -> Self {
        Self {
            pass_id: pass_id.to_string(),
            gateway: gateway.to_string(),
            status: PassStatus::Succeeded,
            started_at: started_at.to_string(),
            finished_at: started_at.to_string(),
            counts: PassCounts::default(),
            decisions: Vec::new(),
            uploaded: 0,
            upload_failures: Vec::new(),
            retired: 0,
            retire_failures: Vec::new(),
            orphaned: Vec::new(),
            pruned: Vec::new(),
            ingestion: IngestionOutcome::Skipped,
            phases: vec![SyncPhase::Idle],
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PassStatus::Succeeded
    }

    fn enter(&mut self, phase: SyncPhase) {
        tracing::debug!(phase = ?phase, "entering phase");
        self.phases.push(phase);
    }

    fn fail(&mut self, message: String) {
        tracing::error!("{}", message);
        if self.status == PassStatus::Succeeded {
            self.status = PassStatus::Failed;
        }
        self.error.get_or_insert(message);
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Scan and reconcile without touching the remote store or the cache.
pub fn plan_pass(config: &Config, options: &SyncOptions) -> Result<(CorpusScan, SyncCache, ReconcilePlan)> {
    let cache = SyncCache::load(&config.cache.path);
    let scan = scan_corpus(&config.corpus)?;
    let plan = reconcile(
        &scan.documents,
        &cache,
        ReconcileOptions {
            change_detection: config.sync.change_detection,
            force: options.full,
        },
    );
    Ok((scan, cache, plan))
}

/// Run one synchronization pass. Never returns early without attempting to
/// commit the cache; failures are reported through [`PassReport::status`].
pub async fn run_pass(ctx: &SyncContext) -> PassReport {
    let span = tracing::info_span!(
        "sync_pass",
        pass_id = %ctx.pass_id,
        gateway = ctx.gateway.name()
    );
    drive(ctx).instrument(span).await
}

async fn drive(ctx: &SyncContext) -> PassReport {
    let started_at = now_rfc3339();
    let mut report = PassReport::new(&ctx.pass_id, ctx.gateway.name(), &started_at);
    let cache_path = &ctx.config.cache.path;
    let mut cache = SyncCache::load(cache_path);

    // ── Scanning ──
    report.enter(SyncPhase::Scanning);
    ctx.progress.emit(ProgressEvent::Scanning {
        root: ctx.config.corpus.root.display().to_string(),
    });
    let scan = match scan_corpus(&ctx.config.corpus) {
        Ok(scan) => scan,
        Err(e) => return abort(ctx, report, &cache, anyhow!("{:#}", e)),
    };
    tracing::info!(documents = scan.documents.len(), "scanned corpus");

    // ── Reconciling ──
    report.enter(SyncPhase::Reconciling);
    let plan = reconcile(&scan.documents, &cache, ctx.reconcile_options());
    report.counts = plan.counts();
    report.orphaned = plan.orphaned.clone();
    report.decisions = plan
        .decisions
        .iter()
        .map(|(name, decision)| DocumentDecision {
            name: name.clone(),
            decision: *decision,
        })
        .collect();
    tracing::info!(
        added = report.counts.added,
        updated = report.counts.updated,
        skipped = report.counts.skipped,
        orphaned = plan.orphaned.len(),
        "reconciled"
    );

    let uploads: Vec<&DocumentSnapshot> = scan
        .documents
        .iter()
        .filter(|doc| plan.decision(&doc.name).is_some_and(|d| d.needs_upload()))
        .collect();

    let prunable: Vec<String> = if ctx.prune_enabled() {
        if scan.root_exists {
            plan.orphaned.clone()
        } else {
            tracing::warn!("corpus root missing, refusing to prune");
            Vec::new()
        }
    } else {
        Vec::new()
    };

    let remote_work = !uploads.is_empty() || !plan.retire.is_empty() || !prunable.is_empty();
    let vector_store = ctx.vector_store_id();
    if remote_work && vector_store.is_none() {
        return abort(
            ctx,
            report,
            &cache,
            anyhow!("no vector store configured (set remote.vector_store_id, VECTOR_STORE_ID, or --vector-store)"),
        );
    }

    // ── Retiring ──
    report.enter(SyncPhase::Retiring);
    retire_superseded(ctx, &plan.retire, &mut cache, &mut report).await;
    if !prunable.is_empty() {
        prune_orphans(ctx, &prunable, &mut cache, &mut report).await;
    }

    // ── Uploading ──
    report.enter(SyncPhase::Uploading);
    let mut batch: Vec<(&DocumentSnapshot, String)> = Vec::new();
    let total = uploads.len() as u64;
    for (i, doc) in uploads.iter().copied().enumerate() {
        ctx.progress.emit(ProgressEvent::Uploading {
            n: i as u64 + 1,
            total,
            document: doc.name.clone(),
        });
        match ctx.gateway.upload(&doc.name, &doc.body).await {
            Ok(artifact) => {
                tracing::info!(document = %doc.name, artifact = %artifact.id, decision = %plan.decisions[&doc.name], "uploaded");
                batch.push((doc, artifact.id));
            }
            Err(e) => {
                tracing::warn!(document = %doc.name, error = %e, "upload failed, will retry next pass");
                report.upload_failures.push(doc.name.clone());
                cache.record_upload(doc, None, &started_at);
            }
        }
    }

    // ── Attaching ──
    let mut attached = false;
    if let Some(vector_store) = vector_store.as_deref().filter(|_| !batch.is_empty()) {
        report.enter(SyncPhase::Attaching);
        let ids: Vec<String> = batch.iter().map(|(_, id)| id.clone()).collect();
        match ctx.gateway.attach(&ids, vector_store).await {
            Ok(receipt) => {
                tracing::info!(
                    files = ids.len(),
                    batch = receipt.batch_id.as_deref().unwrap_or("-"),
                    vector_store,
                    "attached batch"
                );
                for (doc, id) in &batch {
                    cache.record_upload(doc, Some(id.clone()), &started_at);
                }
                report.uploaded = batch.len() as u64;
                attached = true;
            }
            Err(e) => {
                report.fail(format!("attaching {} files to {} failed: {}", ids.len(), vector_store, e));
                for (doc, id) in &batch {
                    if let Err(e) = ctx.gateway.delete(id).await {
                        tracing::warn!(artifact = %id, error = %e, "could not delete unattached artifact");
                    }
                    report.upload_failures.push(doc.name.clone());
                    cache.record_upload(doc, None, &started_at);
                }
            }
        }
    }

    // ── WaitingForIngestion ──
    if attached {
        report.enter(SyncPhase::WaitingForIngestion);
        if let Some(vector_store) = vector_store.as_deref() {
            report.ingestion = wait_for_ingestion(ctx, vector_store, batch.len() as u64).await;
        }
    }

    if !uploads.is_empty() && report.uploaded == 0 {
        report.fail(format!(
            "none of {} changed documents reached the remote store",
            uploads.len()
        ));
    } else if !report.upload_failures.is_empty() {
        tracing::warn!(
            failed = report.upload_failures.len(),
            "some uploads failed, they will be retried next pass"
        );
    }

    // ── Committing ──
    report.enter(SyncPhase::Committing);
    for doc in &scan.documents {
        if let Some(Decision::Skipped(reason)) = plan.decision(&doc.name) {
            if !reason.is_undecided() && cache.entry(&doc.name).is_some() {
                cache.merge_snapshot(doc);
            }
        }
    }
    cache.finish_pass(&started_at, report.counts, &ctx.pass_id);
    if let Err(e) = cache.save(cache_path) {
        report.fail(format!("{:#}", e));
    }

    report.enter(SyncPhase::Idle);
    report.finished_at = now_rfc3339();
    tracing::info!(status = ?report.status, uploaded = report.uploaded, retired = report.retired, "sync pass finished");
    report
}

async fn retire_superseded(
    ctx: &SyncContext,
    retire: &[Retirement],
    cache: &mut SyncCache,
    report: &mut PassReport,
) {
    let total = retire.len() as u64;
    for (i, retirement) in retire.iter().enumerate() {
        ctx.progress.emit(ProgressEvent::Retiring {
            n: i as u64 + 1,
            total,
        });
        match ctx.gateway.delete(&retirement.artifact_id).await {
            Ok(DeleteOutcome::Deleted) => {
                tracing::info!(document = %retirement.name, artifact = %retirement.artifact_id, "retired old version");
                report.retired += 1;
            }
            Ok(DeleteOutcome::NotFound) => {
                tracing::debug!(artifact = %retirement.artifact_id, "old version already gone");
                report.retired += 1;
            }
            Err(e) => {
                tracing::warn!(
                    document = %retirement.name,
                    artifact = %retirement.artifact_id,
                    error = %e,
                    "could not retire old version, leaving it orphaned"
                );
                report.retire_failures.push(retirement.artifact_id.clone());
            }
        }
        // The old id is no longer the live copy whatever happened remotely;
        // a failed re-upload must commit null, not the retired id.
        cache.clear_artifact(&retirement.name);
    }
}

async fn prune_orphans(
    ctx: &SyncContext,
    orphans: &[String],
    cache: &mut SyncCache,
    report: &mut PassReport,
) {
    for name in orphans {
        let artifact = cache.entry(name).and_then(|e| e.remote_artifact_id.clone());
        let gone = match artifact {
            None => true,
            Some(id) => match ctx.gateway.delete(&id).await {
                Ok(_) => {
                    report.retired += 1;
                    true
                }
                Err(e) => {
                    tracing::warn!(document = %name, artifact = %id, error = %e, "could not prune artifact");
                    report.retire_failures.push(id);
                    false
                }
            },
        };
        if gone {
            tracing::info!(document = %name, "pruned document removed from corpus");
            cache.remove(name);
            report.pruned.push(name.clone());
        }
    }
}

/// Poll ingestion until the batch settles or the timeout elapses. Never
/// blocks longer than `ingestion.timeout_secs`.
async fn wait_for_ingestion(ctx: &SyncContext, vector_store: &str, expected: u64) -> IngestionOutcome {
    let interval = Duration::from_secs(ctx.config.ingestion.poll_interval_secs);
    let timeout = Duration::from_secs(ctx.config.ingestion.timeout_secs);
    let deadline = tokio::time::Instant::now() + timeout;
    let mut completed = 0;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, ctx.gateway.ingestion_status(vector_store)).await {
            Ok(Ok(status)) => {
                completed = status.completed;
                ctx.progress.emit(ProgressEvent::Ingesting {
                    completed: status.completed,
                    expected,
                });
                if status.is_settled(expected) {
                    if status.completed < expected {
                        tracing::warn!(
                            completed = status.completed,
                            failed = status.failed,
                            "remote store failed to process some files"
                        );
                        return IngestionOutcome::Partial {
                            completed: status.completed,
                            failed: status.failed,
                        };
                    }
                    tracing::info!(completed = status.completed, "ingestion complete");
                    return IngestionOutcome::Completed {
                        completed: status.completed,
                    };
                }
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "could not read ingestion status"),
            Err(_) => break,
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(interval.min(remaining)).await;
    }

    tracing::warn!(
        completed,
        expected,
        timeout_secs = timeout.as_secs(),
        "file processing may not be complete (timeout reached)"
    );
    IngestionOutcome::TimedOut {
        completed,
        expected,
    }
}

/// Stop the pass, persisting the cache as loaded (plus any retirements
/// already applied). The watermark is not advanced.
fn abort(ctx: &SyncContext, mut report: PassReport, cache: &SyncCache, error: anyhow::Error) -> PassReport {
    let message = format!("{:#}", error);
    tracing::error!(error = %message, "sync pass aborted");
    report.enter(SyncPhase::Aborted);
    report.status = PassStatus::Aborted;
    report.error = Some(message);
    if ctx.config.cache.path.exists() || !cache.is_empty() {
        if let Err(e) = cache.save(&ctx.config.cache.path) {
            tracing::error!(error = %format!("{:#}", e), "could not persist cache after abort");
        }
    }
    report.finished_at = now_rfc3339();
    report
}

/// Entry point for `csync sync`.
pub async fn run_sync(
    config: &Config,
    options: SyncOptions,
    dry_run: bool,
    write_report: bool,
    progress: ProgressMode,
) -> Result<()> {
    if dry_run {
        let (scan, cache, plan) = plan_pass(config, &options)?;
        print_plan(config, &scan, &cache, &plan);
        return Ok(());
    }

    let vector_store = config.vector_store_id(options.vector_store_override.as_deref());
    let gateway: Arc<dyn ArtifactGateway> = Arc::new(OpenAiGateway::new(&config.remote)?);
    let ctx = SyncContext::new(config.clone(), gateway, options).with_progress(progress.sink());

    let report = run_pass(&ctx).await;
    print_summary(config, vector_store.as_deref(), &report);

    if write_report {
        match report::write_execution_report(config, &report) {
            Ok(path) => println!("  report: {}", path.display()),
            Err(e) => tracing::warn!(error = %format!("{:#}", e), "could not write execution report"),
        }
    }

    if report.is_success() {
        println!("ok");
        Ok(())
    } else {
        bail!(
            "sync pass {}: {}",
            report.status,
            report.error.as_deref().unwrap_or("see log")
        )
    }
}

fn print_plan(config: &Config, scan: &CorpusScan, cache: &SyncCache, plan: &ReconcilePlan) {
    println!("sync {} (dry-run)", config.corpus.root.display());
    println!("  documents found: {}", scan.documents.len());
    for (name, decision) in &plan.decisions {
        // Settled skips are noise; show uploads and documents needing attention.
        if !matches!(decision, Decision::Skipped(r) if !r.is_undecided()) {
            println!("  - {} ({})", name, decision);
        }
    }
    let counts = plan.counts();
    println!("  added: {}", counts.added);
    println!("  updated: {}", counts.updated);
    println!("  skipped: {}", counts.skipped);
    println!("  to retire: {}", plan.retire.len());
    println!("  orphaned: {}", plan.orphaned.len());
    println!(
        "  watermark: {}",
        cache.metadata().last_sync_time.as_deref().unwrap_or("none")
    );
}

fn print_summary(config: &Config, vector_store: Option<&str>, report: &PassReport) {
    println!("sync {}", config.corpus.root.display());
    println!("  pass: {}", report.pass_id);
    if let Some(vs) = vector_store {
        println!("  vector store: {}", vs);
    }
    println!("  added: {}", report.counts.added);
    println!("  updated: {}", report.counts.updated);
    println!("  skipped: {}", report.counts.skipped);
    println!(
        "  retired: {} (failed: {})",
        report.retired,
        report.retire_failures.len()
    );
    if !report.pruned.is_empty() {
        println!("  pruned: {}", report.pruned.len());
    }
    println!(
        "  uploaded: {} (failed: {})",
        report.uploaded,
        report.upload_failures.len()
    );
    match report.ingestion {
        IngestionOutcome::Skipped => println!("  ingestion: nothing to process"),
        IngestionOutcome::Completed { completed } => println!("  ingestion: {} processed", completed),
        IngestionOutcome::Partial { completed, failed } => {
            println!("  ingestion: {} processed, {} failed", completed, failed)
        }
        IngestionOutcome::TimedOut {
            completed,
            expected,
        } => println!("  ingestion: timed out at {} / {}", completed, expected),
    }
}
