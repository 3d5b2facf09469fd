//! Execution reports and corpus status.
//!
//! Every real pass leaves a JSON artifact under `reports.dir`:
//! `latest_log.json` (overwritten) and `log_YYYYmmdd_HHMMSS.json` (kept).
//! `csync status` prints the same pipeline stats without running a pass.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{write_atomic, SyncCache};
use crate::config::Config;
use crate::corpus::scan_corpus;
use crate::models::PassCounts;
use crate::sync::{PassReport, PassStatus};

const LATEST_REPORT: &str = "latest_log.json";

/// Corpus and cache totals after a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Documents tracked in the cache.
    pub total_articles: u64,
    /// Eligible documents currently in the corpus.
    pub local_files: u64,
    pub added: u64,
    pub updated: u64,
    pub skipped: u64,
}

#[derive(Debug, Serialize)]
pub struct ExecutionReport<'a> {
    pub status: PassStatus,
    pub pass_id: &'a str,
    pub started_at: &'a str,
    pub finished_at: &'a str,
    pub stats: PipelineStats,
    pub log_counts: PassCounts,
    pub latest_report: String,
    pub pass: &'a PassReport,
}

/// Collect stats from the persisted cache and a fresh corpus scan. Never
/// fails: unreadable pieces count as zero.
pub fn pipeline_stats(config: &Config) -> PipelineStats {
    let cache = SyncCache::load(&config.cache.path);
    let meta = cache.metadata();
    let local_files = match scan_corpus(&config.corpus) {
        Ok(scan) => scan.documents.len() as u64,
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "could not count local documents");
            0
        }
    };

    PipelineStats {
        total_articles: cache.len() as u64,
        local_files,
        added: meta.files_added,
        updated: meta.files_updated,
        skipped: meta.files_skipped,
    }
}

/// Write the report for `pass` and return the timestamped file's path.
pub fn write_execution_report(config: &Config, pass: &PassReport) -> Result<PathBuf> {
    let dir = &config.reports.dir;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create reports directory: {}", dir.display()))?;

    let latest = dir.join(LATEST_REPORT);
    let report = ExecutionReport {
        status: pass.status,
        pass_id: &pass.pass_id,
        started_at: &pass.started_at,
        finished_at: &pass.finished_at,
        stats: pipeline_stats(config),
        log_counts: pass.counts,
        latest_report: latest.display().to_string(),
        pass,
    };
    let json = serde_json::to_vec_pretty(&report)?;

    let stamped = dir.join(timestamped_name(&pass.started_at));
    write_atomic(&latest, &json)?;
    write_atomic(&stamped, &json)?;

    tracing::info!(
        added = pass.counts.added,
        updated = pass.counts.updated,
        skipped = pass.counts.skipped,
        report = %stamped.display(),
        "execution report written"
    );
    Ok(stamped)
}

fn timestamped_name(started_at: &str) -> String {
    let at = DateTime::parse_from_rfc3339(started_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    format!("log_{}.json", at.format("%Y%m%d_%H%M%S"))
}

/// Run `csync status`: print corpus, cache and last-pass information.
pub fn run_status(config: &Config) -> Result<()> {
    let cache = SyncCache::load(&config.cache.path);
    let stats = pipeline_stats(config);
    let meta = cache.metadata();

    println!("Corpus Sync Status");
    println!("==================");
    println!();
    println!("  Corpus:      {}", config.corpus.root.display());
    println!("  Cache:       {}", config.cache.path.display());
    println!(
        "  Store:       {}",
        config.vector_store_id(None).as_deref().unwrap_or("(not configured)")
    );
    println!();
    println!("  Local files: {}", stats.local_files);
    println!("  Tracked:     {}", stats.total_articles);
    println!(
        "  Last sync:   {}",
        meta.last_sync_time
            .as_deref()
            .map(format_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    if let Some(pass_id) = &meta.last_pass_id {
        println!("  Last pass:   {}", pass_id);
    }
    println!(
        "  Last delta:  {} added, {} updated, {} skipped",
        stats.added, stats.updated, stats.skipped
    );

    let pending: Vec<&String> = cache
        .entries()
        .filter(|(_, entry)| entry.remote_artifact_id.is_none())
        .map(|(name, _)| name)
        .collect();
    if !pending.is_empty() {
        println!();
        println!("  Pending upload ({}):", pending.len());
        for name in pending {
            println!("    {}", name);
        }
    }

    if let Ok(scan) = scan_corpus(&config.corpus) {
        if scan.root_exists {
            let local: BTreeSet<&str> = scan.documents.iter().map(|d| d.name.as_str()).collect();
            let orphaned: Vec<&String> = cache
                .entries()
                .map(|(name, _)| name)
                .filter(|name| !local.contains(name.as_str()))
                .collect();
            if !orphaned.is_empty() {
                println!();
                println!("  Missing locally ({}), prune with `sync --prune`:", orphaned.len());
                for name in orphaned {
                    println!("    {}", name);
                }
            }
        }
    }

    if let Some(latest) = read_latest_status(&config.reports.dir) {
        println!();
        println!("  Last report: {}", latest);
    }

    println!();
    Ok(())
}

fn read_latest_status(dir: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(dir.join(LATEST_REPORT)).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    let status = value.get("status")?.as_str()?;
    let finished = value.get("finished_at").and_then(|v| v.as_str()).unwrap_or("?");
    Some(format!("{} at {}", status, finished))
}

/// Format an RFC 3339 timestamp relative to now (e.g. "3 hours ago").
fn format_relative(ts: &str) -> String {
    let Ok(at) = DateTime::parse_from_rfc3339(ts) else {
        return ts.to_string();
    };
    let delta = (Utc::now() - at.with_timezone(&Utc)).num_seconds();

    if delta < 0 {
        ts.to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.to_string()
    }
}
