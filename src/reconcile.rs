//! Change classification for a sync pass.
//!
//! [`reconcile`] compares the local scan against the sync cache and decides,
//! for every local document, whether it is added, updated, or skipped. It
//! also works out which remote artifacts become stale as a result, and which
//! cache entries no longer have a local document behind them.
//!
//! # Rules
//!
//! Applied per document, first match wins:
//!
//! 1. `created_at` or `updated_at` missing ⇒ skipped (never guess an upload
//!    from absent data, not even on a cold start).
//! 2. Cache has no entries at all ⇒ added (cold start).
//! 3. Name not in the cache ⇒ added.
//! 4. Cached entry has no artifact id ⇒ added (previous upload incomplete).
//! 5. Forced re-sync ⇒ updated.
//! 6. With a watermark: any of the three timestamps unparsable ⇒ skipped;
//!    `created_at > watermark` ⇒ added; `updated_at > watermark` ⇒ updated;
//!    otherwise unchanged.
//! 7. Without a watermark ⇒ unchanged.
//!
//! With [`ChangeDetection::Fingerprint`], a document that rules 6/7 call
//! unchanged is still updated when its content fingerprint differs from
//! the cached one. This catches edits that did not bump `updated_at`.
//! Cached digests that are not SHA-256 (older caches stored md5 under the
//! same key) are not compared.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::cache::SyncCache;
use crate::config::ChangeDetection;
use crate::fingerprint::is_fingerprint;
use crate::models::{AddReason, Decision, DocumentSnapshot, PassCounts, SkipReason, UpdateReason};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub change_detection: ChangeDetection,
    /// Re-upload every known document that has usable timestamps.
    pub force: bool,
}

/// A remote artifact superseded by this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retirement {
    pub name: String,
    pub artifact_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    /// One decision per local document, ordered by name.
    pub decisions: BTreeMap<String, Decision>,
    /// Prior artifacts of every added/updated document that had one.
    pub retire: Vec<Retirement>,
    /// Cached names with no local document in this scan.
    pub orphaned: Vec<String>,
}

impl ReconcilePlan {
    pub fn decision(&self, name: &str) -> Option<Decision> {
        self.decisions.get(name).copied()
    }

    pub fn counts(&self) -> PassCounts {
        let mut counts = PassCounts::default();
        for decision in self.decisions.values() {
            counts.record(decision);
        }
        counts
    }

    /// Names to upload this pass, in name order.
    pub fn uploads(&self) -> impl Iterator<Item = &str> {
        self.decisions
            .iter()
            .filter(|(_, d)| d.needs_upload())
            .map(|(name, _)| name.as_str())
    }

    pub fn has_changes(&self) -> bool {
        self.decisions.values().any(Decision::needs_upload)
    }
}

pub fn reconcile(
    docs: &[DocumentSnapshot],
    cache: &SyncCache,
    options: ReconcileOptions,
) -> ReconcilePlan {
    let bootstrap = cache.is_empty();
    let watermark = cache.metadata().last_sync_time.as_deref();
    let mut plan = ReconcilePlan::default();

    for doc in docs {
        let decision = classify(doc, cache, bootstrap, watermark, options);
        match decision {
            Decision::Skipped(SkipReason::MissingTimestamps) => tracing::warn!(
                document = %doc.name,
                "missing created_at/updated_at in frontmatter, skipping; fix the header to sync this document"
            ),
            Decision::Skipped(SkipReason::UnparsableTimestamps) => tracing::warn!(
                document = %doc.name,
                created_at = doc.created_at.as_deref().unwrap_or("-"),
                updated_at = doc.updated_at.as_deref().unwrap_or("-"),
                watermark = watermark.unwrap_or("-"),
                "could not parse timestamps, skipping"
            ),
            _ => tracing::debug!(document = %doc.name, decision = %decision, "classified"),
        }

        if decision.needs_upload() {
            if let Some(artifact_id) = cache
                .entry(&doc.name)
                .and_then(|e| e.remote_artifact_id.clone())
            {
                plan.retire.push(Retirement {
                    name: doc.name.clone(),
                    artifact_id,
                });
            }
        }
        plan.decisions.insert(doc.name.clone(), decision);
    }

    let local: BTreeSet<&str> = docs.iter().map(|d| d.name.as_str()).collect();
    plan.orphaned = cache
        .entries()
        .map(|(name, _)| name)
        .filter(|name| !local.contains(name.as_str()))
        .cloned()
        .collect();

    plan
}

fn classify(
    doc: &DocumentSnapshot,
    cache: &SyncCache,
    bootstrap: bool,
    watermark: Option<&str>,
    options: ReconcileOptions,
) -> Decision {
    let (created_at, updated_at) = match (&doc.created_at, &doc.updated_at) {
        (Some(c), Some(u)) => (c.as_str(), u.as_str()),
        _ => return Decision::Skipped(SkipReason::MissingTimestamps),
    };

    if bootstrap {
        return Decision::Added(AddReason::Bootstrap);
    }

    let entry = match cache.entry(&doc.name) {
        Some(entry) => entry,
        None => return Decision::Added(AddReason::NewName),
    };

    if entry.remote_artifact_id.is_none() {
        return Decision::Added(AddReason::MissingArtifact);
    }

    if options.force {
        return Decision::Updated(UpdateReason::Forced);
    }

    let unchanged = match watermark {
        Some(wm) => {
            let (created, updated, wm) =
                match (parse_timestamp(created_at), parse_timestamp(updated_at), parse_timestamp(wm)) {
                    (Some(c), Some(u), Some(w)) => (c, u, w),
                    _ => return Decision::Skipped(SkipReason::UnparsableTimestamps),
                };
            if created > wm {
                return Decision::Added(AddReason::CreatedAfterWatermark);
            }
            if updated > wm {
                return Decision::Updated(UpdateReason::DeclaredNewer);
            }
            SkipReason::Unchanged
        }
        None => SkipReason::NoWatermark,
    };

    if options.change_detection == ChangeDetection::Fingerprint {
        // Digests from older caches cannot be compared; trust the watermark.
        if let Some(cached) = entry.content_fingerprint.as_deref().filter(|c| is_fingerprint(c)) {
            if cached != doc.content_fingerprint {
                return Decision::Updated(UpdateReason::ContentChanged);
            }
        }
    }

    Decision::Skipped(unchanged)
}

/// Parse the ISO-8601-like timestamps articles declare.
///
/// Accepts RFC 3339, naive date-times with `T` or space separator (read as
/// UTC), and bare dates (midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PassCounts;
    use std::path::PathBuf;

    fn doc(name: &str, created: Option<&str>, updated: Option<&str>, body: &str) -> DocumentSnapshot {
        DocumentSnapshot {
            name: name.to_string(),
            path: PathBuf::from(name),
            content_fingerprint: crate::fingerprint::fingerprint(body.as_bytes()),
            created_at: created.map(str::to_string),
            updated_at: updated.map(str::to_string),
            body: body.as_bytes().to_vec(),
        }
    }

    fn dated(name: &str, created: &str, updated: &str) -> DocumentSnapshot {
        doc(name, Some(created), Some(updated), name)
    }

    /// A cache that has synced `docs` with artifact `file-<name>` and a watermark.
    fn synced_cache(docs: &[DocumentSnapshot], watermark: Option<&str>) -> SyncCache {
        let mut cache = SyncCache::new();
        for d in docs {
            cache.record_upload(d, Some(format!("file-{}", d.name)), "t");
        }
        if let Some(wm) = watermark {
            cache.finish_pass(wm, PassCounts::default(), "p");
        }
        cache
    }

    #[test]
    fn bootstrap_adds_everything_and_retires_nothing() {
        let docs = vec![
            dated("a.md", "2024-01-01", "2024-01-01"),
            dated("b.md", "2024-01-05", "2024-02-01"),
        ];
        let plan = reconcile(&docs, &SyncCache::new(), ReconcileOptions::default());

        assert_eq!(plan.decision("a.md"), Some(Decision::Added(AddReason::Bootstrap)));
        assert_eq!(plan.decision("b.md"), Some(Decision::Added(AddReason::Bootstrap)));
        assert!(plan.retire.is_empty());
        assert_eq!(plan.counts().added, 2);
    }

    #[test]
    fn watermark_scenario() {
        let a = dated("a.md", "2024-01-01", "2024-01-01");
        let b = dated("b.md", "2024-01-05", "2024-02-01");
        let cache = synced_cache(&[a.clone(), b.clone()], Some("2024-01-10"));

        let plan = reconcile(&[a, b], &cache, ReconcileOptions::default());
        assert_eq!(plan.decision("a.md"), Some(Decision::Skipped(SkipReason::Unchanged)));
        assert_eq!(
            plan.decision("b.md"),
            Some(Decision::Updated(UpdateReason::DeclaredNewer))
        );
        assert_eq!(
            plan.retire,
            vec![Retirement {
                name: "b.md".to_string(),
                artifact_id: "file-b.md".to_string()
            }]
        );
    }

    #[test]
    fn created_after_watermark_is_added_and_retires_prior_artifact() {
        let a = dated("a.md", "2024-03-01T09:00:00Z", "2024-03-01T09:00:00Z");
        let cache = synced_cache(&[a.clone()], Some("2024-02-01T00:00:00Z"));

        let plan = reconcile(&[a], &cache, ReconcileOptions::default());
        assert_eq!(
            plan.decision("a.md"),
            Some(Decision::Added(AddReason::CreatedAfterWatermark))
        );
        assert_eq!(plan.retire.len(), 1);
    }

    #[test]
    fn missing_timestamps_skip_even_on_bootstrap() {
        let docs = vec![
            doc("bare.md", None, None, "no header"),
            doc("half.md", Some("2024-01-01"), None, "half"),
        ];
        let plan = reconcile(&docs, &SyncCache::new(), ReconcileOptions::default());
        assert_eq!(
            plan.decision("bare.md"),
            Some(Decision::Skipped(SkipReason::MissingTimestamps))
        );
        assert_eq!(
            plan.decision("half.md"),
            Some(Decision::Skipped(SkipReason::MissingTimestamps))
        );
        assert!(!plan.has_changes());
    }

    #[test]
    fn missing_timestamps_beat_new_name() {
        let known = dated("known.md", "2024-01-01", "2024-01-01");
        let cache = synced_cache(&[known.clone()], Some("2024-01-10"));
        let plan = reconcile(
            &[known, doc("new.md", None, Some("2024-05-01"), "new")],
            &cache,
            ReconcileOptions::default(),
        );
        assert_eq!(
            plan.decision("new.md"),
            Some(Decision::Skipped(SkipReason::MissingTimestamps))
        );
    }

    #[test]
    fn new_name_is_added() {
        let known = dated("known.md", "2024-01-01", "2024-01-01");
        let cache = synced_cache(&[known.clone()], Some("2024-01-10"));
        let fresh = dated("fresh.md", "2023-01-01", "2023-01-01");
        let plan = reconcile(&[known, fresh], &cache, ReconcileOptions::default());
        assert_eq!(plan.decision("fresh.md"), Some(Decision::Added(AddReason::NewName)));
        assert!(plan.retire.is_empty());
    }

    #[test]
    fn missing_artifact_is_retried_without_retirement() {
        let a = dated("a.md", "2024-01-01", "2024-01-01");
        let mut cache = synced_cache(&[a.clone()], Some("2024-01-10"));
        cache.clear_artifact("a.md");

        let plan = reconcile(&[a], &cache, ReconcileOptions::default());
        assert_eq!(
            plan.decision("a.md"),
            Some(Decision::Added(AddReason::MissingArtifact))
        );
        assert!(plan.retire.is_empty());
    }

    #[test]
    fn unparsable_timestamps_skip() {
        let a = dated("a.md", "last tuesday", "2024-01-01");
        let cache = synced_cache(&[a.clone()], Some("2024-01-10"));
        let plan = reconcile(&[a], &cache, ReconcileOptions::default());
        assert_eq!(
            plan.decision("a.md"),
            Some(Decision::Skipped(SkipReason::UnparsableTimestamps))
        );
    }

    #[test]
    fn unparsable_watermark_skips_everything_known() {
        let a = dated("a.md", "2024-01-01", "2024-06-01");
        let cache = synced_cache(&[a.clone()], Some("garbage"));
        let plan = reconcile(&[a], &cache, ReconcileOptions::default());
        assert_eq!(
            plan.decision("a.md"),
            Some(Decision::Skipped(SkipReason::UnparsableTimestamps))
        );
    }

    #[test]
    fn no_watermark_means_skip() {
        let a = dated("a.md", "2024-01-01", "2030-01-01");
        let cache = synced_cache(&[a.clone()], None);
        let plan = reconcile(&[a], &cache, ReconcileOptions::default());
        assert_eq!(
            plan.decision("a.md"),
            Some(Decision::Skipped(SkipReason::NoWatermark))
        );
    }

    #[test]
    fn silent_edit_missed_by_watermark_caught_by_fingerprint() {
        let first = doc("a.md", Some("2024-01-01"), Some("2024-01-01"), "v1");
        let cache = synced_cache(&[first], Some("2024-01-10"));
        let edited = doc("a.md", Some("2024-01-01"), Some("2024-01-01"), "v2");

        let plan = reconcile(&[edited.clone()], &cache, ReconcileOptions::default());
        assert_eq!(plan.decision("a.md"), Some(Decision::Skipped(SkipReason::Unchanged)));

        let plan = reconcile(
            &[edited],
            &cache,
            ReconcileOptions {
                change_detection: ChangeDetection::Fingerprint,
                force: false,
            },
        );
        assert_eq!(
            plan.decision("a.md"),
            Some(Decision::Updated(UpdateReason::ContentChanged))
        );
        assert_eq!(plan.retire.len(), 1);
    }

    #[test]
    fn fingerprint_mode_ignores_legacy_digests() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cache.json");
        // md5 digest written by the previous tool under the same key
        std::fs::write(
            &path,
            r#"{"_metadata": {"last_sync_time": "2024-01-10"},
                "a.md": {"hash": "0cc175b9c0f1b6a831c399e269772661", "file_id": "file-legacy"}}"#,
        )
        .unwrap();
        let cache = SyncCache::load(&path);

        let plan = reconcile(
            &[dated("a.md", "2024-01-01", "2024-01-01")],
            &cache,
            ReconcileOptions {
                change_detection: ChangeDetection::Fingerprint,
                force: false,
            },
        );
        assert_eq!(plan.decision("a.md"), Some(Decision::Skipped(SkipReason::Unchanged)));
        assert!(plan.retire.is_empty());
    }

    #[test]
    fn fingerprint_mode_leaves_identical_content_alone() {
        let a = dated("a.md", "2024-01-01", "2024-01-01");
        let cache = synced_cache(&[a.clone()], Some("2024-01-10"));
        let plan = reconcile(
            &[a],
            &cache,
            ReconcileOptions {
                change_detection: ChangeDetection::Fingerprint,
                force: false,
            },
        );
        assert_eq!(plan.decision("a.md"), Some(Decision::Skipped(SkipReason::Unchanged)));
    }

    #[test]
    fn force_updates_known_documents_but_not_undated_ones() {
        let a = dated("a.md", "2024-01-01", "2024-01-01");
        let bare = doc("bare.md", None, None, "bare");
        let cache = synced_cache(&[a.clone(), bare.clone()], Some("2024-01-10"));
        let plan = reconcile(
            &[a, bare],
            &cache,
            ReconcileOptions {
                change_detection: ChangeDetection::Watermark,
                force: true,
            },
        );
        assert_eq!(plan.decision("a.md"), Some(Decision::Updated(UpdateReason::Forced)));
        assert_eq!(
            plan.decision("bare.md"),
            Some(Decision::Skipped(SkipReason::MissingTimestamps))
        );
        assert_eq!(plan.retire.len(), 1);
    }

    #[test]
    fn orphans_are_reported() {
        let a = dated("a.md", "2024-01-01", "2024-01-01");
        let gone = dated("gone.md", "2024-01-01", "2024-01-01");
        let cache = synced_cache(&[a.clone(), gone], Some("2024-01-10"));
        let plan = reconcile(&[a], &cache, ReconcileOptions::default());
        assert_eq!(plan.orphaned, vec!["gone.md".to_string()]);
        assert!(!plan.decisions.contains_key("gone.md"));
    }

    #[test]
    fn classification_is_disjoint_and_complete() {
        let docs = vec![
            dated("a.md", "2024-01-01", "2024-01-01"),
            dated("b.md", "2024-01-05", "2024-02-01"),
            doc("c.md", None, None, "c"),
        ];
        let cache = synced_cache(&docs[..2], Some("2024-01-10"));
        let plan = reconcile(&docs, &cache, ReconcileOptions::default());
        assert_eq!(plan.decisions.len(), 3);
        assert_eq!(plan.counts().total(), 3);
        assert_eq!(plan.uploads().collect::<Vec<_>>(), vec!["b.md"]);
    }

    #[test]
    fn parses_supported_timestamp_shapes() {
        let midnight = parse_timestamp("2024-01-10").unwrap();
        assert_eq!(midnight.to_rfc3339(), "2024-01-10T00:00:00+00:00");
        assert!(parse_timestamp("2024-01-10T12:30:00Z").unwrap() > midnight);
        assert_eq!(
            parse_timestamp("2024-01-10T14:30:00+02:00"),
            parse_timestamp("2024-01-10T12:30:00Z")
        );
        assert_eq!(
            parse_timestamp("2024-01-10 12:30:00"),
            parse_timestamp("2024-01-10T12:30:00.000")
        );
        assert!(parse_timestamp("2024-01-10T12:30").is_some());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2024-13-40").is_none());
    }
}
