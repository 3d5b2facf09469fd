use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::fingerprint::fingerprint;
use crate::frontmatter;
use crate::models::DocumentSnapshot;

/// Informational file that lives next to the articles and is never synced.
pub const INFO_FILE: &str = "README.md";

/// Result of scanning the corpus directory.
#[derive(Debug, Clone, Default)]
pub struct CorpusScan {
    /// `false` when the corpus root does not exist. Callers must not treat
    /// an empty scan of a missing root as "every document was deleted".
    pub root_exists: bool,
    pub documents: Vec<DocumentSnapshot>,
}

pub fn scan_corpus(config: &CorpusConfig) -> Result<CorpusScan> {
    let root = &config.root;
    if !root.exists() {
        tracing::warn!(root = %root.display(), "corpus root does not exist, nothing to sync");
        return Ok(CorpusScan::default());
    }
    if !root.is_dir() {
        bail!("Corpus root is not a directory: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec![INFO_FILE.to_string(), format!("**/{}", INFO_FILE)];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut walker = WalkDir::new(root).min_depth(1);
    if !config.recursive {
        walker = walker.max_depth(1);
    }

    let mut documents = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // The root itself failing to list is fatal; anything below it is
            // just one unreadable subtree.
            Err(e) if e.depth() == 0 => {
                return Err(e)
                    .with_context(|| format!("Failed to read corpus root: {}", root.display()))
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable corpus entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&name) {
            continue;
        }
        if !include_set.is_match(&name) {
            continue;
        }

        match read_snapshot(path, name) {
            Ok(doc) => documents.push(doc),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable document"),
        }
    }

    // Sort for deterministic ordering
    documents.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(CorpusScan {
        root_exists: true,
        documents,
    })
}

fn read_snapshot(path: &Path, name: String) -> Result<DocumentSnapshot> {
    let body = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let fm = frontmatter::extract(&String::from_utf8_lossy(&body));

    Ok(DocumentSnapshot {
        name,
        path: path.to_path_buf(),
        content_fingerprint: fingerprint(&body),
        created_at: fm.created_at,
        updated_at: fm.updated_at,
        body,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
