//! Re-categorize notes already in the vault and move them between folders.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;
use tracing::{info, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::categorizer::{Candidate, Categorizer};
use crate::document::{self, DocumentError, ParsedDocument};
use crate::events::{Event, EventSink};
use crate::llm::CompletionService;
use crate::vault::{self, NOTE_EXTENSION};

#[derive(Debug, Clone)]
pub struct OrganizeOptions {
    /// Folder whose notes are regrouped; category folders are created directly inside it.
    pub target: PathBuf,
    /// How many folder levels below `target` to scan (1 = only its direct files).
    pub max_depth: Option<usize>,
    pub backup: bool,
    pub dry_run: bool,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ScannedDocument {
    pub path: PathBuf,
    pub doc: ParsedDocument,
}

#[derive(Debug, Default)]
pub struct Scan {
    pub documents: Vec<ScannedDocument>,
    pub errors: Vec<(PathBuf, DocumentError)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub from: PathBuf,
    pub to_folder: String,
}

#[derive(Debug, Default)]
pub struct OrganizeReport {
    pub scanned: usize,
    pub parse_errors: usize,
    pub batches: usize,
    pub defaulted: usize,
    pub moved: usize,
    pub already_in_place: usize,
    pub move_failures: usize,
    pub new_folders: BTreeSet<String>,
    pub removed_folders: usize,
    pub backup: Option<PathBuf>,
    pub moves: Vec<PlannedMove>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn is_note(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(NOTE_EXTENSION)
}

/// Find every note under `target` and parse it. Unreadable or unparseable
/// files are collected in `errors`, never fatal.
pub fn scan(target: &Path, max_depth: Option<usize>) -> Result<Scan> {
    if !target.is_dir() {
        bail!("target folder does not exist: {}", target.display());
    }
    let mut walker = WalkDir::new(target).follow_links(false).sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }

    let mut scan = Scan::default();
    for entry in walker.into_iter().filter_entry(|e| !is_hidden(e)) {
        let entry = entry.with_context(|| format!("failed to walk {}", target.display()))?;
        if !entry.file_type().is_file() || !is_note(entry.path()) {
            continue;
        }
        let path = entry.into_path();
        let parsed = fs::read_to_string(&path)
            .map_err(|err| DocumentError::Unreadable(err.to_string()))
            .and_then(|content| document::parse(&content));
        match parsed {
            Ok(doc) => scan.documents.push(ScannedDocument { path, doc }),
            Err(err) => scan.errors.push((path, err)),
        }
    }
    Ok(scan)
}

/// Copy `target` recursively to a timestamped sibling folder.
pub fn create_backup(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("cannot back up {}", target.display()))?;
    let backup = target.with_file_name(format!(
        "{name}-backup-{}",
        Local::now().format("%Y%m%d-%H%M%S")
    ));
    if backup.exists() {
        bail!("backup folder already exists: {}", backup.display());
    }
    for entry in WalkDir::new(target).follow_links(false) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(target)?;
        let dest = backup.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)
                .with_context(|| format!("failed to create {}", dest.display()))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(backup)
}

/// Remove folders under `target` (not `target` itself) left without entries.
/// Hidden folders and everything inside them are left alone.
pub fn remove_empty_dirs(target: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let walker = WalkDir::new(target).min_depth(1).contents_first(true);
    for entry in walker.into_iter().filter_entry(|e| !is_hidden(e)) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let empty = fs::read_dir(entry.path())?.next().is_none();
        if empty {
            fs::remove_dir(entry.path())
                .with_context(|| format!("failed to remove {}", entry.path().display()))?;
            removed.push(entry.into_path());
        }
    }
    Ok(removed)
}

/// Never overwrites: an occupied name gets `-<id>`, a second clash is an error.
async fn free_destination(dir: &Path, name: &str, id: &str) -> Result<PathBuf> {
    let candidate = dir.join(name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let suffixed = dir.join(format!(
        "{stem}-{}.{NOTE_EXTENSION}",
        vault::sanitize(id, vault::MAX_SLUG_CHARS)
    ));
    if tokio::fs::try_exists(&suffixed).await? {
        bail!("destination occupied: {}", suffixed.display());
    }
    Ok(suffixed)
}

#[instrument(skip_all, fields(target = %opts.target.display(), dry_run = opts.dry_run))]
pub async fn organize(
    llm: &dyn CompletionService,
    fallback: &str,
    opts: &OrganizeOptions,
    sink: &dyn EventSink,
) -> Result<OrganizeReport> {
    let target = opts.target.as_path();
    let mut report = OrganizeReport::default();

    let scan = {
        let target = target.to_path_buf();
        let max_depth = opts.max_depth;
        task::spawn_blocking(move || scan(&target, max_depth)).await??
    };
    report.scanned = scan.documents.len() + scan.errors.len();
    report.parse_errors = scan.errors.len();
    for (path, err) in &scan.errors {
        sink.emit(&Event::DocumentSkipped {
            path: path.clone(),
            reason: err.to_string(),
        });
    }
    if scan.documents.is_empty() {
        info!("no parseable notes found");
        return Ok(report);
    }

    if opts.backup && !opts.dry_run {
        let source = target.to_path_buf();
        let backup = task::spawn_blocking(move || create_backup(&source)).await??;
        sink.emit(&Event::BackupCreated {
            path: backup.clone(),
        });
        report.backup = Some(backup);
    }

    let existing: BTreeSet<String> = vault::list_categories(target).await?.into_iter().collect();
    let mut known: Vec<String> = existing.iter().cloned().collect();
    let categorizer = Categorizer::new(llm, fallback);
    let batch_size = opts.batch_size.max(1);
    let total = scan.documents.len().div_ceil(batch_size);
    let mut labels = Vec::with_capacity(scan.documents.len());

    for (index, chunk) in scan.documents.chunks(batch_size).enumerate() {
        sink.emit(&Event::BatchStarted {
            index,
            total,
            size: chunk.len(),
        });
        let candidates: Vec<Candidate> = chunk.iter().map(|d| Candidate::from(&d.doc)).collect();
        let outcome = categorizer.categorize_batch(&candidates, &known).await;
        sink.emit(&Event::BatchCategorized {
            index,
            defaulted: outcome.defaulted,
            oracle_failed: outcome.oracle_failed,
        });
        report.defaulted += outcome.defaulted;
        categorizer.fold_labels(&mut known, &outcome);
        for doc in chunk {
            let label = outcome.label_for(&doc.doc.id).unwrap_or(fallback).to_string();
            labels.push(label);
        }
        report.batches += 1;
        if index + 1 < total && !opts.batch_delay.is_zero() {
            tokio::time::sleep(opts.batch_delay).await;
        }
    }

    for (scanned, label) in scan.documents.iter().zip(labels) {
        let folder = vault::folder_name(&label);
        let dest_dir = target.join(&folder);
        if scanned.path.parent() == Some(dest_dir.as_path()) {
            report.already_in_place += 1;
            continue;
        }
        if !existing.contains(&folder) {
            report.new_folders.insert(folder.clone());
        }
        report.moves.push(PlannedMove {
            from: scanned.path.clone(),
            to_folder: folder.clone(),
        });

        if opts.dry_run {
            sink.emit(&Event::DocumentMoved {
                from: scanned.path.clone(),
                to: dest_dir.join(scanned.path.file_name().unwrap_or_default()),
                dry_run: true,
            });
            report.moved += 1;
            continue;
        }

        match move_note(&scanned.path, &dest_dir, &scanned.doc.id).await {
            Ok(to) => {
                sink.emit(&Event::DocumentMoved {
                    from: scanned.path.clone(),
                    to,
                    dry_run: false,
                });
                report.moved += 1;
            }
            Err(err) => {
                sink.emit(&Event::MoveFailed {
                    path: scanned.path.clone(),
                    error: format!("{err:#}"),
                });
                report.move_failures += 1;
            }
        }
    }

    if !opts.dry_run {
        let root = target.to_path_buf();
        for path in task::spawn_blocking(move || remove_empty_dirs(&root)).await?? {
            sink.emit(&Event::FolderRemoved { path });
            report.removed_folders += 1;
        }
    }
    Ok(report)
}

async fn move_note(from: &Path, dest_dir: &Path, id: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dest_dir)
        .await
        .with_context(|| format!("failed to create folder: {}", dest_dir.display()))?;
    let name = from
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid note file name: {}", from.display()))?;
    let to = free_destination(dest_dir, name, id).await?;
    tokio::fs::rename(from, &to)
        .await
        .with_context(|| format!("failed to move {}", from.display()))?;
    Ok(to)
}
