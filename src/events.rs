//! Progress events emitted by the sync and organize pipelines.
//!
//! The pipelines never print. They hand each event to an [`EventSink`]; the
//! binaries install [`TracingSink`], tests install a recorder.

use std::path::PathBuf;
use tracing::{info, warn};

use crate::model::ItemKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Fetched {
        kind: ItemKind,
        count: usize,
    },
    NewItems {
        kind: ItemKind,
        new: usize,
        already_processed: usize,
        capped_to: Option<usize>,
    },
    BatchStarted {
        index: usize,
        total: usize,
        size: usize,
    },
    BatchCategorized {
        index: usize,
        defaulted: usize,
        oracle_failed: bool,
    },
    ItemWritten {
        id: String,
        category: String,
        path: PathBuf,
        dry_run: bool,
    },
    ItemFailed {
        id: String,
        error: String,
    },
    StateSaved {
        kind: ItemKind,
        total_ids: usize,
    },
    BatchFinished {
        index: usize,
        written: usize,
        failed: usize,
    },
    DocumentSkipped {
        path: PathBuf,
        reason: String,
    },
    BackupCreated {
        path: PathBuf,
    },
    DocumentMoved {
        from: PathBuf,
        to: PathBuf,
        dry_run: bool,
    },
    MoveFailed {
        path: PathBuf,
        error: String,
    },
    FolderRemoved {
        path: PathBuf,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Renders events as log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::Fetched { kind, count } => info!(%kind, count, "fetched items"),
            Event::NewItems {
                kind,
                new,
                already_processed,
                capped_to,
            } => info!(%kind, new, already_processed, ?capped_to, "computed new items"),
            Event::BatchStarted { index, total, size } => {
                info!(batch = index + 1, total, size, "categorizing batch")
            }
            Event::BatchCategorized {
                index,
                defaulted,
                oracle_failed,
            } => {
                if *oracle_failed {
                    warn!(batch = index + 1, defaulted, "categorization failed; batch uses fallback");
                } else {
                    info!(batch = index + 1, defaulted, "batch categorized");
                }
            }
            Event::ItemWritten {
                id,
                category,
                path,
                dry_run,
            } => info!(id = %id, category = %category, path = %path.display(), dry_run, "wrote item"),
            Event::ItemFailed { id, error } => warn!(id = %id, error = %error, "failed to write item"),
            Event::StateSaved { kind, total_ids } => info!(%kind, total_ids, "state saved"),
            Event::BatchFinished {
                index,
                written,
                failed,
            } => info!(batch = index + 1, written, failed, "batch finished"),
            Event::DocumentSkipped { path, reason } => {
                warn!(path = %path.display(), reason = %reason, "skipping unparseable document")
            }
            Event::BackupCreated { path } => info!(path = %path.display(), "backup created"),
            Event::DocumentMoved { from, to, dry_run } => {
                info!(from = %from.display(), to = %to.display(), dry_run, "moved document")
            }
            Event::MoveFailed { path, error } => {
                warn!(path = %path.display(), error = %error, "failed to move document")
            }
            Event::FolderRemoved { path } => info!(path = %path.display(), "removed empty folder"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}
