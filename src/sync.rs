//! Fetch → diff → categorize → write → persist, one batch at a time.
//!
//! The same pipeline serves every item kind; the [`KindProfile`] supplies the
//! folder, state file and fetch subcommand.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

use crate::categorizer::{Candidate, Categorizer};
use crate::config::Config;
use crate::events::{Event, EventSink};
use crate::fetcher::SourceFetcher;
use crate::llm::CompletionService;
use crate::model::{FetchMode, ItemKind, KindProfile};
use crate::state;
use crate::vault::{self, VaultWriter};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub mode: FetchMode,
    pub dry_run: bool,
    /// Keep only the first N new items.
    pub limit: Option<usize>,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub fallback: String,
    pub metadata_table: bool,
}

impl SyncOptions {
    pub fn from_config(cfg: &Config, mode: FetchMode, dry_run: bool, limit: Option<usize>) -> Self {
        Self {
            mode,
            dry_run,
            limit: limit.or(cfg.app.max_items_per_run),
            batch_size: cfg.app.batch_size,
            batch_delay: Duration::from_millis(cfg.app.batch_delay_ms),
            fallback: cfg.app.fallback_category.clone(),
            metadata_table: cfg.app.metadata_table,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub kind: ItemKind,
    pub dry_run: bool,
    pub fetched: usize,
    pub new: usize,
    pub batches: usize,
    pub written: usize,
    pub failed: usize,
    pub defaulted: usize,
    /// Ids in the state after the run (what would be saved, under dry-run).
    pub state_ids: usize,
    /// `(id, category)` in processing order.
    pub assignments: Vec<(String, String)>,
}

impl SyncReport {
    fn empty(kind: ItemKind, dry_run: bool) -> Self {
        Self {
            kind,
            dry_run,
            fetched: 0,
            new: 0,
            batches: 0,
            written: 0,
            failed: 0,
            defaulted: 0,
            state_ids: 0,
            assignments: Vec::new(),
        }
    }
}

/// Collaborators for one run, constructed once by the caller.
pub struct Pipeline<'a> {
    pub fetcher: &'a dyn SourceFetcher,
    pub llm: &'a dyn CompletionService,
    pub sink: &'a dyn EventSink,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        fetcher: &'a dyn SourceFetcher,
        llm: &'a dyn CompletionService,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self { fetcher, llm, sink }
    }

    #[instrument(skip_all, fields(kind = %profile.kind, dry_run = opts.dry_run))]
    pub async fn run(
        &self,
        profile: &KindProfile,
        vault_root: &Path,
        opts: &SyncOptions,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::empty(profile.kind, opts.dry_run);

        let fetched = self
            .fetcher
            .fetch(profile, opts.mode)
            .await
            .with_context(|| format!("failed to fetch {}", profile.kind))?;
        report.fetched = fetched.len();
        self.sink.emit(&Event::Fetched {
            kind: profile.kind,
            count: fetched.len(),
        });
        if fetched.is_empty() {
            info!("nothing fetched");
            return Ok(report);
        }

        let mut processed = state::load(&profile.state_path).await;
        report.state_ids = processed.len();
        let mut new_items = state::diff(&fetched, &processed);
        let available = new_items.len();
        let capped_to = opts.limit.filter(|limit| *limit < available);
        if let Some(limit) = capped_to {
            new_items.truncate(limit);
        }
        report.new = new_items.len();
        self.sink.emit(&Event::NewItems {
            kind: profile.kind,
            new: available,
            already_processed: fetched.len() - available,
            capped_to,
        });
        if new_items.is_empty() {
            info!("no new items");
            return Ok(report);
        }

        let kind_root = vault_root.join(&profile.folder);
        let writer = VaultWriter::new(&kind_root, profile.kind, opts.metadata_table);
        let categorizer = Categorizer::new(self.llm, opts.fallback.clone());
        let batch_size = opts.batch_size.max(1);
        let total = new_items.len().div_ceil(batch_size);
        let mut minted: Vec<String> = Vec::new();

        for (index, batch) in new_items.chunks(batch_size).enumerate() {
            self.sink.emit(&Event::BatchStarted {
                index,
                total,
                size: batch.len(),
            });

            let mut known = vault::list_categories(&kind_root).await?;
            for label in &minted {
                if !known.contains(label) {
                    known.push(label.clone());
                }
            }
            let candidates: Vec<Candidate> = batch.iter().map(Candidate::from).collect();
            let outcome = categorizer.categorize_batch(&candidates, &known).await;
            report.defaulted += outcome.defaulted;
            self.sink.emit(&Event::BatchCategorized {
                index,
                defaulted: outcome.defaulted,
                oracle_failed: outcome.oracle_failed,
            });
            categorizer.fold_labels(&mut minted, &outcome);

            let (mut written, mut failed) = (0, 0);
            for item in batch {
                let category = outcome
                    .label_for(&item.id)
                    .unwrap_or(categorizer.fallback())
                    .to_string();
                match writer.write(item, &category, opts.dry_run).await {
                    Ok(out) => {
                        self.sink.emit(&Event::ItemWritten {
                            id: item.id.clone(),
                            category: category.clone(),
                            path: out.path,
                            dry_run: opts.dry_run,
                        });
                        processed.insert(item.id.clone());
                        report.assignments.push((item.id.clone(), category));
                        written += 1;
                    }
                    Err(err) => {
                        self.sink.emit(&Event::ItemFailed {
                            id: item.id.clone(),
                            error: format!("{err:#}"),
                        });
                        failed += 1;
                    }
                }
            }
            report.written += written;
            report.failed += failed;
            report.batches += 1;
            report.state_ids = processed.len();

            if !opts.dry_run {
                state::save(&profile.state_path, &processed).await?;
                self.sink.emit(&Event::StateSaved {
                    kind: profile.kind,
                    total_ids: processed.len(),
                });
            }
            self.sink.emit(&Event::BatchFinished {
                index,
                written,
                failed,
            });

            if index + 1 < total && !opts.batch_delay.is_zero() {
                tokio::time::sleep(opts.batch_delay).await;
            }
        }

        Ok(report)
    }
}
