use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};

use bookmark_vault::config;
use bookmark_vault::events::TracingSink;
use bookmark_vault::fetcher::CommandFetcher;
use bookmark_vault::llm::LlmClient;
use bookmark_vault::model::{FetchMode, ItemKind};
use bookmark_vault::sync::{Pipeline, SyncOptions, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Bookmarks,
    Likes,
    All,
}

impl KindArg {
    fn kinds(self) -> Vec<ItemKind> {
        match self {
            KindArg::Bookmarks => vec![ItemKind::Bookmarks],
            KindArg::Likes => vec![ItemKind::Likes],
            KindArg::All => ItemKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Fetch new bookmarks/likes, categorize them and write them into the vault"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Which item kind to sync
    #[arg(long, value_enum, default_value = "bookmarks")]
    kind: KindArg,

    /// Fetch a small sample and show what would happen without writing anything
    #[arg(long, conflicts_with = "full")]
    preview: bool,

    /// Fetch everything, ignoring the configured page cap
    #[arg(long)]
    full: bool,

    /// Categorize and report, but write no notes and leave the state untouched
    #[arg(long)]
    dry_run: bool,

    /// Process at most N new items this run (overrides app.max_items_per_run)
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let mode = if args.preview {
        FetchMode::Preview
    } else if args.full {
        FetchMode::Full
    } else {
        FetchMode::Default
    };
    let dry_run = args.dry_run || args.preview;
    if !dry_run {
        cfg.ensure_dirs()?;
    }
    if args.limit == Some(0) {
        return Err(anyhow!("--limit must be > 0"));
    }
    if cfg.resolved_api_key().is_empty() {
        warn!(
            "no API key configured (llm.api_key or {}); every item will use the fallback category",
            config::API_KEY_ENV
        );
    }

    let fetcher = CommandFetcher::from_config(&cfg.fetcher);
    let llm = LlmClient::from_config(&cfg)?;
    let sink = TracingSink;
    let pipeline = Pipeline::new(&fetcher, &llm, &sink);
    let opts = SyncOptions::from_config(&cfg, mode, dry_run, args.limit);
    let vault_root = cfg.vault_root();

    info!(kind = ?args.kind, ?mode, dry_run, vault = %vault_root.display(), "starting sync");
    for kind in args.kind.kinds() {
        let profile = cfg.profile(kind);
        let report = pipeline.run(&profile, &vault_root, &opts).await?;
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    println!(
        "{prefix}{}: fetched {}, new {}, written {}, failed {}, fallback {}, batches {}, tracked ids {}",
        report.kind,
        report.fetched,
        report.new,
        report.written,
        report.failed,
        report.defaulted,
        report.batches,
        report.state_ids,
    );
    if report.dry_run {
        for (id, category) in &report.assignments {
            println!("  {id} -> {category}");
        }
    }
}
