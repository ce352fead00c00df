use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use bookmark_vault::config;
use bookmark_vault::events::TracingSink;
use bookmark_vault::llm::LlmClient;
use bookmark_vault::organizer::{self, OrganizeOptions, OrganizeReport};
use bookmark_vault::vault;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Re-categorize notes already in the vault and move them into topic folders"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Folder to reorganize, relative to the vault (prompted when omitted on a terminal)
    #[arg(long)]
    folder: Option<String>,

    /// How many folder levels below the target to scan (1 = only its direct files)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Do not copy the folder to a timestamped backup before moving files
    #[arg(long)]
    no_backup: bool,

    /// Plan the moves and report them without touching any file
    #[arg(long)]
    dry_run: bool,

    /// Never prompt; use flags and defaults
    #[arg(long, short = 'y')]
    yes: bool,
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
    let vault_root = cfg.vault_root();
    let interactive = !args.yes && io::stdin().is_terminal();

    let folder = match (&args.folder, interactive) {
        (Some(folder), _) => folder.clone(),
        (None, true) => choose_folder(&vault_root, &cfg.sources.bookmarks.folder).await?,
        (None, false) => cfg.sources.bookmarks.folder.clone(),
    };
    let max_depth = match (args.max_depth, interactive) {
        (Some(depth), _) => Some(depth),
        (None, true) => prompt_depth()?,
        (None, false) => None,
    };
    let backup = if args.no_backup || args.dry_run {
        false
    } else if interactive {
        confirm("Create a backup copy before moving files?", true)?
    } else {
        true
    };
    if max_depth == Some(0) {
        return Err(anyhow!("--max-depth must be > 0"));
    }

    let target = vault_root.join(&folder);
    let opts = OrganizeOptions {
        target,
        max_depth,
        backup,
        dry_run: args.dry_run,
        batch_size: cfg.app.batch_size,
        batch_delay: Duration::from_millis(cfg.app.batch_delay_ms),
    };
    let llm = LlmClient::from_config(&cfg)?;

    info!(target = %opts.target.display(), ?max_depth, backup, dry_run = args.dry_run, "reorganizing");
    let report = organizer::organize(&llm, &cfg.app.fallback_category, &opts, &TracingSink).await?;
    print_report(&report, args.dry_run);
    Ok(())
}

async fn choose_folder(vault_root: &std::path::Path, default: &str) -> Result<String> {
    let folders = vault::list_categories(vault_root).await?;
    if folders.is_empty() {
        return Ok(default.to_string());
    }
    println!("Folders in {}:", vault_root.display());
    for (i, name) in folders.iter().enumerate() {
        println!("  {}) {}", i + 1, name);
    }
    let answer = prompt(&format!("Folder to reorganize [{default}]: "))?;
    if answer.is_empty() {
        return Ok(default.to_string());
    }
    match answer.parse::<usize>() {
        Ok(n) if (1..=folders.len()).contains(&n) => Ok(folders[n - 1].clone()),
        Ok(_) => Err(anyhow!("no folder numbered {answer}")),
        Err(_) => Ok(answer),
    }
}

fn prompt_depth() -> Result<Option<usize>> {
    let answer = prompt("Max folder depth to scan [unlimited]: ")?;
    if answer.is_empty() {
        return Ok(None);
    }
    answer
        .parse::<usize>()
        .map(Some)
        .with_context(|| format!("invalid depth: {answer}"))
}

fn confirm(question: &str, default: bool) -> Result<bool> {
    let hint = if default { "Y/n" } else { "y/N" };
    let answer = prompt(&format!("{question} [{hint}]: "))?;
    Ok(match answer.to_ascii_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    })
}

fn prompt(message: &str) -> Result<String> {
    let mut stdout = io::stdout();
    print!("{message}");
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn print_report(report: &OrganizeReport, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    println!(
        "{prefix}scanned {}, parse errors {}, moved {}, already in place {}, move failures {}, fallback {}, removed folders {}",
        report.scanned,
        report.parse_errors,
        report.moved,
        report.already_in_place,
        report.move_failures,
        report.defaulted,
        report.removed_folders,
    );
    if !report.new_folders.is_empty() {
        let names: Vec<&str> = report.new_folders.iter().map(String::as_str).collect();
        println!("{prefix}new folders: {}", names.join(", "));
    }
    if let Some(backup) = &report.backup {
        println!("backup: {}", backup.display());
    }
    if dry_run {
        for planned in &report.moves {
            println!("  {} -> {}/", planned.from.display(), planned.to_folder);
        }
    }
}
