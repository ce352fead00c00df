use async_trait::async_trait;
use serde::Deserialize;
use std::process::Output;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::config;
use crate::model::{FetchMode, Item, KindProfile};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("fetch command exited with {status}: {message}")]
    Process { status: String, message: String },
    #[error("fetch output is not valid item JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, profile: &KindProfile, mode: FetchMode) -> Result<Vec<Item>, FetchError>;
}

/// Runs the external fetch tool, e.g. `bird bookmarks --json --max-pages 3`.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    command: String,
    json_flag: String,
    preview_count: u32,
    max_pages: u32,
    extra_args: Vec<String>,
}

impl CommandFetcher {
    pub fn from_config(cfg: &config::Fetcher) -> Self {
        Self {
            command: cfg.command.clone(),
            json_flag: cfg.json_flag.clone(),
            preview_count: cfg.preview_count,
            max_pages: cfg.max_pages,
            extra_args: cfg.extra_args.clone(),
        }
    }

    /// Arguments passed after the command name.
    pub fn build_args(&self, subcommand: &str, mode: FetchMode) -> Vec<String> {
        let mut args = vec![subcommand.to_string()];
        if !self.json_flag.is_empty() {
            args.push(self.json_flag.clone());
        }
        match mode {
            FetchMode::Preview => {
                args.push("-n".into());
                args.push(self.preview_count.to_string());
            }
            FetchMode::Full => args.push("--all".into()),
            FetchMode::Default => {
                args.push("--max-pages".into());
                args.push(self.max_pages.to_string());
            }
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl SourceFetcher for CommandFetcher {
    #[instrument(skip_all, fields(kind = %profile.kind))]
    async fn fetch(&self, profile: &KindProfile, mode: FetchMode) -> Result<Vec<Item>, FetchError> {
        let args = self.build_args(&profile.subcommand, mode);
        debug!(command = %self.command, ?args, "running fetch command");
        let output = Command::new(&self.command)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| FetchError::Spawn {
                command: self.command.clone(),
                source,
            })?;
        let items = interpret_output(&output)?;
        info!(count = items.len(), ?mode, "fetch command finished");
        Ok(items)
    }
}

/// Parse the tool's stdout. A failing exit status still gets one chance:
/// if stdout holds parseable items they are returned.
pub fn interpret_output(output: &Output) -> Result<Vec<Item>, FetchError> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        return parse_items(&stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stdout.trim().is_empty() {
        match parse_items(&stdout) {
            Ok(items) => {
                warn!(status = %output.status, count = items.len(), "fetch command failed; recovered items from stdout");
                return Ok(items);
            }
            Err(err) => debug!(?err, "stdout recovery failed"),
        }
    }
    Err(FetchError::Process {
        status: output.status.to_string(),
        message: if stderr.is_empty() {
            "no error output".into()
        } else {
            stderr
        },
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FetchPayload {
    Bare(Vec<Item>),
    Wrapped {
        #[serde(alias = "items", alias = "data")]
        tweets: Vec<Item>,
    },
}

/// Accepts either a bare JSON array of items or an object holding the array
/// under `tweets`, `items` or `data`.
pub fn parse_items(raw: &str) -> Result<Vec<Item>, FetchError> {
    let payload: FetchPayload = serde_json::from_str(raw.trim())?;
    Ok(match payload {
        FetchPayload::Bare(items) => items,
        FetchPayload::Wrapped { tweets } => tweets,
    })
}
