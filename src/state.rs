//! Processed-id store, one JSON file per item kind.
//!
//! ```json
//! { "lastUpdated": "2026-01-01T00:00:00Z", "processedIds": ["1", "2"] }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::model::Item;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedState {
    pub last_updated: DateTime<Utc>,
    pub processed_ids: Vec<String>,
}

/// Read the processed ids. A missing or unreadable file yields an empty set.
pub async fn load(path: &Path) -> BTreeSet<String> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) => {
            debug!(path = %path.display(), ?err, "no state file; starting empty");
            return BTreeSet::new();
        }
    };
    match serde_json::from_str::<ProcessedState>(&raw) {
        Ok(state) => state.processed_ids.into_iter().collect(),
        Err(err) => {
            warn!(path = %path.display(), ?err, "state file unreadable; starting empty");
            BTreeSet::new()
        }
    }
}

/// Overwrite the state file with `ids` and a fresh timestamp.
pub async fn save(path: &Path, ids: &BTreeSet<String>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create state dir: {}", parent.display()))?;
    }
    let state = ProcessedState {
        last_updated: Utc::now(),
        processed_ids: ids.iter().cloned().collect(),
    };
    let body = serde_json::to_string_pretty(&state)?;
    fs::write(path, body)
        .await
        .with_context(|| format!("failed to write state file: {}", path.display()))
}

/// Items whose id is not in `processed`, in fetched order.
pub fn diff(fetched: &[Item], processed: &BTreeSet<String>) -> Vec<Item> {
    fetched
        .iter()
        .filter(|item| !processed.contains(&item.id))
        .cloned()
        .collect()
}
