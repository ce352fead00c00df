use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};

use crate::document;
use crate::model::{Item, ItemKind};

pub const MAX_SLUG_CHARS: usize = 50;
pub const MAX_FOLDER_CHARS: usize = 80;
pub const NOTE_EXTENSION: &str = "md";

/// Used when a label sanitizes to nothing.
const UNSORTED_FOLDER: &str = "Uncategorized";

const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '#', '^', '[', ']'];

/// Strip reserved and control characters, collapse whitespace, trim dots and
/// spaces from both ends, and cut to `max` characters.
pub fn sanitize(raw: &str, max: usize) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if RESERVED.contains(&c) || c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let cut: String = collapsed.chars().take(max).collect();
    cut.trim_matches(|c: char| c == '.' || c.is_whitespace()).to_string()
}

pub fn folder_name(label: &str) -> String {
    let name = sanitize(label, MAX_FOLDER_CHARS);
    if name.is_empty() {
        UNSORTED_FOLDER.to_string()
    } else {
        name
    }
}

/// `<date>-<handle>-<slug>.md`; the slug falls back to the id.
pub fn file_name(item: &Item, captured_at: DateTime<Utc>) -> String {
    let date = item
        .created_date()
        .unwrap_or_else(|| captured_at.date_naive())
        .format("%Y-%m-%d");
    let handle = sanitize(item.handle(), MAX_SLUG_CHARS);
    let mut slug = sanitize(&item.text, MAX_SLUG_CHARS);
    if slug.is_empty() {
        slug = sanitize(&item.id, MAX_SLUG_CHARS);
    }
    format!("{date}-{handle}-{slug}.{NOTE_EXTENSION}")
}

/// Pick the path for note `id` named `name` inside `dir`. An existing file
/// holding a different id (or no parseable header) keeps its name and the new
/// note gets `-<id>` appended.
pub async fn resolve_target(dir: &Path, name: &str, id: &str) -> PathBuf {
    let candidate = dir.join(name);
    let existing = match fs::read_to_string(&candidate).await {
        Ok(existing) => Some(existing),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return candidate,
        Err(_) => None,
    };
    match existing.as_deref().map(document::parse) {
        Some(Ok(doc)) if doc.id == id => candidate,
        _ => {
            let stem = Path::new(name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(name);
            debug!(path = %candidate.display(), id, "name taken by another note; suffixing id");
            dir.join(format!("{stem}-{}.{NOTE_EXTENSION}", sanitize(id, MAX_SLUG_CHARS)))
        }
    }
}

/// Names of the category folders directly under `root`, sorted.
pub async fn list_categories(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to list {}", root.display()))
        }
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub content: String,
    /// The category folder did not exist (and, outside dry-run, was created).
    pub created_folder: bool,
}

/// Renders items into `<root>/<category>/<file>`.
#[derive(Debug, Clone)]
pub struct VaultWriter {
    root: PathBuf,
    kind: ItemKind,
    metadata_table: bool,
}

impl VaultWriter {
    pub fn new(root: impl Into<PathBuf>, kind: ItemKind, metadata_table: bool) -> Self {
        Self {
            root: root.into(),
            kind,
            metadata_table,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[instrument(skip_all, fields(id = %item.id, category))]
    pub async fn write(&self, item: &Item, category: &str, dry_run: bool) -> Result<WriteOutcome> {
        let captured_at = Utc::now();
        let dir = self.root.join(folder_name(category));
        let created_folder = !fs::try_exists(&dir).await.unwrap_or(false);
        let path = resolve_target(&dir, &file_name(item, captured_at), &item.id).await;
        let content = document::render(item, self.kind, captured_at, self.metadata_table);

        if !dry_run {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create folder: {}", dir.display()))?;
            fs::write(&path, &content)
                .await
                .with_context(|| format!("failed to write note: {}", path.display()))?;
        }
        Ok(WriteOutcome {
            path,
            content,
            created_folder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn item(id: &str, text: &str) -> Item {
        serde_json::from_value(json!({
            "id": id,
            "text": text,
            "createdAt": "2024-05-06T07:08:09Z",
            "author": { "username": "carol", "name": "Carol" }
        }))
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap()
    }

    #[test]
    fn sanitize_strips_reserved_and_collapses() {
        assert_eq!(sanitize("  a/b:c*d?\n\n e  ", 50), "a b c d e");
        assert_eq!(sanitize("...hidden.", 50), "hidden");
        assert_eq!(sanitize("héllo wörld", 5), "héllo");
        assert_eq!(sanitize("AI Development", MAX_FOLDER_CHARS), "AI Development");
    }

    #[test]
    fn folder_name_never_empty() {
        assert_eq!(folder_name("??"), "Uncategorized");
        assert_eq!(folder_name("Rust / Systems"), "Rust Systems");
    }

    #[test]
    fn file_name_uses_date_handle_and_text() {
        let name = file_name(&item("1", "Why #rust: a thread"), now());
        assert_eq!(name, "2024-05-06-carol-Why rust a thread.md");
    }

    #[test]
    fn file_name_falls_back_to_id_and_capture_date() {
        let mut it = item("987", "   ***   ");
        it.created_at = None;
        assert_eq!(file_name(&it, now()), "2026-10-18-carol-987.md");
    }

    #[tokio::test]
    async fn write_creates_category_folder() {
        let td = tempdir().unwrap();
        let writer = VaultWriter::new(td.path(), ItemKind::Bookmarks, true);
        let out = writer.write(&item("1", "hello"), "AI Development", false).await.unwrap();
        assert!(out.created_folder);
        assert_eq!(out.path.parent().unwrap(), td.path().join("AI Development"));
        let written = std::fs::read_to_string(&out.path).unwrap();
        assert_eq!(document::parse(&written).unwrap().id, "1");
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let td = tempdir().unwrap();
        let writer = VaultWriter::new(td.path(), ItemKind::Likes, false);
        let out = writer.write(&item("1", "hello"), "Go", true).await.unwrap();
        assert!(out.created_folder);
        assert!(!out.path.exists());
        assert!(!td.path().join("Go").exists());
        assert!(out.content.contains("id: \"1\""));
    }

    #[tokio::test]
    async fn colliding_names_get_id_suffix() {
        let td = tempdir().unwrap();
        let writer = VaultWriter::new(td.path(), ItemKind::Bookmarks, false);
        let first = writer.write(&item("1", "same text"), "Topic", false).await.unwrap();
        let again = writer.write(&item("1", "same text"), "Topic", false).await.unwrap();
        let other = writer.write(&item("2", "same text"), "Topic", false).await.unwrap();
        assert_eq!(first.path, again.path);
        assert_ne!(first.path, other.path);
        assert!(other.path.to_string_lossy().ends_with("same text-2.md"));
        assert!(first.path.exists() && other.path.exists());
    }

    #[tokio::test]
    async fn unreadable_file_at_target_is_kept() {
        let td = tempdir().unwrap();
        let dir = td.path().join("Topic");
        std::fs::create_dir_all(&dir).unwrap();
        let name = file_name(&item("1", "same text"), now());
        std::fs::write(dir.join(&name), [0xff, 0xfe, 0x00, 0x41]).unwrap();

        let writer = VaultWriter::new(td.path(), ItemKind::Bookmarks, false);
        let out = writer.write(&item("1", "same text"), "Topic", false).await.unwrap();
        assert!(out.path.to_string_lossy().ends_with("same text-1.md"));
        assert_eq!(std::fs::read(dir.join(&name)).unwrap(), [0xff, 0xfe, 0x00, 0x41]);
    }

    #[tokio::test]
    async fn list_categories_returns_sorted_dirs() {
        let td = tempdir().unwrap();
        std::fs::create_dir_all(td.path().join("Zeta")).unwrap();
        std::fs::create_dir_all(td.path().join("Alpha")).unwrap();
        std::fs::create_dir_all(td.path().join(".obsidian")).unwrap();
        std::fs::write(td.path().join("note.md"), "x").unwrap();
        assert_eq!(list_categories(td.path()).await.unwrap(), ["Alpha", "Zeta"]);
        assert!(list_categories(&td.path().join("missing")).await.unwrap().is_empty());
    }
}
