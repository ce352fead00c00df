use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Mutex;

use bookmark_vault::document;
use bookmark_vault::events::NullSink;
use bookmark_vault::llm::CompletionService;
use bookmark_vault::model::{Item, ItemKind};
use bookmark_vault::organizer::{organize, OrganizeOptions};

/// Deterministic model: labels each post from keywords in its prompt line.
#[derive(Clone, Default)]
struct KeywordLlm {
    calls: Arc<Mutex<usize>>,
}

#[async_trait::async_trait]
impl CompletionService for KeywordLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        *self.calls.lock().await += 1;
        let mut reply = serde_json::Map::new();
        for line in prompt.lines().filter(|l| l.starts_with('[')) {
            let Some(end) = line.find(']') else { continue };
            let id = &line[1..end];
            let label = if line.contains("rust") {
                "Rust Programming"
            } else if line.contains("bread") {
                "Cooking"
            } else {
                "General Interest"
            };
            reply.insert(id.to_string(), label.into());
        }
        Ok(serde_json::Value::Object(reply).to_string())
    }
}

fn write_note(dir: &Path, id: &str, text: &str) -> PathBuf {
    let item: Item = serde_json::from_value(serde_json::json!({
        "id": id,
        "text": text,
        "createdAt": "2025-01-01T00:00:00Z",
        "author": { "username": "zed" }
    }))
    .unwrap();
    let captured = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("note-{id}.md"));
    fs::write(&path, document::render(&item, ItemKind::Bookmarks, captured, true)).unwrap();
    path
}

fn count_notes(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

fn options(target: &Path, backup: bool, dry_run: bool) -> OrganizeOptions {
    OrganizeOptions {
        target: target.to_path_buf(),
        max_depth: None,
        backup,
        dry_run,
        batch_size: 2,
        batch_delay: Duration::ZERO,
    }
}

fn seed(target: &Path) {
    write_note(target, "1", "learning rust ownership");
    write_note(target, "2", "bread baking at home");
    write_note(&target.join("Old Stuff"), "3", "more rust macros");
    write_note(&target.join("Old Stuff").join("Deeper"), "4", "a random thought");
    fs::write(target.join("scratch.md"), "no header here").unwrap();
}

#[tokio::test]
async fn reorganize_twice_is_idempotent() {
    let td = tempdir().unwrap();
    let target = td.path().join("Bookmarks");
    seed(&target);
    let llm = KeywordLlm::default();
    let before = count_notes(&target);

    let first = organize(&llm, "Miscellaneous", &options(&target, false, false), &NullSink)
        .await
        .unwrap();
    assert_eq!(first.scanned, 5);
    assert_eq!(first.parse_errors, 1);
    assert_eq!(first.moved, 4);
    assert_eq!(first.already_in_place, 0);
    assert_eq!(count_notes(&target), before);
    assert!(target.join("Rust Programming").join("note-1.md").exists());
    assert!(target.join("Rust Programming").join("note-3.md").exists());
    assert!(target.join("Cooking").join("note-2.md").exists());
    assert!(target.join("General Interest").join("note-4.md").exists());
    assert!(target.join("scratch.md").exists());
    assert!(!target.join("Old Stuff").exists());
    assert_eq!(first.removed_folders, 2);

    let second = organize(&llm, "Miscellaneous", &options(&target, false, false), &NullSink)
        .await
        .unwrap();
    assert_eq!(second.moved, 0);
    assert_eq!(second.already_in_place, first.moved);
    assert_eq!(count_notes(&target), before);
    assert_eq!(*llm.calls.lock().await, 4);
}

#[tokio::test]
async fn dry_run_plans_without_touching_files() {
    let td = tempdir().unwrap();
    let target = td.path().join("Bookmarks");
    seed(&target);
    let llm = KeywordLlm::default();

    let report = organize(&llm, "Miscellaneous", &options(&target, true, true), &NullSink)
        .await
        .unwrap();
    assert_eq!(report.moved, 4);
    assert_eq!(report.moves.len(), 4);
    assert!(report.backup.is_none());
    let new: Vec<&str> = report.new_folders.iter().map(String::as_str).collect();
    assert_eq!(new, ["Cooking", "General Interest", "Rust Programming"]);
    assert!(target.join("note-1.md").exists());
    assert!(target.join("Old Stuff").join("Deeper").join("note-4.md").exists());
    assert!(!target.join("Cooking").exists());
    let siblings = fs::read_dir(td.path()).unwrap().count();
    assert_eq!(siblings, 1);
}

#[tokio::test]
async fn backup_is_taken_before_moving() {
    let td = tempdir().unwrap();
    let target = td.path().join("Likes");
    write_note(&target, "1", "rust async");
    let llm = KeywordLlm::default();

    let report = organize(&llm, "Miscellaneous", &options(&target, true, false), &NullSink)
        .await
        .unwrap();
    let backup = report.backup.expect("backup path");
    assert!(backup.join("note-1.md").exists());
    assert!(target.join("Rust Programming").join("note-1.md").exists());
}

#[tokio::test]
async fn depth_limit_leaves_deeper_notes_alone() {
    let td = tempdir().unwrap();
    let target = td.path().join("Bookmarks");
    seed(&target);
    let llm = KeywordLlm::default();
    let mut opts = options(&target, false, false);
    opts.max_depth = Some(1);

    let report = organize(&llm, "Miscellaneous", &opts, &NullSink).await.unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.moved, 2);
    assert!(target.join("Old Stuff").join("note-3.md").exists());
}

#[tokio::test]
async fn non_utf8_note_is_skipped_not_fatal() {
    let td = tempdir().unwrap();
    let target = td.path().join("Bookmarks");
    write_note(&target, "1", "rust traits");
    fs::write(target.join("bad.md"), [0xff, 0xfe, 0x00, 0x41]).unwrap();
    let llm = KeywordLlm::default();

    let report = organize(&llm, "Miscellaneous", &options(&target, false, false), &NullSink)
        .await
        .unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.parse_errors, 1);
    assert_eq!(report.moved, 1);
    assert!(target.join("Rust Programming").join("note-1.md").exists());
    assert_eq!(fs::read(target.join("bad.md")).unwrap(), [0xff, 0xfe, 0x00, 0x41]);
}

#[tokio::test]
async fn target_without_notes_reports_nothing() {
    let td = tempdir().unwrap();
    let llm = KeywordLlm::default();
    let report = organize(&llm, "Miscellaneous", &options(td.path(), true, false), &NullSink)
        .await
        .unwrap();
    assert_eq!(report.scanned, 0);
    assert!(report.backup.is_none());
    assert_eq!(*llm.calls.lock().await, 0);
}
