//! Configuration loader and validator for the bookmark → vault sync.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{ItemKind, KindProfile};

/// Environment variable that overrides `llm.api_key` when the file leaves it blank.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const API_KEY_PLACEHOLDER: &str = "YOUR_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub fetcher: Fetcher,
    pub llm: Llm,
    pub sources: Sources,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub vault_dir: String,
    pub state_dir: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_items_per_run: Option<usize>,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_fallback_category")]
    pub fallback_category: String,
    /// Append a human-readable metadata table to each note.
    #[serde(default = "default_true")]
    pub metadata_table: bool,
}

/// External fetch tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fetcher {
    #[serde(default = "default_fetch_command")]
    pub command: String,
    #[serde(default = "default_json_flag")]
    pub json_flag: String,
    #[serde(default = "default_preview_count")]
    pub preview_count: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Categorization model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Llm {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_llm_version")]
    pub version: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Per-kind folder and fetch subcommand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sources {
    pub bookmarks: Source,
    pub likes: Source,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub folder: String,
    pub subcommand: String,
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_delay_ms() -> u64 {
    500
}

fn default_fallback_category() -> String {
    "Miscellaneous".into()
}

fn default_true() -> bool {
    true
}

fn default_fetch_command() -> String {
    "bird".into()
}

fn default_json_flag() -> String {
    "--json".into()
}

fn default_preview_count() -> u32 {
    5
}

fn default_max_pages() -> u32 {
    3
}

fn default_llm_base_url() -> String {
    "https://api.anthropic.com/".into()
}

fn default_llm_version() -> String {
    "2023-06-01".into()
}

fn default_max_tokens() -> u32 {
    1024
}

impl Config {
    /// Ensure required directories exist (creates `app.vault_dir` and `app.state_dir`).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.vault_dir)?;
        fs::create_dir_all(&self.app.state_dir)
    }

    pub fn vault_root(&self) -> PathBuf {
        PathBuf::from(&self.app.vault_dir)
    }

    /// Resolve the folder, state file and subcommand for one item kind.
    pub fn profile(&self, kind: ItemKind) -> KindProfile {
        let source = match kind {
            ItemKind::Bookmarks => &self.sources.bookmarks,
            ItemKind::Likes => &self.sources.likes,
        };
        KindProfile {
            kind,
            folder: source.folder.clone(),
            subcommand: source.subcommand.clone(),
            state_path: Path::new(&self.app.state_dir).join(format!("{}-state.json", kind.as_str())),
        }
    }

    /// API key from the file, or from `ANTHROPIC_API_KEY` when the file leaves it unset.
    pub fn resolved_api_key(&self) -> String {
        let key = self.llm.api_key.trim();
        if key.is_empty() || key == API_KEY_PLACEHOLDER {
            std::env::var(API_KEY_ENV).unwrap_or_default()
        } else {
            key.to_string()
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.vault_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.vault_dir must be non-empty"));
    }
    if cfg.app.state_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.state_dir must be non-empty"));
    }
    if cfg.app.batch_size == 0 {
        return Err(ConfigError::Invalid("app.batch_size must be > 0"));
    }
    if cfg.app.max_items_per_run == Some(0) {
        return Err(ConfigError::Invalid("app.max_items_per_run must be > 0 when set"));
    }
    let fallback_len = cfg.app.fallback_category.trim().chars().count();
    if !(2..=50).contains(&fallback_len) {
        return Err(ConfigError::Invalid(
            "app.fallback_category must be 2-50 characters",
        ));
    }

    if cfg.fetcher.command.trim().is_empty() {
        return Err(ConfigError::Invalid("fetcher.command must be non-empty"));
    }
    if cfg.fetcher.preview_count == 0 {
        return Err(ConfigError::Invalid("fetcher.preview_count must be > 0"));
    }
    if cfg.fetcher.max_pages == 0 {
        return Err(ConfigError::Invalid("fetcher.max_pages must be > 0"));
    }

    if cfg.llm.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.base_url must be non-empty"));
    }
    if cfg.llm.model.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.model must be non-empty"));
    }
    if cfg.llm.max_tokens == 0 {
        return Err(ConfigError::Invalid("llm.max_tokens must be > 0"));
    }

    for (folder, subcommand) in [
        (&cfg.sources.bookmarks.folder, &cfg.sources.bookmarks.subcommand),
        (&cfg.sources.likes.folder, &cfg.sources.likes.subcommand),
    ] {
        if folder.trim().is_empty() {
            return Err(ConfigError::Invalid("sources.*.folder must be non-empty"));
        }
        if subcommand.trim().is_empty() {
            return Err(ConfigError::Invalid("sources.*.subcommand must be non-empty"));
        }
    }
    if cfg.sources.bookmarks.folder == cfg.sources.likes.folder {
        return Err(ConfigError::Invalid(
            "sources.bookmarks.folder and sources.likes.folder must differ",
        ));
    }

    Ok(())
}

/// Example configuration, also used as the test fixture.
pub fn example() -> &'static str {
    r#"app:
  vault_dir: "./vault"
  state_dir: "./state"
  batch_size: 10
  max_items_per_run: 200
  batch_delay_ms: 500
  fallback_category: "Miscellaneous"
  metadata_table: true

fetcher:
  command: "bird"
  json_flag: "--json"
  preview_count: 5
  max_pages: 3
  extra_args: []

llm:
  base_url: "https://api.anthropic.com/"
  api_key: "YOUR_API_KEY"
  model: "claude-3-5-haiku-latest"
  version: "2023-06-01"
  max_tokens: 1024

sources:
  bookmarks:
    folder: "Bookmarks"
    subcommand: "bookmarks"
  likes:
    folder: "Likes"
    subcommand: "likes"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.batch_size, 10);
        assert_eq!(cfg.app.max_items_per_run, Some(200));
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let yaml = r#"
app:
  vault_dir: "v"
  state_dir: "s"
fetcher: {}
llm:
  model: "m"
sources:
  bookmarks: { folder: "B", subcommand: "bookmarks" }
  likes: { folder: "L", subcommand: "likes" }
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.fallback_category, "Miscellaneous");
        assert_eq!(cfg.fetcher.command, "bird");
        assert_eq!(cfg.fetcher.max_pages, 3);
        assert_eq!(cfg.llm.version, "2023-06-01");
        assert!(cfg.app.max_items_per_run.is_none());
    }

    #[test]
    fn invalid_batch_size() {
        let mut cfg = example_cfg();
        cfg.app.batch_size = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("batch_size")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_fallback_category() {
        let mut cfg = example_cfg();
        cfg.app.fallback_category = "x".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.app.fallback_category = "a".repeat(51);
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_sources() {
        let mut cfg = example_cfg();
        cfg.sources.likes.folder = "Bookmarks".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("must differ")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.sources.bookmarks.subcommand = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn profile_derives_state_path() {
        let cfg = example_cfg();
        let likes = cfg.profile(ItemKind::Likes);
        assert_eq!(likes.folder, "Likes");
        assert_eq!(likes.subcommand, "likes");
        assert_eq!(likes.state_path, Path::new("./state").join("likes-state.json"));
    }

    #[test]
    fn explicit_api_key_wins() {
        let mut cfg = example_cfg();
        cfg.llm.api_key = "sk-test".into();
        assert_eq!(cfg.resolved_api_key(), "sk-test");
    }

    #[test]
    fn ensure_dirs_creates_vault_and_state() {
        let td = tempdir().unwrap();
        let mut cfg = example_cfg();
        cfg.app.vault_dir = td.path().join("vault").to_string_lossy().to_string();
        cfg.app.state_dir = td.path().join("state").to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(td.path().join("vault").exists());
        assert!(td.path().join("state").exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.sources.bookmarks.folder, "Bookmarks");
    }
}
