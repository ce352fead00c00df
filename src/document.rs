//! On-disk note format.
//!
//! ```text
//! ---
//! format: "bookmark-vault/1"
//! id: "1849"
//! author: "alice"
//! ...
//! ---
//!
//! # Post by @alice
//!
//! <text>
//!
//! [View original](https://x.com/alice/status/1849)
//!
//! ## Metadata
//! | Field | Value |
//! ```
//!
//! Every header line is `key: "<JSON string>"`. Documents without a `format`
//! line predate versioning and are read as version 1.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::{Item, ItemKind};

pub const FORMAT_TAG: &str = "bookmark-vault/1";
const DELIMITER: &str = "---";
const LINK_PREFIX: &str = "[View original](";
const TABLE_HEADING: &str = "## Metadata";

static HEADER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^([A-Za-z_][A-Za-z0-9_]*):\s*(".*")\s*$"#).expect("header regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document does not start with a header block")]
    MissingHeader,
    #[error("header block is not terminated")]
    UnterminatedHeader,
    #[error("malformed header line {line}: {content}")]
    MalformedLine { line: usize, content: String },
    #[error("header is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unsupported document format `{0}`")]
    UnsupportedVersion(String),
    #[error("note could not be read: {0}")]
    Unreadable(String),
}

/// What the organizer recovers from an existing note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub id: String,
    pub author: String,
    pub body: String,
    pub fields: BTreeMap<String, String>,
}

impl ParsedDocument {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

pub fn render(
    item: &Item,
    kind: ItemKind,
    captured_at: DateTime<Utc>,
    metadata_table: bool,
) -> String {
    let url = item.permalink();
    let created = item
        .created()
        .map(|t| t.to_rfc3339())
        .or_else(|| item.created_at.clone())
        .unwrap_or_default();
    let captured = captured_at.to_rfc3339();

    let mut header: Vec<(&str, String)> = vec![
        ("format", FORMAT_TAG.to_string()),
        ("id", item.id.clone()),
        ("kind", kind.as_str().to_string()),
        ("author", item.handle().to_string()),
        ("author_name", item.author.name.clone()),
        ("created_at", created.clone()),
        ("captured_at", captured.clone()),
        ("likes", item.like_count.to_string()),
        ("reposts", item.repost_count.to_string()),
        ("replies", item.reply_count.to_string()),
        ("url", url.clone()),
    ];
    if let Some(conversation) = &item.conversation_id {
        header.push(("conversation_id", conversation.clone()));
    }
    if let Some(parent) = &item.in_reply_to_id {
        header.push(("in_reply_to", parent.clone()));
    }
    if let Some(quoted) = &item.quoted {
        header.push(("quoted_id", quoted.id.clone()));
    }

    let mut out = String::new();
    out.push_str(DELIMITER);
    out.push('\n');
    for (key, value) in &header {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&quote(value));
        out.push('\n');
    }
    out.push_str(DELIMITER);
    out.push_str("\n\n");
    out.push_str(&format!("# Post by @{}\n\n", item.handle()));
    out.push_str(item.text.trim());
    out.push_str("\n\n");
    out.push_str(&format!("{LINK_PREFIX}{url})\n"));

    if metadata_table {
        out.push('\n');
        out.push_str(TABLE_HEADING);
        out.push_str("\n\n| Field | Value |\n|---|---|\n");
        let author = if item.author.name.is_empty() {
            format!("@{}", item.handle())
        } else {
            format!("@{} ({})", item.handle(), item.author.name)
        };
        let mut rows = vec![
            ("ID", item.id.clone()),
            ("Author", author),
            ("Created", created),
            ("Captured", captured),
            ("Likes", item.like_count.to_string()),
            ("Reposts", item.repost_count.to_string()),
            ("Replies", item.reply_count.to_string()),
        ];
        if let Some(parent) = &item.in_reply_to_id {
            rows.push(("In reply to", parent.clone()));
        }
        for (field, value) in rows {
            out.push_str(&format!("| {} | {} |\n", field, value.replace('|', "\\|")));
        }
    }
    out
}

fn quote(value: &str) -> String {
    // A JSON string literal is always a valid, unambiguous header value.
    serde_json::Value::String(value.to_string()).to_string()
}

pub fn parse(content: &str) -> Result<ParsedDocument, DocumentError> {
    let mut lines = content.lines().enumerate();
    match lines.next() {
        Some((_, first)) if first.trim_end() == DELIMITER => {}
        _ => return Err(DocumentError::MissingHeader),
    }

    let mut fields = BTreeMap::new();
    let mut terminated = false;
    for (idx, line) in lines.by_ref() {
        let line = line.trim_end();
        if line == DELIMITER {
            terminated = true;
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let malformed = || DocumentError::MalformedLine {
            line: idx + 1,
            content: line.to_string(),
        };
        let caps = HEADER_LINE.captures(line).ok_or_else(malformed)?;
        let value: String = serde_json::from_str(&caps[2]).map_err(|_| malformed())?;
        fields.insert(caps[1].to_string(), value);
    }
    if !terminated {
        return Err(DocumentError::UnterminatedHeader);
    }

    if let Some(format) = fields.get("format") {
        if format != FORMAT_TAG {
            return Err(DocumentError::UnsupportedVersion(format.clone()));
        }
    }
    let id = fields
        .get("id")
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or(DocumentError::MissingField("id"))?;
    let author = fields
        .get("author")
        .cloned()
        .ok_or(DocumentError::MissingField("author"))?;

    let rest: Vec<&str> = lines.map(|(_, l)| l).collect();
    let body = extract_body(&rest);

    Ok(ParsedDocument {
        id,
        author,
        body,
        fields,
    })
}

/// Body sits between the `# ` title line and the permalink line.
fn extract_body(lines: &[&str]) -> String {
    let start = lines
        .iter()
        .position(|l| l.starts_with("# "))
        .map(|i| i + 1)
        .unwrap_or(0);
    let body: Vec<&str> = lines[start..]
        .iter()
        .take_while(|l| !l.starts_with(LINK_PREFIX) && !l.starts_with(TABLE_HEADING))
        .copied()
        .collect();
    body.join("\n").trim().to_string()
}
