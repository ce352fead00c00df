use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Bookmarks,
    Likes,
}

impl ItemKind {
    pub const ALL: [ItemKind; 2] = [ItemKind::Bookmarks, ItemKind::Likes];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Bookmarks => "bookmarks",
            ItemKind::Likes => "likes",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bookmarks" | "bookmark" => Some(ItemKind::Bookmarks),
            "likes" | "like" => Some(ItemKind::Likes),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the pipeline needs to know about one item kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindProfile {
    pub kind: ItemKind,
    /// Folder under the vault root holding this kind's category folders.
    pub folder: String,
    /// Subcommand passed to the fetch tool.
    pub subcommand: String,
    pub state_path: PathBuf,
}

/// How much the fetch tool should retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Small fixed sample.
    Preview,
    /// No page cap.
    Full,
    /// Configured page cap.
    #[default]
    Default,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    #[serde(default, alias = "screenName", alias = "handle")]
    pub username: String,
    #[serde(default, alias = "displayName")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotedRef {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
}

/// A bookmarked or liked post as emitted by the fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, alias = "fullText")]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default, alias = "retweetCount")]
    pub repost_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub conversation_id: Option<String>,
    #[serde(default, alias = "inReplyToStatusId", deserialize_with = "de_opt_id")]
    pub in_reply_to_id: Option<String>,
    #[serde(default, alias = "quotedTweet")]
    pub quoted: Option<QuotedRef>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Item {
    pub fn handle(&self) -> &str {
        let handle = self.author.username.trim().trim_start_matches('@');
        if handle.is_empty() {
            "unknown"
        } else {
            handle
        }
    }

    pub fn permalink(&self) -> String {
        match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!("https://x.com/{}/status/{}", self.handle(), self.id),
        }
    }

    /// Creation time, if the tool reported one in a recognised format.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }

    pub fn created_date(&self) -> Option<NaiveDate> {
        self.created().map(|t| t.date_naive())
    }
}

/// Accepts RFC 3339 and the legacy `Wed Oct 10 20:19:24 +0000 2018` form.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %z %Y")
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Str(String),
    Num(u64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Str(s) => s,
            RawId::Num(n) => n.to_string(),
        }
    }
}

fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    RawId::deserialize(d).map(String::from)
}

fn de_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(d)?.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn item_accepts_tool_field_names() {
        let item: Item = serde_json::from_value(json!({
            "id": 1849,
            "text": "hello",
            "createdAt": "Wed Oct 10 20:19:24 +0000 2018",
            "author": { "username": "alice", "name": "Alice" },
            "likeCount": 3,
            "retweetCount": 2,
            "replyCount": 1,
            "inReplyToStatusId": "77",
            "quotedTweet": { "id": "99", "text": "quoted" }
        }))
        .unwrap();
        assert_eq!(item.id, "1849");
        assert_eq!(item.repost_count, 2);
        assert_eq!(item.in_reply_to_id.as_deref(), Some("77"));
        assert_eq!(item.quoted.as_ref().map(|q| q.id.as_str()), Some("99"));
        assert_eq!(
            item.created_date(),
            NaiveDate::from_ymd_opt(2018, 10, 10)
        );
    }

    #[test]
    fn permalink_falls_back_to_status_url() {
        let item: Item = serde_json::from_value(json!({
            "id": "5",
            "author": { "username": "@bob" }
        }))
        .unwrap();
        assert_eq!(item.permalink(), "https://x.com/bob/status/5");
        assert!(item.created().is_none());
    }

    #[test]
    fn parse_kind_accepts_singular() {
        assert_eq!(ItemKind::parse_kind("Like"), Some(ItemKind::Likes));
        assert_eq!(ItemKind::parse_kind("bookmarks"), Some(ItemKind::Bookmarks));
        assert_eq!(ItemKind::parse_kind("reposts"), None);
    }
}
