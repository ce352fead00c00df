//! Batch topic categorization through the completion service.
//!
//! One request per batch. Whatever goes wrong (transport, non-JSON reply,
//! missing or out-of-bounds label) the affected items get the fallback label;
//! nothing here returns an error.

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

use crate::document::ParsedDocument;
use crate::llm::CompletionService;
use crate::model::Item;

pub const MAX_PROMPT_TEXT_CHARS: usize = 300;
pub const MIN_LABEL_CHARS: usize = 2;
pub const MAX_LABEL_CHARS: usize = 50;

const QUOTE_CHARS: &[char] = &['"', '\'', '`'];

/// The slice of an item the model sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub author: String,
    pub text: String,
}

impl From<&Item> for Candidate {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            author: item.handle().to_string(),
            text: item.text.clone(),
        }
    }
}

impl From<&ParsedDocument> for Candidate {
    fn from(doc: &ParsedDocument) -> Self {
        Self {
            id: doc.id.clone(),
            author: doc.author.clone(),
            text: doc.body.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Exactly one label per submitted id.
    pub assignments: HashMap<String, String>,
    /// Items that received the fallback label because the reply failed them.
    pub defaulted: usize,
    /// The request or the reply as a whole failed.
    pub oracle_failed: bool,
}

impl BatchOutcome {
    pub fn label_for(&self, id: &str) -> Option<&str> {
        self.assignments.get(id).map(String::as_str)
    }
}

pub struct Categorizer<'a> {
    llm: &'a dyn CompletionService,
    fallback: String,
}

impl<'a> Categorizer<'a> {
    pub fn new(llm: &'a dyn CompletionService, fallback: impl Into<String>) -> Self {
        Self {
            llm,
            fallback: fallback.into(),
        }
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    #[instrument(skip_all, fields(batch = batch.len(), known = known.len()))]
    pub async fn categorize_batch(&self, batch: &[Candidate], known: &[String]) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::default();
        }
        let prompt = build_prompt(batch, known);
        let parsed = match self.llm.complete(&prompt).await {
            Ok(reply) => parse_reply(&reply),
            Err(err) => Err(err),
        };
        match parsed {
            Ok(map) => self.assign(batch, &map),
            Err(err) => {
                warn!(?err, "categorization failed; using fallback for whole batch");
                BatchOutcome {
                    assignments: batch
                        .iter()
                        .map(|c| (c.id.clone(), self.fallback.clone()))
                        .collect(),
                    defaulted: batch.len(),
                    oracle_failed: true,
                }
            }
        }
    }

    fn assign(&self, batch: &[Candidate], map: &Map<String, Value>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for candidate in batch {
            let label = map
                .get(&candidate.id)
                .and_then(Value::as_str)
                .and_then(normalize_label);
            let label = match label {
                Some(label) => label,
                None => {
                    debug!(id = %candidate.id, raw = ?map.get(&candidate.id), "invalid label; using fallback");
                    outcome.defaulted += 1;
                    self.fallback.clone()
                }
            };
            outcome.assignments.insert(candidate.id.clone(), label);
        }
        outcome
    }

    /// Add this batch's labels to `known` so later batches are offered them.
    pub fn fold_labels(&self, known: &mut Vec<String>, outcome: &BatchOutcome) {
        let mut labels: Vec<&String> = outcome.assignments.values().collect();
        labels.sort();
        for label in labels {
            if label != &self.fallback && !known.contains(label) {
                known.push(label.clone());
            }
        }
    }
}

pub fn build_prompt(batch: &[Candidate], known: &[String]) -> String {
    let mut prompt = String::from(
        "You are organizing saved social media posts into topic folders.\n\
         Assign each post below exactly one category.\n\n",
    );
    if known.is_empty() {
        prompt.push_str("There are no existing categories yet.\n");
    } else {
        prompt.push_str("Existing categories:\n");
        for label in known {
            prompt.push_str("- ");
            prompt.push_str(label);
            prompt.push('\n');
        }
        prompt.push_str(
            "\nIf one of the existing categories fits a post, reuse it with exactly the same spelling.\n",
        );
    }
    prompt.push_str(
        "Otherwise create a new concise topic category of 2-4 words in Title Case \
         (for example \"AI Development\" or \"Personal Finance\").\n\nPosts:\n",
    );
    for c in batch {
        prompt.push_str(&format!(
            "[{}] @{}: {}\n",
            c.id,
            c.author,
            one_line(&c.text, MAX_PROMPT_TEXT_CHARS)
        ));
    }
    prompt.push_str(
        "\nRespond with only a JSON object mapping each post id to its category, \
         e.g. {\"123\": \"AI Development\"}. No other text.",
    );
    prompt
}

const ELLIPSIS: &str = "...";

/// Collapse whitespace onto one line and cut to at most `max` characters,
/// ellipsis included.
fn one_line(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let mut cut: String = collapsed
        .chars()
        .take(max.saturating_sub(ELLIPSIS.len()))
        .collect();
    cut.push_str(ELLIPSIS);
    cut
}

/// Parse the reply as a JSON object, tolerating a surrounding code fence.
pub fn parse_reply(reply: &str) -> Result<Map<String, Value>> {
    let body = strip_code_fence(reply);
    match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected a JSON object, got {}", type_name(&other))),
    }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening fence line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest.trim_start().strip_prefix("json").unwrap_or(rest),
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Trim whitespace and surrounding quotes; `None` unless 2..=50 characters remain.
pub fn normalize_label(raw: &str) -> Option<String> {
    let label = raw.trim().trim_matches(QUOTE_CHARS).trim();
    let len = label.chars().count();
    if (MIN_LABEL_CHARS..=MAX_LABEL_CHARS).contains(&len) {
        Some(label.to_string())
    } else {
        None
    }
}
