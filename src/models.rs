//! Core data models used throughout chat-recall.
//!
//! These types represent the raw messages coming off the source API, the
//! normalized conversation records the ingestion pipeline produces, and
//! the documents that flow into the vector store.

use serde::{Deserialize, Serialize};

/// Metadata key carrying a document's provenance (file name or scope id).
pub const META_SOURCE: &str = "source";
/// Metadata key carrying a document's position (chunk or row index).
pub const META_CHUNK_INDEX: &str = "chunk_index";

/// A unit of indexed content: text plus free-form metadata.
///
/// Metadata always carries a provenance key ([`META_SOURCE`]) and a
/// position key ([`META_CHUNK_INDEX`]) so retrieved results can be cited.
/// Documents are immutable once added to a store; there is no update
/// operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    /// Build a document with the standard provenance/position metadata.
    pub fn new(content: impl Into<String>, source: &str, chunk_index: i64) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert(META_SOURCE.to_string(), source.into());
        metadata.insert(META_CHUNK_INDEX.to_string(), chunk_index.into());
        Self {
            content: content.into(),
            metadata,
        }
    }

    /// Provenance label, if present.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE).and_then(|v| v.as_str())
    }

    /// Chunk/row index, if present.
    pub fn chunk_index(&self) -> Option<i64> {
        self.metadata.get(META_CHUNK_INDEX).and_then(|v| v.as_i64())
    }
}

/// One normalized message with its one level of nested replies.
///
/// Created fresh per ingestion run; the persisted form is the derived
/// [`Document`] list, not this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Scope (channel or thread) the record was ingested under.
    pub group_id: String,
    /// Resolved display name of the author.
    pub speaker: String,
    /// Message text with mentions resolved.
    pub text: String,
    /// Posting date in the configured target zone, `YYYY-MM-DD`.
    pub posted_date: String,
    /// Posting time in the configured target zone, `HH:MM:SS`.
    pub posted_time: String,
    /// Replies in ascending timestamp order. The source platform supports
    /// one level of threading, so reply records have empty `replies`.
    pub replies: Vec<ConversationRecord>,
}

/// Raw message as returned by the source API, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMessage {
    /// Epoch timestamp with fractional suffix, e.g. `"1728123456.000200"`.
    /// Doubles as the message's unique id within a scope.
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: String,
    /// Set on thread members; equals `ts` on the thread's root message.
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub reply_count: u32,
}

impl SourceMessage {
    /// True for messages that live inside another message's thread.
    pub fn is_thread_reply(&self) -> bool {
        matches!(&self.thread_ts, Some(parent) if parent != &self.ts)
    }

    /// Timestamp as a float for ordering. Malformed timestamps sort first.
    pub fn ts_value(&self) -> f64 {
        self.ts.parse().unwrap_or(0.0)
    }

    /// Opaque identifier of the author (person, bot, or `"system"`).
    pub fn speaker_id(&self) -> &str {
        self.user
            .as_deref()
            .or(self.bot_id.as_deref())
            .unwrap_or("system")
    }
}

/// Sort messages ascending by source timestamp, in place.
pub fn sort_by_ts(messages: &mut [SourceMessage]) {
    messages.sort_by(|a, b| {
        a.ts_value()
            .partial_cmp(&b.ts_value())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` means the listing is complete.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// A terminal page with no items.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

/// Profile fields returned by the identifier-lookup endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub real_name: Option<String>,
}

impl Profile {
    /// Best human-readable name, preferring the display name.
    pub fn best_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.real_name.as_deref().filter(|s| !s.is_empty()))
    }
}
