//! Concurrent conversation ingestion pipeline.
//!
//! Coordinates the full fetch flow for one conversation scope:
//!
//! 1. **Roots** — page through the scope's history until the API reports
//!    no further cursor, dropping messages that are replies inside some
//!    other thread, then sort ascending by timestamp.
//! 2. **Replies** — for every root with a nonzero reply count, fetch its
//!    reply pages with at most `concurrency` fetches in flight; the stage
//!    joins every fetch before normalization starts.
//! 3. **Normalize** — resolve speakers and mentions, render timestamps
//!    into the configured fixed-offset zone, and nest replies under their
//!    parent in timestamp order.
//!
//! Every API call goes through the rate-limit-aware retry wrapper. The
//! output covers the entire requested scope — there is no partial mode;
//! an empty scope yields an empty list.
//!
//! [`records_to_documents`] is the bridge to the vector store: it renders
//! records into per-root text blocks, chunks them, and attaches scope
//! provenance and chunk indices.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use futures::{stream, StreamExt};
use tracing::{debug, info};

use crate::chunk::chunk_text;
use crate::config::IngestConfig;
use crate::error::SourceError;
use crate::models::{sort_by_ts, ConversationRecord, Document, SourceMessage};
use crate::resolver::NameResolver;
use crate::retry::{call_with_retry, RetryBudget};
use crate::source::MessageSource;

/// Separator between per-root blocks in the indexable text.
const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

/// Fetches and normalizes one conversation scope at a time.
pub struct IngestPipeline {
    source: Arc<dyn MessageSource>,
    resolver: Arc<NameResolver>,
    concurrency: usize,
    budget: RetryBudget,
    utc_offset: FixedOffset,
}

impl IngestPipeline {
    pub fn new(
        source: Arc<dyn MessageSource>,
        resolver: Arc<NameResolver>,
        config: &IngestConfig,
    ) -> Self {
        // Offset was validated at config load; fall back to UTC if a
        // caller hand-built an impossible one.
        let utc_offset = FixedOffset::east_opt(config.utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());

        Self {
            source,
            resolver,
            concurrency: config.concurrency.max(1),
            budget: RetryBudget::from_config(config),
            utc_offset,
        }
    }

    /// Fetch and normalize the entire scope.
    ///
    /// Returns root records in ascending timestamp order, each with its
    /// replies nested in ascending timestamp order. An empty scope
    /// returns an empty list, not an error.
    pub async fn fetch_conversation(
        &self,
        scope_id: &str,
    ) -> Result<Vec<ConversationRecord>, SourceError> {
        let roots = self.fetch_roots(scope_id).await?;
        if roots.is_empty() {
            info!(scope = scope_id, "scope has no messages");
            return Ok(Vec::new());
        }

        // Bounded fan-out over roots that have threads. Which fetch
        // finishes first is unordered; the buffered stream still yields
        // results in input order, and nothing downstream starts until
        // every fetch has resolved or failed.
        let reply_results: Vec<Result<(usize, Vec<SourceMessage>), SourceError>> =
            stream::iter(
                roots
                    .iter()
                    .enumerate()
                    .filter(|(_, root)| root.reply_count > 0)
                    .map(|(i, root)| {
                        let root_ts = root.ts.clone();
                        async move {
                            let replies = self.fetch_replies(scope_id, &root_ts).await?;
                            Ok((i, replies))
                        }
                    }),
            )
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut replies_by_root: HashMap<usize, Vec<SourceMessage>> = HashMap::new();
        for result in reply_results {
            let (i, replies) = result?;
            replies_by_root.insert(i, replies);
        }

        let mut records = Vec::with_capacity(roots.len());
        for (i, root) in roots.iter().enumerate() {
            let mut record = self.normalize(scope_id, root).await;
            if let Some(replies) = replies_by_root.get(&i) {
                for reply in replies {
                    record.replies.push(self.normalize(scope_id, reply).await);
                }
            }
            records.push(record);
        }

        info!(
            scope = scope_id,
            roots = records.len(),
            replies = records.iter().map(|r| r.replies.len()).sum::<usize>(),
            "conversation ingested"
        );
        Ok(records)
    }

    /// Page through root history; replies living in other threads are
    /// collected later, per-thread.
    async fn fetch_roots(&self, scope_id: &str) -> Result<Vec<SourceMessage>, SourceError> {
        let mut roots = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = call_with_retry(self.budget, "conversations.history", || {
                self.source.history_page(scope_id, cursor.as_deref())
            })
            .await?;

            roots.extend(page.items.into_iter().filter(|m| !m.is_thread_reply()));

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        sort_by_ts(&mut roots);
        debug!(scope = scope_id, count = roots.len(), "fetched root messages");
        Ok(roots)
    }

    /// Page through one root's replies, dropping the parent duplicate the
    /// API returns on the first page.
    async fn fetch_replies(
        &self,
        scope_id: &str,
        root_ts: &str,
    ) -> Result<Vec<SourceMessage>, SourceError> {
        let mut replies = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = call_with_retry(self.budget, "conversations.replies", || {
                self.source.replies_page(scope_id, root_ts, cursor.as_deref())
            })
            .await?;

            replies.extend(page.items.into_iter().filter(|m| m.ts != root_ts));

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        sort_by_ts(&mut replies);
        Ok(replies)
    }

    /// Resolve speaker and mentions, render the timestamp, and assemble a
    /// record. Reply nesting is the caller's job.
    async fn normalize(&self, scope_id: &str, msg: &SourceMessage) -> ConversationRecord {
        let speaker = self.resolver.resolve_name(msg.speaker_id()).await;
        let text = self.resolver.resolve_mentions(&msg.text).await;
        let (posted_date, posted_time) = render_timestamp(msg.ts_value(), self.utc_offset);

        ConversationRecord {
            group_id: scope_id.to_string(),
            speaker,
            text,
            posted_date,
            posted_time,
            replies: Vec::new(),
        }
    }
}

/// Render an epoch timestamp as (`YYYY-MM-DD`, `HH:MM:SS`) in the target
/// zone.
fn render_timestamp(ts: f64, offset: FixedOffset) -> (String, String) {
    let secs = ts as i64;
    let dt: DateTime<FixedOffset> = DateTime::from_timestamp(secs, 0)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .with_timezone(&offset);

    (
        dt.format("%Y-%m-%d").to_string(),
        dt.format("%H:%M:%S").to_string(),
    )
}

/// Flatten records into chunked, citable documents for the store.
///
/// Each root becomes one text block (root line plus reply lines, speaker-
/// and timestamp-prefixed); blocks are joined, chunked, and tagged with
/// the scope id as provenance and their chunk index as position.
pub fn records_to_documents(
    records: &[ConversationRecord],
    scope_id: &str,
    max_chars: usize,
) -> Vec<Document> {
    if records.is_empty() {
        return Vec::new();
    }

    let blocks: Vec<String> = records
        .iter()
        .map(|root| {
            let mut lines = vec![record_line(root)];
            lines.extend(root.replies.iter().map(record_line));
            lines.join("\n")
        })
        .collect();

    let joined = blocks.join(BLOCK_SEPARATOR);

    chunk_text(&joined, max_chars)
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Document::new(chunk, scope_id, i as i64))
        .collect()
}

fn record_line(record: &ConversationRecord) -> String {
    format!(
        "[{} {}] {}: {}",
        record.posted_date, record.posted_time, record.speaker, record.text
    )
}
