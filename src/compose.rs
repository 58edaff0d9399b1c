//! Retrieval-augmented query composer.
//!
//! Answers a question against one conversation scope with an ordered
//! fallback chain, first success wins:
//!
//! 1. **Table** — a deterministic lookup against the scope's tabular
//!    dataset, when the external collaborator maintains one. A confident,
//!    non-empty answer short-circuits: no vector search, no generation.
//! 2. **Retrieved** — nearest documents from the scope's vector store,
//!    embedded verbatim into a grounded prompt with their provenance, and
//!    answered by the language model from those excerpts only.
//! 3. **Memory** — a plain generation with no retrieved grounding.
//!    Callers present this tier differently.
//!
//! The composer holds no mutable state; it is a pure composition over the
//! tabular collaborator, the per-scope store registry, and the language
//! model.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::llm::LanguageModel;
use crate::models::{ConversationRecord, Document};
use crate::store::StoreRegistry;

/// Nearest-document budget for ad-hoc chat questions.
pub const CHAT_TOP_K: usize = 3;
/// Nearest-document budget when falling back from a table lookup.
pub const TABLE_TOP_K: usize = 30;

/// How an answer was produced; callers surface `Memory` answers
/// differently from grounded ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grounding {
    /// Deterministic table lookup.
    Table,
    /// Generated from retrieved excerpts only.
    Retrieved,
    /// Generated with no retrieved grounding.
    Memory,
}

/// An answer plus the tier that produced it.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub grounding: Grounding,
}

/// Deterministic question answering over a scope's tabular dataset.
///
/// Maintained by an external collaborator; `None`/empty means "no
/// confident answer" and sends the composer down the fallback chain.
#[async_trait]
pub trait TabularAnswerer: Send + Sync {
    fn has_table(&self, scope_id: &str) -> bool;
    async fn answer_from_table(&self, scope_id: &str, question: &str)
        -> Result<Option<String>>;
}

/// A [`TabularAnswerer`] for deployments with no tabular datasets at all.
pub struct NoTables;

#[async_trait]
impl TabularAnswerer for NoTables {
    fn has_table(&self, _scope_id: &str) -> bool {
        false
    }

    async fn answer_from_table(
        &self,
        _scope_id: &str,
        _question: &str,
    ) -> Result<Option<String>> {
        Ok(None)
    }
}

pub struct QueryComposer {
    tables: Arc<dyn TabularAnswerer>,
    llm: Arc<dyn LanguageModel>,
    stores: Arc<StoreRegistry>,
}

impl QueryComposer {
    pub fn new(
        tables: Arc<dyn TabularAnswerer>,
        llm: Arc<dyn LanguageModel>,
        stores: Arc<StoreRegistry>,
    ) -> Self {
        Self {
            tables,
            llm,
            stores,
        }
    }

    /// Answer `question` for `scope_id` through the fallback chain.
    pub async fn answer(&self, question: &str, scope_id: &str) -> Result<Answer> {
        if self.tables.has_table(scope_id) {
            if let Some(text) = self.tables.answer_from_table(scope_id, question).await? {
                if !text.trim().is_empty() {
                    return Ok(Answer {
                        text,
                        grounding: Grounding::Table,
                    });
                }
            }
            // Table had no confident answer; retrieve at table scale.
            return self.retrieve_or_plain(question, scope_id, TABLE_TOP_K).await;
        }

        self.retrieve_or_plain(question, scope_id, CHAT_TOP_K).await
    }

    async fn retrieve_or_plain(
        &self,
        question: &str,
        scope_id: &str,
        k: usize,
    ) -> Result<Answer> {
        let store = self.stores.get_or_create(scope_id);

        let retrieved = if store.is_empty() {
            Vec::new()
        } else {
            // Store queries block (embedding call + scan); keep them off
            // the event loop.
            let q = question.to_string();
            let result = tokio::task::spawn_blocking(move || store.query(&q, k))
                .await
                .context("store query task failed")?;
            match result {
                Ok(docs) => docs,
                Err(e) => {
                    warn!(scope = scope_id, error = %e, "retrieval failed, answering without it");
                    Vec::new()
                }
            }
        };

        if retrieved.is_empty() {
            let text = self.llm.generate(question).await?;
            return Ok(Answer {
                text,
                grounding: Grounding::Memory,
            });
        }

        let prompt = grounded_prompt(question, &retrieved);
        let text = self.llm.generate(&prompt).await?;
        Ok(Answer {
            text,
            grounding: Grounding::Retrieved,
        })
    }
}

/// Build the grounded prompt: excerpts verbatim with provenance, and an
/// instruction to answer only from them.
fn grounded_prompt(question: &str, docs: &[Document]) -> String {
    let mut excerpts = String::new();
    for doc in docs {
        let source = doc.source().unwrap_or("unknown");
        let index = doc.chunk_index().unwrap_or(0);
        excerpts.push_str(&format!(
            "Source: {} (chunk {})\n\"\"\"\n{}\n\"\"\"\n\n",
            source, index, doc.content
        ));
    }

    format!(
        "Here are relevant excerpts from the indexed conversation history:\n\n\
         {excerpts}\
         Answer the question using only the excerpts above. If the answer is \
         not present in them, say that you cannot find it in the indexed \
         history.\n\nQuestion: {question}"
    )
}

/// Render records as a transcript, one `date time @speaker: text` line
/// per message with replies indented under their root.
pub fn transcript(records: &[ConversationRecord]) -> String {
    let mut lines = Vec::new();
    for root in records {
        lines.push(format!(
            "{} {} @{}: {}",
            root.posted_date, root.posted_time, root.speaker, root.text
        ));
        for reply in &root.replies {
            lines.push(format!(
                "    {} {} @{}: {}",
                reply.posted_date, reply.posted_time, reply.speaker, reply.text
            ));
        }
    }
    lines.join("\n")
}
