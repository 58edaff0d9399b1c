//! # chat-recall
//!
//! Conversation indexing and retrieval for chat assistants.
//!
//! chat-recall pulls a large, paginated, one-level-threaded conversation
//! history from a messaging API under rate limits, turns it into a durable
//! per-scope semantic index, and answers follow-up questions against that
//! index with a deterministic-first fallback chain.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ MessageSource │──▶│   Ingest     │──▶│ VectorStore  │
//! │ pages+replies │   │ fan-out +    │   │ flat index + │
//! └──────────────┘   │ normalize    │   │ docstore     │
//!         │           └──────────────┘   └──────┬──────┘
//!         ▼                                     │
//!   ┌──────────┐                         ┌──────▼───────┐
//!   │ Resolver │                         │ QueryComposer │
//!   │ id→name  │                         │ table→RAG→LLM │
//!   └──────────┘                         └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Documents, records, raw message types |
//! | [`error`] | Typed source-call errors |
//! | [`chunk`] | Paragraph-boundary text chunking |
//! | [`embedding`] | Embedding service trait + HTTP provider |
//! | [`store`] | Persistent flat nearest-neighbor store |
//! | [`source`] | Message source API client |
//! | [`retry`] | Rate-limit-aware retry wrapper |
//! | [`resolver`] | Speaker/mention name resolution |
//! | [`ingest`] | Concurrent ingestion pipeline |
//! | [`llm`] | Language model service client |
//! | [`compose`] | Retrieval-augmented query composer |
//!
//! The crate is a library: the chat event dispatcher, command grammar,
//! and everything user-facing live in the embedding application.

pub mod chunk;
pub mod compose;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod resolver;
pub mod retry;
pub mod source;
pub mod store;

pub use compose::{transcript, Answer, Grounding, NoTables, QueryComposer, TabularAnswerer};
pub use config::{load_config, Config};
pub use embedding::{Embedder, HttpEmbedder};
pub use error::SourceError;
pub use ingest::{records_to_documents, IngestPipeline};
pub use llm::{HttpLanguageModel, LanguageModel};
pub use models::{ConversationRecord, Document, Page, Profile, SourceMessage};
pub use resolver::NameResolver;
pub use retry::{call_with_retry, RetryBudget};
pub use source::{HttpMessageSource, MessageSource};
pub use store::{StoreRegistry, VectorStore};
