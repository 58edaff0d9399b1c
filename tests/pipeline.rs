//! End-to-end tests over the full flow: scripted message source →
//! ingestion → chunked documents → persistent store → composed answers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use chat_recall::compose::{Grounding, NoTables, QueryComposer, TabularAnswerer};
use chat_recall::config::IngestConfig;
use chat_recall::embedding::Embedder;
use chat_recall::error::SourceError;
use chat_recall::ingest::{records_to_documents, IngestPipeline};
use chat_recall::llm::LanguageModel;
use chat_recall::models::{Page, Profile, SourceMessage};
use chat_recall::resolver::NameResolver;
use chat_recall::retry::RetryBudget;
use chat_recall::source::MessageSource;
use chat_recall::store::{StoreRegistry, VectorStore};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ============ Stub collaborators ============

/// Deterministic embedding: character histogram folded into 8 dims.
struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-stub"
    }
    fn dims(&self) -> usize {
        8
    }
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = [0.0f32; 8];
        for (i, b) in text.bytes().enumerate() {
            v[(i + b as usize) % 8] += (b % 31) as f32;
        }
        Ok(v.to_vec())
    }
}

struct RecordingLlm {
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl RecordingLlm {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LanguageModel for RecordingLlm {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("model answer".to_string())
    }
}

struct OwnerTable {
    calls: AtomicU32,
}

#[async_trait]
impl TabularAnswerer for OwnerTable {
    fn has_table(&self, scope_id: &str) -> bool {
        scope_id == "T-TABLE"
    }

    async fn answer_from_table(
        &self,
        _scope_id: &str,
        question: &str,
    ) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if question.contains("who owns X") {
            Ok(Some("Dana owns X".to_string()))
        } else {
            Ok(None)
        }
    }
}

/// Scripted message source with paginated history, per-thread replies,
/// and an optional one-shot rate limit.
struct ScriptedSource {
    history_pages: Vec<Page<SourceMessage>>,
    replies: HashMap<String, Vec<SourceMessage>>,
    rate_limit_remaining: AtomicU32,
    history_calls: AtomicU32,
    served: Mutex<usize>,
}

impl ScriptedSource {
    fn new(history_pages: Vec<Page<SourceMessage>>) -> Self {
        Self {
            history_pages,
            replies: HashMap::new(),
            rate_limit_remaining: AtomicU32::new(0),
            history_calls: AtomicU32::new(0),
            served: Mutex::new(0),
        }
    }

    fn with_replies(mut self, root_ts: &str, replies: Vec<SourceMessage>) -> Self {
        self.replies.insert(root_ts.to_string(), replies);
        self
    }

    fn with_rate_limit_once(self) -> Self {
        self.rate_limit_remaining.store(1, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn history_page(
        &self,
        _scope_id: &str,
        _cursor: Option<&str>,
    ) -> Result<Page<SourceMessage>, SourceError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .rate_limit_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok()
        {
            return Err(SourceError::RateLimited {
                retry_after: Duration::from_millis(5),
            });
        }

        let mut served = self.served.lock().unwrap();
        if *served >= self.history_pages.len() {
            return Ok(Page::empty());
        }
        let page = clone_page(&self.history_pages[*served]);
        *served += 1;
        Ok(page)
    }

    async fn replies_page(
        &self,
        _scope_id: &str,
        root_ts: &str,
        _cursor: Option<&str>,
    ) -> Result<Page<SourceMessage>, SourceError> {
        // Parent message echoed first, as the platform does.
        let mut items = vec![message(root_ts, "U0AAAAAAA", "parent text", 0)];
        items.extend(self.replies.get(root_ts).cloned().unwrap_or_default());
        Ok(Page {
            items,
            next_cursor: None,
        })
    }

    async fn user_profile(&self, id: &str) -> Result<Profile, SourceError> {
        match id {
            "U0AAAAAAA" => Ok(Profile {
                display_name: Some("alice".into()),
                real_name: Some("Alice Kim".into()),
            }),
            "U0BBBBBBB" => Ok(Profile {
                display_name: Some("bob".into()),
                real_name: None,
            }),
            _ => Err(SourceError::Api {
                status: 404,
                message: "user_not_found".into(),
            }),
        }
    }

    async fn bot_profile(&self, _id: &str) -> Result<Profile, SourceError> {
        Err(SourceError::Api {
            status: 404,
            message: "bot_not_found".into(),
        })
    }
}

fn clone_page(page: &Page<SourceMessage>) -> Page<SourceMessage> {
    Page {
        items: page.items.clone(),
        next_cursor: page.next_cursor.clone(),
    }
}

fn message(ts: &str, user: &str, text: &str, reply_count: u32) -> SourceMessage {
    SourceMessage {
        ts: ts.to_string(),
        user: Some(user.to_string()),
        text: text.to_string(),
        reply_count,
        ..Default::default()
    }
}

fn reply_to(ts: &str, parent: &str, user: &str, text: &str) -> SourceMessage {
    SourceMessage {
        ts: ts.to_string(),
        user: Some(user.to_string()),
        text: text.to_string(),
        thread_ts: Some(parent.to_string()),
        ..Default::default()
    }
}

fn pipeline_for(source: Arc<ScriptedSource>) -> IngestPipeline {
    let config = IngestConfig {
        retry_max_attempts: 4,
        retry_max_elapsed_secs: 5,
        ..Default::default()
    };
    let resolver = Arc::new(NameResolver::new(
        Arc::clone(&source) as Arc<dyn MessageSource>,
        RetryBudget::from_config(&config),
        config.concurrency,
    ));
    IngestPipeline::new(source, resolver, &config)
}

fn scripted_conversation() -> ScriptedSource {
    ScriptedSource::new(vec![
        Page {
            items: vec![
                message("300.0", "U0BBBBBBB", "retro notes posted", 0),
                message("100.0", "U0AAAAAAA", "deploy window is friday", 2),
            ],
            next_cursor: Some("page2".into()),
        },
        Page {
            items: vec![message("200.0", "U0BBBBBBB", "standup moved to nine", 0)],
            next_cursor: None,
        },
    ])
    .with_replies(
        "100.0",
        vec![
            reply_to("150.0", "100.0", "U0BBBBBBB", "second reply about rollback"),
            reply_to("120.0", "100.0", "U0AAAAAAA", "first reply <@U0BBBBBBB> please review"),
        ],
    )
}

// ============ Tests ============

#[tokio::test]
async fn test_ingest_orders_roots_and_replies() {
    init_tracing();
    let source = Arc::new(scripted_conversation());
    let records = pipeline_for(source)
        .fetch_conversation("C-MAIN")
        .await
        .unwrap();

    let roots: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(
        roots,
        [
            "deploy window is friday",
            "standup moved to nine",
            "retro notes posted"
        ]
    );

    let replies: Vec<&str> = records[0].replies.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(
        replies,
        [
            "first reply @bob please review",
            "second reply about rollback"
        ]
    );
    assert_eq!(records[0].speaker, "alice");
}

#[tokio::test]
async fn test_rate_limited_run_matches_clean_run() {
    init_tracing();
    let clean = Arc::new(scripted_conversation());
    let throttled = Arc::new(scripted_conversation().with_rate_limit_once());

    let clean_records = pipeline_for(Arc::clone(&clean))
        .fetch_conversation("C-MAIN")
        .await
        .unwrap();
    let throttled_records = pipeline_for(Arc::clone(&throttled))
        .fetch_conversation("C-MAIN")
        .await
        .unwrap();

    // Exactly one extra (throttled) history call, same output.
    assert_eq!(
        throttled.history_calls.load(Ordering::SeqCst),
        clean.history_calls.load(Ordering::SeqCst) + 1
    );
    assert_eq!(clean_records, throttled_records);
}

#[tokio::test]
async fn test_index_then_answer_grounded() {
    init_tracing();
    let tmp = tempfile::TempDir::new().unwrap();

    let source = Arc::new(scripted_conversation());
    let records = pipeline_for(source)
        .fetch_conversation("C-MAIN")
        .await
        .unwrap();

    let docs = records_to_documents(&records, "C-MAIN", 1000);
    assert!(!docs.is_empty());

    let stores = Arc::new(StoreRegistry::new(tmp.path(), Arc::new(HashEmbedder)));
    let store = stores.get_or_create("C-MAIN");
    let store_for_add = Arc::clone(&store);
    tokio::task::spawn_blocking(move || store_for_add.add_documents(docs))
        .await
        .unwrap()
        .unwrap();

    let llm = Arc::new(RecordingLlm::new());
    let composer = QueryComposer::new(
        Arc::new(NoTables),
        Arc::clone(&llm) as Arc<dyn LanguageModel>,
        Arc::clone(&stores),
    );

    let answer = composer
        .answer("when is the deploy window?", "C-MAIN")
        .await
        .unwrap();
    assert_eq!(answer.grounding, Grounding::Retrieved);
    assert_eq!(answer.text, "model answer");

    let prompts = llm.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("deploy window is friday"));
    assert!(prompts[0].contains("Source: C-MAIN (chunk"));
}

#[tokio::test]
async fn test_store_roundtrip_same_topk_after_reopen() {
    init_tracing();
    let tmp = tempfile::TempDir::new().unwrap();
    let index = tmp.path().join("scope.index");
    let docstore = tmp.path().join("scope.docs.json");

    let docs: Vec<_> = [
        "deploy window is friday",
        "standup moved to nine",
        "retro notes posted",
        "second reply about rollback",
    ]
    .iter()
    .enumerate()
    .map(|(i, text)| chat_recall::models::Document::new(*text, "C-MAIN", i as i64))
    .collect();

    let original = VectorStore::open(&index, &docstore, Arc::new(HashEmbedder));
    original.add_documents(docs).unwrap();
    let before = original.query("deploy friday", 3).unwrap();
    assert_eq!(before.len(), 3);

    let reopened = VectorStore::open(&index, &docstore, Arc::new(HashEmbedder));
    let after = reopened.query("deploy friday", 3).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_table_tier_short_circuits_store_and_model() {
    init_tracing();
    let tmp = tempfile::TempDir::new().unwrap();

    let stores = Arc::new(StoreRegistry::new(tmp.path(), Arc::new(HashEmbedder)));
    let llm = Arc::new(RecordingLlm::new());
    let table = Arc::new(OwnerTable {
        calls: AtomicU32::new(0),
    });
    let composer = QueryComposer::new(
        Arc::clone(&table) as Arc<dyn TabularAnswerer>,
        Arc::clone(&llm) as Arc<dyn LanguageModel>,
        stores,
    );

    let answer = composer.answer("who owns X", "T-TABLE").await.unwrap();
    assert_eq!(answer.text, "Dana owns X");
    assert_eq!(answer.grounding, Grounding::Table);
    assert_eq!(table.calls.load(Ordering::SeqCst), 1);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_mention_resolution_idempotent_end_to_end() {
    init_tracing();
    let source = Arc::new(scripted_conversation());
    let resolver = NameResolver::new(
        Arc::clone(&source) as Arc<dyn MessageSource>,
        RetryBudget::default(),
        8,
    );

    let once = resolver
        .resolve_mentions("cc <@U0AAAAAAA> and <@U0BBBBBBB>, also U0ZZZZZZZ")
        .await;
    let twice = resolver.resolve_mentions(&once).await;
    assert_eq!(once, "cc @alice and @bob, also @U0ZZZZZZZ");
    assert_eq!(once, twice);
}
