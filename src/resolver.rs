//! Speaker identifier and mention resolution.
//!
//! The source platform stores authors and inline mentions as opaque ids
//! (`U…`/`W…` for people, `B…` for bots). [`NameResolver`] turns those
//! into display names: lazily, cached for the lifetime of the resolver
//! (one ingestion run), and without ever failing — an id that cannot be
//! resolved is used verbatim as its own display value.
//!
//! The cache is capacity-bounded with drop-oldest eviction so a very
//! large scope cannot grow it without limit.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use futures::{stream, StreamExt};
use regex::Regex;
use tracing::debug;

use crate::retry::{call_with_retry, RetryBudget};
use crate::source::MessageSource;

/// Upper bound on cached id → name entries per resolver instance.
const CACHE_CAPACITY: usize = 1024;

/// Bounded insertion-order cache.
struct NameCache {
    map: HashMap<String, String>,
    order: VecDeque<String>,
}

impl NameCache {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, id: &str) -> Option<String> {
        self.map.get(id).cloned()
    }

    fn insert(&mut self, id: String, name: String) {
        if self.map.contains_key(&id) {
            self.map.insert(id, name);
            return;
        }
        if self.order.len() >= CACHE_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
        self.order.push_back(id.clone());
        self.map.insert(id, name);
    }
}

/// Resolves speaker ids and inline mention tokens to display names.
pub struct NameResolver {
    source: Arc<dyn MessageSource>,
    budget: RetryBudget,
    concurrency: usize,
    cache: Mutex<NameCache>,
    token_re: Regex,
    bare_re: Regex,
}

impl NameResolver {
    pub fn new(source: Arc<dyn MessageSource>, budget: RetryBudget, concurrency: usize) -> Self {
        Self {
            source,
            budget,
            concurrency: concurrency.max(1),
            cache: Mutex::new(NameCache::new()),
            // `<@U02ABCDEF>` mention tokens
            token_re: Regex::new(r"<@([UW][A-Z0-9]{8,})>").expect("mention token regex"),
            // Bare ids; the optional leading `@` marks already-resolved text
            bare_re: Regex::new(r"@?\b([UW][A-Z0-9]{8,})\b").expect("bare id regex"),
        }
    }

    /// Display name for an id. Cached on first lookup; tries the person
    /// endpoint, then the bot endpoint, and falls back to the id itself.
    /// Never fails.
    pub async fn resolve_name(&self, id: &str) -> String {
        if let Some(name) = self.cache.lock().unwrap().get(id) {
            return name;
        }

        let name = self.lookup(id).await;
        self.cache
            .lock()
            .unwrap()
            .insert(id.to_string(), name.clone());
        name
    }

    async fn lookup(&self, id: &str) -> String {
        let source = &self.source;
        match call_with_retry(self.budget, "users.info", || source.user_profile(id)).await {
            Ok(profile) => {
                if let Some(name) = profile.best_name() {
                    return name.to_string();
                }
            }
            Err(e) => debug!(id, error = %e, "user lookup failed, trying bot"),
        }

        match call_with_retry(self.budget, "bots.info", || source.bot_profile(id)).await {
            Ok(profile) => profile
                .best_name()
                .map(|n| n.to_string())
                .unwrap_or_else(|| id.to_string()),
            Err(e) => {
                debug!(id, error = %e, "bot lookup failed, keeping raw id");
                id.to_string()
            }
        }
    }

    /// Replace every mention token in `text` with `@<display name>`.
    ///
    /// Distinct ids are resolved concurrently, bounded by the ingestion
    /// concurrency budget. Resolution is idempotent: text with no tokens
    /// left comes back unchanged.
    pub async fn resolve_mentions(&self, text: &str) -> String {
        let ids = self.collect_ids(text);
        if ids.is_empty() {
            return text.to_string();
        }

        let resolved: HashMap<String, String> = stream::iter(ids)
            .map(|id| async move {
                let name = self.resolve_name(&id).await;
                (id, name)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let pass1 = self.token_re.replace_all(text, |caps: &regex::Captures| {
            let id = &caps[1];
            format!("@{}", resolved.get(id).cloned().unwrap_or_else(|| id.to_string()))
        });

        let pass2 = self.bare_re.replace_all(&pass1, |caps: &regex::Captures| {
            let whole = caps.get(0).unwrap().as_str();
            // Already-resolved (`@…`) stays as is
            if whole.starts_with('@') {
                return whole.to_string();
            }
            let id = &caps[1];
            format!("@{}", resolved.get(id).cloned().unwrap_or_else(|| id.to_string()))
        });

        pass2.into_owned()
    }

    /// Distinct unresolved ids referenced by `text`.
    fn collect_ids(&self, text: &str) -> HashSet<String> {
        let mut ids = HashSet::new();
        for caps in self.token_re.captures_iter(text) {
            ids.insert(caps[1].to_string());
        }
        for caps in self.bare_re.captures_iter(text) {
            if !caps.get(0).unwrap().as_str().starts_with('@') {
                ids.insert(caps[1].to_string());
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::models::{Page, Profile, SourceMessage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubSource {
        user_calls: AtomicU32,
        bot_calls: AtomicU32,
    }

    impl StubSource {
        fn new() -> Self {
            Self {
                user_calls: AtomicU32::new(0),
                bot_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageSource for StubSource {
        async fn history_page(
            &self,
            _scope_id: &str,
            _cursor: Option<&str>,
        ) -> Result<Page<SourceMessage>, SourceError> {
            Ok(Page::empty())
        }

        async fn replies_page(
            &self,
            _scope_id: &str,
            _root_ts: &str,
            _cursor: Option<&str>,
        ) -> Result<Page<SourceMessage>, SourceError> {
            Ok(Page::empty())
        }

        async fn user_profile(&self, id: &str) -> Result<Profile, SourceError> {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            match id {
                "U11111111" => Ok(Profile {
                    display_name: Some("alice".into()),
                    real_name: Some("Alice Kim".into()),
                }),
                "U22222222" => Ok(Profile {
                    display_name: None,
                    real_name: Some("Bob Lee".into()),
                }),
                _ => Err(SourceError::Api {
                    status: 404,
                    message: "user_not_found".into(),
                }),
            }
        }

        async fn bot_profile(&self, id: &str) -> Result<Profile, SourceError> {
            self.bot_calls.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Api {
                status: 404,
                message: format!("bot_not_found: {id}"),
            })
        }
    }

    fn resolver(source: Arc<StubSource>) -> NameResolver {
        NameResolver::new(source, RetryBudget::default(), 4)
    }

    #[tokio::test]
    async fn test_resolve_name_prefers_display_name() {
        let r = resolver(Arc::new(StubSource::new()));
        assert_eq!(r.resolve_name("U11111111").await, "alice");
        assert_eq!(r.resolve_name("U22222222").await, "Bob Lee");
    }

    #[tokio::test]
    async fn test_resolve_name_falls_back_to_id() {
        let r = resolver(Arc::new(StubSource::new()));
        assert_eq!(r.resolve_name("U99999999").await, "U99999999");
    }

    #[tokio::test]
    async fn test_cache_avoids_second_lookup() {
        let source = Arc::new(StubSource::new());
        let r = resolver(Arc::clone(&source));
        r.resolve_name("U11111111").await;
        r.resolve_name("U11111111").await;
        assert_eq!(source.user_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_mentions_substitutes_tokens() {
        let r = resolver(Arc::new(StubSource::new()));
        let out = r
            .resolve_mentions("hey <@U11111111>, can you sync with U22222222?")
            .await;
        assert_eq!(out, "hey @alice, can you sync with @Bob Lee?");
    }

    #[tokio::test]
    async fn test_resolve_mentions_idempotent() {
        let r = resolver(Arc::new(StubSource::new()));
        let once = r
            .resolve_mentions("ping <@U11111111> and U99999999 about the rollout")
            .await;
        let twice = r.resolve_mentions(&once).await;
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_no_tokens_is_noop() {
        let r = resolver(Arc::new(StubSource::new()));
        let text = "plain text without any mention";
        assert_eq!(r.resolve_mentions(text).await, text);
    }

    #[test]
    fn test_cache_eviction_drops_oldest() {
        let mut cache = NameCache::new();
        for i in 0..CACHE_CAPACITY + 1 {
            cache.insert(format!("U{i:08}"), format!("name{i}"));
        }
        assert!(cache.get("U00000000").is_none());
        assert!(cache.get(&format!("U{:08}", CACHE_CAPACITY)).is_some());
        assert_eq!(cache.map.len(), CACHE_CAPACITY);
    }
}
