//! Message source API client.
//!
//! [`MessageSource`] is the seam between the ingestion pipeline and the
//! external messaging platform: paginated root-message listing, paginated
//! reply listing per thread, and identifier-to-profile lookup (person or
//! bot). Implementations surface rate limits as
//! [`SourceError::RateLimited`] carrying the provider-specified delay so
//! the retry layer can sleep exactly as long as asked.
//!
//! [`HttpMessageSource`] talks to a Slack-shaped web API: bearer-token
//! auth, `conversations.history` / `conversations.replies` with
//! cursor-based pagination, `users.info` / `bots.info` for profiles, and
//! HTTP 429 + `Retry-After` for throttling.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::models::{Page, Profile, SourceMessage};

/// Fallback delay when a rate-limit response carries no usable header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 20;

/// Paginated, rate-limited access to one conversation platform.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// One page of root-level history for a scope.
    async fn history_page(
        &self,
        scope_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<SourceMessage>, SourceError>;

    /// One page of replies for a root message. The first page echoes the
    /// parent message as its first item; callers strip it.
    async fn replies_page(
        &self,
        scope_id: &str,
        root_ts: &str,
        cursor: Option<&str>,
    ) -> Result<Page<SourceMessage>, SourceError>;

    /// Profile lookup for a person identifier.
    async fn user_profile(&self, id: &str) -> Result<Profile, SourceError>;

    /// Profile lookup for a bot identifier.
    async fn bot_profile(&self, id: &str) -> Result<Profile, SourceError>;
}

/// HTTP implementation of [`MessageSource`] for a Slack-shaped REST API.
pub struct HttpMessageSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
    page_limit: usize,
    reply_page_limit: usize,
}

impl HttpMessageSource {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        page_limit: usize,
        reply_page_limit: usize,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            page_limit,
            reply_page_limit,
        })
    }

    /// Issue one API call and decode the platform envelope.
    ///
    /// Throttling comes back two ways: HTTP 429 with a `Retry-After`
    /// header, or an `ok: false` envelope with error `"ratelimited"`.
    /// Both map to [`SourceError::RateLimited`].
    async fn get_json(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<serde_json::Value, SourceError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(SourceError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let json: serde_json::Value = response.json().await?;

        if !json.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            let error = json
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown_error");
            if error == "ratelimited" {
                let retry_after = json
                    .get("retry_after")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                return Err(SourceError::RateLimited {
                    retry_after: Duration::from_secs(retry_after),
                });
            }
            return Err(SourceError::Api {
                status: status.as_u16(),
                message: error.to_string(),
            });
        }

        Ok(json)
    }
}

/// Decode the `messages` + `response_metadata.next_cursor` page shape.
/// An empty-string cursor means the listing is complete.
fn decode_page(json: serde_json::Value) -> Result<Page<SourceMessage>, SourceError> {
    let items: Vec<SourceMessage> = match json.get("messages") {
        Some(messages) => serde_json::from_value(messages.clone())
            .map_err(|e| SourceError::Decode(format!("bad messages array: {e}")))?,
        None => Vec::new(),
    };

    let next_cursor = json
        .get("response_metadata")
        .and_then(|m| m.get("next_cursor"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string());

    Ok(Page { items, next_cursor })
}

#[async_trait]
impl MessageSource for HttpMessageSource {
    async fn history_page(
        &self,
        scope_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<SourceMessage>, SourceError> {
        let limit = self.page_limit.to_string();
        let mut query = vec![("channel", scope_id), ("limit", limit.as_str())];
        if let Some(c) = cursor {
            query.push(("cursor", c));
        }
        let json = self.get_json("conversations.history", &query).await?;
        decode_page(json)
    }

    async fn replies_page(
        &self,
        scope_id: &str,
        root_ts: &str,
        cursor: Option<&str>,
    ) -> Result<Page<SourceMessage>, SourceError> {
        let limit = self.reply_page_limit.to_string();
        let mut query = vec![
            ("channel", scope_id),
            ("ts", root_ts),
            ("limit", limit.as_str()),
        ];
        if let Some(c) = cursor {
            query.push(("cursor", c));
        }
        let json = self.get_json("conversations.replies", &query).await?;
        decode_page(json)
    }

    async fn user_profile(&self, id: &str) -> Result<Profile, SourceError> {
        let json = self.get_json("users.info", &[("user", id)]).await?;
        let profile = json
            .get("user")
            .and_then(|u| u.get("profile"))
            .cloned()
            .ok_or_else(|| SourceError::Decode("users.info response missing profile".into()))?;
        serde_json::from_value(profile)
            .map_err(|e| SourceError::Decode(format!("bad user profile: {e}")))
    }

    async fn bot_profile(&self, id: &str) -> Result<Profile, SourceError> {
        let json = self.get_json("bots.info", &[("bot", id)]).await?;
        let name = json
            .get("bot")
            .and_then(|b| b.get("name"))
            .and_then(|n| n.as_str())
            .ok_or_else(|| SourceError::Decode("bots.info response missing name".into()))?;
        Ok(Profile {
            display_name: Some(name.to_string()),
            real_name: None,
        })
    }
}
