//! OpenAI-compatible HTTP client
//!
//! One POST per turn against `{base_url}/chat/completions`. Transient
//! failures (429, 5xx, transport) retry up to three times with jittered
//! exponential backoff before surfacing as typed errors.

use super::chat::{ChatRequest, ChatResponse};
use super::{ChatModel, LlmReply, TokenUsage, ToolCall};
use crate::error::{LucyError, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{header::RETRY_AFTER, Client as HttpClient, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;

/// HTTP client for an OpenAI-compatible chat completions gateway
pub struct HttpLlmClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl HttpLlmClient {
    /// Create a new client. Fails only when no API key can be resolved.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        let api_key = if api_key.is_empty() {
            std::env::var("LUCY_LLM_API_KEY").map_err(|_| LucyError::MissingConfig {
                key: "llm.api_key".to_string(),
            })?
        } else {
            api_key
        };

        let http = HttpClient::builder()
            .timeout(Duration::from_secs(300))
            .user_agent("lucy/0.3")
            .build()
            .map_err(|e| LucyError::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post_once(&self, request: &ChatRequest) -> Result<LlmReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    LucyError::LlmTransient {
                        message: e.to_string(),
                    }
                } else {
                    LucyError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LucyError::LlmRateLimited {
                message: format!("429 from {}", self.base_url),
                retry_after,
            });
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(LucyError::LlmTransient {
                message: format!("{}: {}", status, truncate(&body, 200)),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LucyError::LlmUnauthorized {
                message: status.to_string(),
            });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(LucyError::LlmBadRequest {
                message: format!("{}: {}", status, truncate(&body, 200)),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LucyError::LlmMalformed {
                detail: e.to_string(),
            })?;
        Ok(reply_from_wire(parsed))
    }
}

#[async_trait]
impl ChatModel for HttpLlmClient {
    async fn chat(&self, request: &ChatRequest) -> Result<LlmReply> {
        let mut attempt = 0u32;
        loop {
            match self.post_once(request).await {
                Ok(reply) => return Ok(reply),
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    let backoff = backoff_with_jitter(attempt, err.retry_delay());
                    warn!(
                        model = %request.model,
                        attempt,
                        wait_ms = backoff.as_millis() as u64,
                        "transient llm failure, retrying: {}",
                        err
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn reply_from_wire(parsed: ChatResponse) -> LlmReply {
    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    let (content, tool_calls) = match parsed.choices.into_iter().next() {
        Some(choice) => {
            let content = choice.message.content.unwrap_or_default();
            let tool_calls = choice
                .message
                .tool_calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: c.function.arguments,
                })
                .collect();
            (content, tool_calls)
        }
        None => (String::new(), Vec::new()),
    };

    debug!(
        content_len = content.len(),
        tool_calls = tool_calls.len(),
        "llm reply"
    );
    LlmReply {
        content,
        tool_calls,
        usage,
    }
}

/// 1s, 2s, 4s base with up to 25% random jitter, or the provider's own
/// suggestion when it gave one.
fn backoff_with_jitter(attempt: u32, suggested: Option<Duration>) -> Duration {
    let base = suggested.unwrap_or_else(|| Duration::from_secs(1 << attempt.min(2)));
    let jitter = rand::thread_rng().gen_range(0.0..0.25);
    base.mul_f64(1.0 + jitter)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let b0 = backoff_with_jitter(0, None);
        let b2 = backoff_with_jitter(2, None);
        assert!(b0 >= Duration::from_secs(1));
        assert!(b0 < Duration::from_millis(1300));
        assert!(b2 >= Duration::from_secs(4));
        assert!(b2 < Duration::from_secs(6));
    }

    #[test]
    fn backoff_prefers_provider_suggestion() {
        let b = backoff_with_jitter(0, Some(Duration::from_secs(7)));
        assert!(b >= Duration::from_secs(7));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 5), "héllo");
        assert_eq!(truncate("ab", 5), "ab");
    }
}
