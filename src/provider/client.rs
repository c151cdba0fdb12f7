use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

use super::ReasoningProvider;
use super::error::ProviderError;
use super::types::{CallOutput, CallPayload, Message, MessagesRequest, MessagesResponse};
use crate::tier::Tier;

const API_URL: &str = "https://api.anthropic.com/v1/messages";

/// HTTP client for the reasoning service.
pub struct HttpProvider {
    api_key: String,
    client: Client,
    base_url: String,
}

impl HttpProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");
        Self {
            api_key,
            client,
            base_url,
        }
    }

    /// Model identifier backing each paid tier.
    fn model_for(tier: Tier) -> &'static str {
        match tier {
            Tier::NoLlm => "", // never dispatched
            Tier::Small => "claude-haiku-4-5-20251001",
            Tier::Big => "claude-sonnet-4-5-20250929",
        }
    }
}

#[async_trait]
impl ReasoningProvider for HttpProvider {
    async fn call(&self, tier: Tier, payload: &CallPayload) -> Result<CallOutput, ProviderError> {
        if !tier.is_paid() {
            return Err(ProviderError::Malformed {
                status: 0,
                message: "the free tier has no reasoning-service model".to_string(),
            });
        }

        let req = MessagesRequest {
            model: Self::model_for(tier).to_string(),
            max_tokens: 2048,
            messages: vec![Message {
                role: "user".into(),
                content: super::types::extraction_prompt(payload),
            }],
        };

        let started = Instant::now();
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e)
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            let code = status.as_u16();
            // 400/422 are request-shape defects on our side.
            if code == 400 || code == 422 {
                return Err(ProviderError::Malformed {
                    status: code,
                    message,
                });
            }
            return Err(ProviderError::Api {
                status: code,
                message,
            });
        }

        let body = response.json::<MessagesResponse>().await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        Ok(CallOutput {
            text: body
                .content
                .first()
                .map(|b| b.text.trim().to_string())
                .unwrap_or_default(),
            cost: body.usage.cost(tier),
            latency_ms,
        })
    }
}
