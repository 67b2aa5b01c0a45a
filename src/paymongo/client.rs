use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, RequestBuilder};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::types::{ErrorBody, IntentEnvelope, RequestEnvelope};
use super::{
    AttachParams, AttachResult, CreateIntentParams, PaymentIntent, PaymentProcessor,
    ProcessorError,
};
use crate::config::GatewayConfig;
use crate::middleware_helpers::retry::{with_retry, RetryConfig, RetryPolicy};

/// Only transport failures and 5xx answers are worth a second status query.
pub struct ProcessorRetryPolicy;

impl RetryPolicy<ProcessorError> for ProcessorRetryPolicy {
    fn is_retryable(&self, error: &ProcessorError) -> bool {
        match error {
            ProcessorError::Transport(_) => true,
            ProcessorError::UnexpectedResponse { status, .. } => *status >= 500,
            ProcessorError::Rejected(_) => false,
        }
    }
}

/// HTTP client for the PayMongo REST API.
#[derive(Clone)]
pub struct PaymongoClient {
    http: reqwest::Client,
    base_url: String,
    fetch_retry: RetryConfig,
}

impl PaymongoClient {
    /// Builds a client with the gateway's timeouts and base URL.
    pub fn new(config: &GatewayConfig) -> Result<Self, ProcessorError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ProcessorError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            fetch_retry: RetryConfig::single_retry(config.fetch_retry_delay()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `Basic base64(secret_key)`; the public key is never used here.
    fn authorization(secret_key: &str) -> String {
        format!("Basic {}", STANDARD.encode(secret_key))
    }

    fn request(&self, builder: RequestBuilder, secret_key: &str) -> RequestBuilder {
        builder
            .header(header::AUTHORIZATION, Self::authorization(secret_key))
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, "application/json")
    }

    async fn post<T: Serialize + Sync>(
        &self,
        path: &str,
        attributes: &T,
        secret_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        let builder = self
            .request(self.http.post(self.url(path)), secret_key)
            .json(&RequestEnvelope::new(attributes));
        Self::send(builder).await
    }

    async fn fetch_once(
        &self,
        intent_id: &str,
        secret_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        let path = format!("payment_intents/{}", intent_id);
        let builder = self.request(self.http.get(self.url(&path)), secret_key);
        Self::send(builder).await
    }

    async fn send(builder: RequestBuilder) -> Result<PaymentIntent, ProcessorError> {
        let response = builder.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            };
            error!(error = %reason, "PayMongo request failed");
            ProcessorError::Transport(reason)
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            error!(error = %e, "Failed reading PayMongo response body");
            ProcessorError::Transport(e.to_string())
        })?;

        if let Ok(error_body) = serde_json::from_slice::<ErrorBody>(&body) {
            if !error_body.errors.is_empty() {
                for detail in &error_body.errors {
                    warn!(
                        http_status = status.as_u16(),
                        code = detail.code.as_deref().unwrap_or(""),
                        detail = %detail.detail,
                        "PayMongo rejected request"
                    );
                }
                return Err(ProcessorError::Rejected(error_body.errors));
            }
        }

        if !status.is_success() {
            let message = String::from_utf8_lossy(&body).into_owned();
            error!(http_status = status.as_u16(), body = %message, "Unexpected PayMongo response");
            return Err(ProcessorError::UnexpectedResponse {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: IntentEnvelope = serde_json::from_slice(&body).map_err(|e| {
            error!(error = %e, "Unreadable PayMongo payment intent body");
            ProcessorError::UnexpectedResponse {
                status: status.as_u16(),
                message: format!("invalid payment intent body: {}", e),
            }
        })?;

        Ok(envelope.into())
    }
}

#[async_trait]
impl PaymentProcessor for PaymongoClient {
    #[instrument(skip(self, secret_key), fields(amount = params.amount))]
    async fn create_intent(
        &self,
        params: &CreateIntentParams,
        secret_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        let intent = self.post("payment_intents", params, secret_key).await?;
        info!(intent_id = %intent.id, status = %intent.status, "Payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self, params, secret_key))]
    async fn attach_method(
        &self,
        intent_id: &str,
        params: &AttachParams,
        secret_key: &str,
    ) -> Result<AttachResult, ProcessorError> {
        let path = format!("payment_intents/{}/attach", intent_id);
        let intent = self.post(&path, params, secret_key).await?;
        debug!(status = %intent.status, "Payment method attached");
        Ok(intent.into())
    }

    #[instrument(skip(self, secret_key))]
    async fn fetch_intent(
        &self,
        intent_id: &str,
        secret_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        with_retry(&self.fetch_retry, ProcessorRetryPolicy, || {
            self.fetch_once(intent_id, secret_key)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_encodes_only_the_secret_key() {
        assert_eq!(
            PaymongoClient::authorization("sk_test_abc"),
            format!("Basic {}", STANDARD.encode("sk_test_abc"))
        );
    }

    #[test]
    fn retry_policy_skips_rejections() {
        let policy = ProcessorRetryPolicy;
        assert!(policy.is_retryable(&ProcessorError::Transport("reset".into())));
        assert!(policy.is_retryable(&ProcessorError::UnexpectedResponse {
            status: 503,
            message: String::new()
        }));
        assert!(!policy.is_retryable(&ProcessorError::UnexpectedResponse {
            status: 404,
            message: String::new()
        }));
        assert!(!policy.is_retryable(&ProcessorError::Rejected(vec![])));
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let config = GatewayConfig {
            api_base_url: "https://api.paymongo.com/v1/".into(),
            ..GatewayConfig::default()
        };
        let client = PaymongoClient::new(&config).unwrap();
        assert_eq!(
            client.url("/payment_intents"),
            "https://api.paymongo.com/v1/payment_intents"
        );
    }
}
