//! PayMongo processor integration.

mod client;
mod types;

pub use client::{PaymongoClient, ProcessorRetryPolicy};
pub use types::{
    AttachParams, AttachResult, CreateIntentParams, ErrorDetail, IntentStatus, NextAction,
    NextActionRedirect, PaymentIntent, PaymentRecord,
};

use async_trait::async_trait;

/// Payment method id orders carry when they are paid through this gateway.
pub const GATEWAY_ID: &str = "paymongo";

/// The only currency the gateway charges in.
pub const CURRENCY: &str = "PHP";

/// Failure talking to the processor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    /// Network failure or timeout; the remote side may or may not have acted.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Structured `errors[]` body returned by the processor.
    #[error("Rejected by processor: {}", .0.iter().map(|d| d.detail.as_str()).collect::<Vec<_>>().join("; "))]
    Rejected(Vec<ErrorDetail>),

    /// Non-success status or unreadable body without a structured error.
    #[error("Unexpected response ({status}): {message}")]
    UnexpectedResponse { status: u16, message: String },
}

/// The three payment-intent operations. Every call carries the secret key of
/// the active mode explicitly.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_intent(
        &self,
        params: &CreateIntentParams,
        secret_key: &str,
    ) -> Result<PaymentIntent, ProcessorError>;

    async fn attach_method(
        &self,
        intent_id: &str,
        params: &AttachParams,
        secret_key: &str,
    ) -> Result<AttachResult, ProcessorError>;

    async fn fetch_intent(
        &self,
        intent_id: &str,
        secret_key: &str,
    ) -> Result<PaymentIntent, ProcessorError>;
}
