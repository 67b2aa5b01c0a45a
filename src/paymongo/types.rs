//! Wire shapes of the PayMongo payment-intent API and the domain types the
//! rest of the crate sees.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a payment intent as reported by the processor. The set is open:
/// anything not listed lands in [`IntentStatus::Unrecognized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IntentStatus {
    AwaitingPaymentMethod,
    AwaitingNextAction,
    Processing,
    Succeeded,
    Failed,
    Unrecognized(String),
}

impl IntentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            IntentStatus::AwaitingPaymentMethod => "awaiting_payment_method",
            IntentStatus::AwaitingNextAction => "awaiting_next_action",
            IntentStatus::Processing => "processing",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Failed => "failed",
            IntentStatus::Unrecognized(raw) => raw,
        }
    }
}

impl From<&str> for IntentStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "awaiting_payment_method" => IntentStatus::AwaitingPaymentMethod,
            "awaiting_next_action" => IntentStatus::AwaitingNextAction,
            "processing" => IntentStatus::Processing,
            "succeeded" => IntentStatus::Succeeded,
            "failed" => IntentStatus::Failed,
            other => IntentStatus::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for IntentStatus {
    fn from(raw: String) -> Self {
        IntentStatus::from(raw.as_str())
    }
}

impl From<IntentStatus> for String {
    fn from(status: IntentStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment created by the processor once an attached method is charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextActionRedirect {
    pub url: String,
    #[serde(default)]
    pub return_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextAction {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub redirect: Option<NextActionRedirect>,
}

/// The processor's view of a single checkout payment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub status: IntentStatus,
    pub client_key: Option<String>,
    pub payments: Vec<PaymentRecord>,
    pub next_action: Option<NextAction>,
}

impl PaymentIntent {
    pub fn first_payment_id(&self) -> Option<&str> {
        self.payments.first().map(|p| p.id.as_str())
    }

    pub fn redirect_url(&self) -> Option<&str> {
        self.next_action
            .as_ref()
            .and_then(|action| action.redirect.as_ref())
            .map(|redirect| redirect.url.as_str())
            .filter(|url| !url.is_empty())
    }
}

/// Outcome of attaching a payment method to an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachResult {
    pub status: IntentStatus,
    pub payments: Vec<PaymentRecord>,
    pub redirect_url: Option<String>,
}

impl From<PaymentIntent> for AttachResult {
    fn from(intent: PaymentIntent) -> Self {
        let redirect_url = intent.redirect_url().map(str::to_string);
        Self {
            status: intent.status,
            payments: intent.payments,
            redirect_url,
        }
    }
}

/// `POST /payment_intents` attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateIntentParams {
    pub amount: i64,
    pub payment_method_allowed: Vec<String>,
    pub currency: String,
    pub description: String,
}

impl CreateIntentParams {
    pub fn card(amount: i64, currency: &str, description: impl Into<String>) -> Self {
        Self {
            amount,
            payment_method_allowed: vec!["card".to_string()],
            currency: currency.to_string(),
            description: description.into(),
        }
    }
}

/// `POST /payment_intents/{id}/attach` attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachParams {
    pub payment_method: String,
    pub return_url: String,
}

/// One entry of a structured error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    pub detail: String,
}

impl ErrorDetail {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            code: None,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RequestEnvelope<T> {
    pub data: RequestData<T>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RequestData<T> {
    pub attributes: T,
}

impl<T> RequestEnvelope<T> {
    pub fn new(attributes: T) -> Self {
        Self {
            data: RequestData { attributes },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct IntentEnvelope {
    pub data: IntentResource,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IntentResource {
    #[serde(default)]
    pub id: String,
    pub attributes: IntentAttributes,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IntentAttributes {
    pub status: IntentStatus,
    #[serde(default)]
    pub client_key: Option<String>,
    #[serde(default)]
    pub payments: Vec<PaymentRecord>,
    #[serde(default)]
    pub next_action: Option<NextAction>,
}

impl From<IntentEnvelope> for PaymentIntent {
    fn from(envelope: IntentEnvelope) -> Self {
        let IntentResource { id, attributes } = envelope.data;
        Self {
            id,
            status: attributes.status,
            client_key: attributes.client_key,
            payments: attributes.payments,
            next_action: attributes.next_action,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}
