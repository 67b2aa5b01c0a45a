//! Inbound processor webhooks: signature verification and event parsing.

use crate::config::GatewayMode;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use strum::EnumString;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `t=<unix>,te=<hex>,li=<hex>`.
pub const SIGNATURE_HEADER: &str = "paymongo-signature";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingHeader,
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("no {0} signature in header")]
    MissingSignature(&'static str),
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("unusable webhook secret")]
    InvalidSecret,
}

/// Parsed `Paymongo-Signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub test: Option<String>,
    pub live: Option<String>,
}

impl SignatureHeader {
    pub fn parse(raw: &str) -> Result<Self, WebhookError> {
        let mut timestamp = None;
        let mut test = None;
        let mut live = None;

        for part in raw.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or(WebhookError::MalformedHeader)?;
            let value = value.trim();
            match key.trim() {
                "t" => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| WebhookError::MalformedHeader)?,
                    )
                }
                "te" if !value.is_empty() => test = Some(value.to_string()),
                "li" if !value.is_empty() => live = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            timestamp: timestamp.ok_or(WebhookError::MalformedHeader)?,
            test,
            live,
        })
    }

    fn signature_for(&self, mode: GatewayMode) -> Option<&str> {
        match mode {
            GatewayMode::Test => self.test.as_deref(),
            GatewayMode::Live => self.live.as_deref(),
        }
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn compute_signature(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, WebhookError> {
    let mac = signing_mac(secret, timestamp, payload)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn signing_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Checks the header against the raw body using the active mode's secret.
/// Only the signature for `mode` is considered: a test-mode signature never
/// authenticates a live-mode deployment.
pub fn verify_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    mode: GatewayMode,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), WebhookError> {
    let parsed = SignatureHeader::parse(header)?;

    if tolerance_secs > 0 && now.abs_diff(parsed.timestamp) > tolerance_secs {
        return Err(WebhookError::StaleTimestamp);
    }

    let provided = parsed
        .signature_for(mode)
        .ok_or(WebhookError::MissingSignature(mode.as_str()))?;
    let provided = hex::decode(provided).map_err(|_| WebhookError::SignatureMismatch)?;

    signing_mac(secret, parsed.timestamp, payload)?
        .verify_slice(&provided)
        .map_err(|_| WebhookError::SignatureMismatch)
}

/// Event types the checkout reacts to. Anything else is acknowledged and logged.
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
pub enum WebhookEventType {
    #[strum(serialize = "payment.paid")]
    PaymentPaid,
    #[strum(serialize = "payment.failed")]
    PaymentFailed,
    #[strum(serialize = "source.chargeable")]
    SourceChargeable,
    #[strum(default)]
    Other(String),
}

impl WebhookEventType {
    pub fn as_str(&self) -> &str {
        match self {
            WebhookEventType::PaymentPaid => "payment.paid",
            WebhookEventType::PaymentFailed => "payment.failed",
            WebhookEventType::SourceChargeable => "source.chargeable",
            WebhookEventType::Other(raw) => raw,
        }
    }
}

/// Webhook delivery reduced to what the orchestrator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub id: String,
    pub kind: WebhookEventType,
    pub livemode: bool,
    /// Id of the resource the event is about (a payment for `payment.*`)
    pub resource_id: String,
    pub payment_intent_id: Option<String>,
    pub failure_message: Option<String>,
}

impl WebhookEvent {
    pub fn from_slice(body: &[u8]) -> Result<Self, WebhookError> {
        let envelope: EventEnvelope = serde_json::from_slice(body)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        let event = envelope.data;
        if event.id.trim().is_empty() {
            return Err(WebhookError::InvalidPayload("event id is empty".into()));
        }

        let kind = match WebhookEventType::from_str(&event.attributes.kind) {
            Ok(kind) => kind,
            Err(_) => WebhookEventType::Other(event.attributes.kind.clone()),
        };
        let resource = event.attributes.data;
        let (payment_intent_id, failure_message) = match resource.attributes {
            Some(attrs) => (
                attrs.payment_intent_id.filter(|id| !id.is_empty()),
                attrs.failed_message,
            ),
            None => (None, None),
        };

        Ok(Self {
            id: event.id,
            kind,
            livemode: event.attributes.livemode,
            resource_id: resource.id,
            payment_intent_id,
            failure_message,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    data: EventResource,
}

#[derive(Debug, Deserialize)]
struct EventResource {
    id: String,
    attributes: EventAttributes,
}

#[derive(Debug, Deserialize)]
struct EventAttributes {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    livemode: bool,
    data: EventSubject,
}

#[derive(Debug, Deserialize)]
struct EventSubject {
    #[serde(default)]
    id: String,
    #[serde(default)]
    attributes: Option<SubjectAttributes>,
}

#[derive(Debug, Deserialize)]
struct SubjectAttributes {
    #[serde(default)]
    payment_intent_id: Option<String>,
    #[serde(default)]
    failed_message: Option<String>,
}
