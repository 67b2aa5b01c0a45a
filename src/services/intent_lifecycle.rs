//! Payment intent state machine.
//!
//! The processor drives every status change; this module only decides what
//! the checkout does next given the status it observed. Two tables exist: one
//! applied right after a payment method is attached, and one applied when a
//! customer (or the processor) comes back after an out-of-band step.

use crate::errors::CheckoutError;
use crate::paymongo::{AttachResult, IntentStatus, PaymentIntent, PaymentRecord};
use tracing::{error, warn};

/// What the orchestrator should do after observing an intent status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Payment captured; finalize the order with this payment id.
    Finalize { payment_id: String },
    /// Customer must complete an authorization step at `url`.
    Redirect { url: String },
    /// Method was not accepted; send the customer back to pay again.
    Retry,
    /// Status outside the recognized set. Nothing is finalized.
    Unsupported { status: IntentStatus },
}

/// Transition table applied to the response of an attach call.
///
/// `processing` is not a finalize condition here: a freshly attached method
/// that is still processing has no captured payment yet.
pub fn after_attach(result: &AttachResult) -> Result<Transition, CheckoutError> {
    match &result.status {
        IntentStatus::Succeeded => finalize_with(&result.status, &result.payments),
        IntentStatus::AwaitingNextAction => redirect_to(result.redirect_url.as_deref()),
        IntentStatus::AwaitingPaymentMethod => Ok(Transition::Retry),
        status @ (IntentStatus::Processing
        | IntentStatus::Failed
        | IntentStatus::Unrecognized(_)) => Ok(Transition::Unsupported {
            status: status.clone(),
        }),
    }
}

/// Transition table applied when resuming from a redirect or status query.
/// Both `succeeded` and `processing` count as captured.
pub fn after_resume(intent: &PaymentIntent) -> Result<Transition, CheckoutError> {
    match &intent.status {
        IntentStatus::Succeeded | IntentStatus::Processing => {
            finalize_with(&intent.status, &intent.payments)
        }
        IntentStatus::AwaitingNextAction => redirect_to(intent.redirect_url()),
        IntentStatus::AwaitingPaymentMethod => Ok(Transition::Retry),
        status @ (IntentStatus::Failed | IntentStatus::Unrecognized(_)) => {
            Ok(Transition::Unsupported {
                status: status.clone(),
            })
        }
    }
}

fn finalize_with(
    status: &IntentStatus,
    payments: &[PaymentRecord],
) -> Result<Transition, CheckoutError> {
    match payments.first().map(|p| p.id.trim()) {
        Some(id) if !id.is_empty() => Ok(Transition::Finalize {
            payment_id: id.to_string(),
        }),
        _ => {
            error!(%status, "Intent reports a captured payment but carries no payment id");
            Err(CheckoutError::InvariantViolation(format!(
                "intent is {} but has no payments",
                status
            )))
        }
    }
}

fn redirect_to(url: Option<&str>) -> Result<Transition, CheckoutError> {
    match url.map(str::trim) {
        Some(url) if !url.is_empty() => Ok(Transition::Redirect {
            url: url.to_string(),
        }),
        _ => {
            warn!("Intent awaits a next action but provides no redirect url");
            Err(CheckoutError::InvariantViolation(
                "intent is awaiting_next_action without a redirect url".to_string(),
            ))
        }
    }
}
