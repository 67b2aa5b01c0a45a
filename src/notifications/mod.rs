use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument};

use crate::events::{Event, EventSender, InvoiceRequest};

/// Invoice delivery errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Order has no recipient address")]
    MissingRecipient,
    #[error("Delivery channel unavailable: {0}")]
    Unavailable(String),
}

/// Sends the customer a receipt for a paid order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvoiceNotifier: Send + Sync {
    async fn send_invoice(&self, invoice: &InvoiceRequest) -> Result<(), NotificationError>;
}

/// Queues invoices on the in-process event channel for the mail worker.
#[derive(Clone)]
pub struct EventInvoiceNotifier {
    events: EventSender,
}

impl EventInvoiceNotifier {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl InvoiceNotifier for EventInvoiceNotifier {
    #[instrument(skip(self, invoice), fields(order_id = %invoice.order_id))]
    async fn send_invoice(&self, invoice: &InvoiceRequest) -> Result<(), NotificationError> {
        if invoice.recipient.as_deref().map_or(true, str::is_empty) {
            return Err(NotificationError::MissingRecipient);
        }

        self.events
            .send(Event::InvoiceRequested(invoice.clone()))
            .await
            .map_err(NotificationError::Unavailable)?;

        info!("Invoice queued");
        Ok(())
    }
}
