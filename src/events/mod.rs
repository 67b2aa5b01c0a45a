use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Invoice data handed to whatever delivers receipts to customers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub recipient: Option<String>,
    pub total: Decimal,
    pub currency: String,
    pub transaction_id: String,
}

// Things that happened to an order during checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    PaymentIntentCreated {
        order_id: Uuid,
        intent_id: String,
    },
    OrderPaid {
        order_id: Uuid,
        transaction_id: String,
        paid_at: DateTime<Utc>,
    },
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },
    StockReduced {
        order_id: Uuid,
        line_items: usize,
    },
    InvoiceRequested(InvoiceRequest),
    CartCleared {
        cart_id: Uuid,
    },
    WebhookProcessed {
        event_id: String,
        event_type: String,
    },
}

/// Drains the event channel. Invoice requests are the hand-off point to the
/// mail system; everything else is recorded in the log.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::PaymentIntentCreated { order_id, intent_id } => {
                info!(%order_id, %intent_id, "Payment intent linked to order");
            }
            Event::OrderPaid {
                order_id,
                transaction_id,
                paid_at,
            } => {
                info!(%order_id, %transaction_id, %paid_at, "Order paid");
            }
            Event::PaymentFailed { order_id, reason } => {
                warn!(%order_id, %reason, "Payment failed");
            }
            Event::StockReduced {
                order_id,
                line_items,
            } => {
                info!(%order_id, line_items, "Stock reduced for order");
            }
            Event::InvoiceRequested(invoice) => {
                if invoice.recipient.is_none() {
                    error!(order_id = %invoice.order_id, "Invoice requested for order without a recipient");
                } else {
                    info!(
                        order_id = %invoice.order_id,
                        order_number = %invoice.order_number,
                        total = %invoice.total,
                        currency = %invoice.currency,
                        "Invoice queued for delivery"
                    );
                }
            }
            Event::CartCleared { cart_id } => {
                info!(%cart_id, "Cart cleared");
            }
            Event::WebhookProcessed {
                event_id,
                event_type,
            } => {
                info!(%event_id, %event_type, "Webhook processed");
            }
        }
    }

    info!("Event processing loop stopped");
}
