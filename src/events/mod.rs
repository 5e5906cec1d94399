use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::{fiscal::FiscalService, notifications::NotificationService};

/// Events emitted by the pipeline. Side effects that must not delay or fail
/// the critical path (emails, fiscal emission) are handled by the background
/// loop in [`process_events`], after the triggering transaction has committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    PaymentApproved(Uuid),
    PaymentFailed(Uuid),
    PaymentCancelled(Uuid),
    PaymentRefunded(Uuid),
    PartnerSaleRecorded {
        order_id: Uuid,
        partner_id: Uuid,
        amount: Decimal,
    },
    StockDecrementFailed {
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    DeliveryConfirmed {
        order_id: Uuid,
        auto_confirmed: bool,
    },
    FiscalDocumentEmitted {
        order_id: Uuid,
        nfe_key: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Collaborators for best-effort side effects. Either may be absent (e.g. in
/// tests or when the provider is not configured); events then only log.
#[derive(Clone, Default)]
pub struct SideEffects {
    pub notifications: Option<Arc<NotificationService>>,
    pub fiscal: Option<Arc<FiscalService>>,
}

/// Consumes pipeline events and runs their side effects. Every handler here
/// is best-effort: failures are logged and never propagate.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, effects: SideEffects) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated(order_id) => {
                info!(%order_id, "Order created");
            }
            Event::PaymentApproved(order_id) => {
                info!(%order_id, "Payment approved; running post-payment side effects");

                if let Some(fiscal) = &effects.fiscal {
                    if let Err(e) = fiscal.emit_for_order(order_id).await {
                        warn!(%order_id, error = %e, "Fiscal document emission failed");
                    }
                }

                if let Some(notifications) = &effects.notifications {
                    if let Err(e) = notifications.notify_payment_approved(order_id).await {
                        warn!(%order_id, error = %e, "Payment approval notification failed");
                    }
                }
            }
            Event::PaymentFailed(order_id) => {
                warn!(%order_id, "Payment failed");
            }
            Event::PaymentCancelled(order_id) => {
                info!(%order_id, "Payment cancelled");
            }
            Event::PaymentRefunded(order_id) => {
                info!(%order_id, "Payment refunded");
            }
            Event::PartnerSaleRecorded {
                order_id,
                partner_id,
                amount,
            } => {
                info!(%order_id, %partner_id, %amount, "Partner sale recorded");

                if let Some(notifications) = &effects.notifications {
                    if let Err(e) = notifications
                        .notify_partner_sale(order_id, partner_id, amount)
                        .await
                    {
                        warn!(%order_id, %partner_id, error = %e, "Partner sale notification failed");
                    }
                }
            }
            Event::StockDecrementFailed {
                order_id,
                product_id,
                quantity,
            } => {
                // Surfaced for manual reconciliation; payment stays confirmed.
                error!(
                    %order_id, %product_id, quantity,
                    "Stock decrement failed after payment confirmation"
                );
            }
            Event::DeliveryConfirmed {
                order_id,
                auto_confirmed,
            } => {
                info!(%order_id, auto_confirmed, "Delivery confirmed");
            }
            Event::FiscalDocumentEmitted { order_id, nfe_key } => {
                info!(%order_id, %nfe_key, "Fiscal document emitted");

                if let Some(notifications) = &effects.notifications {
                    if let Err(e) = notifications.notify_fiscal_document(order_id).await {
                        warn!(%order_id, error = %e, "Fiscal document notification failed");
                    }
                }
            }
        }
    }

    warn!("Event processing loop has ended");
}
