//! Applies payment provider webhook events to order state.
//!
//! Idempotency is enforced in the database, not by read-then-write: the
//! approved transition is a single conditional UPDATE keyed on
//! `payment_id IS NULL`, so two concurrent deliveries of the same event
//! cannot both apply side effects. Terminal transitions (failed, cancelled,
//! refunded) are likewise guarded on the order's current status.

use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::entities::partner_sale::{self, PartnerSaleStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::inventory;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Inbound webhook body: `{type, data:{id, external_reference}}`.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WebhookData {
    /// Provider-side payment id; recorded as the idempotency key
    pub id: String,
    /// Order id, echoed back from preference creation
    #[serde(default)]
    pub external_reference: Option<String>,
}

/// Known webhook event kinds. Provider strings outside this set land in
/// `Unknown` and are acknowledged without any state change, so new event
/// kinds can never fall into the wrong branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    PaymentApproved,
    PaymentFailed,
    PaymentCancelled,
    PaymentRefunded,
    Unknown(String),
}

impl WebhookEventKind {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "payment.approved" => Self::PaymentApproved,
            "payment.failed" => Self::PaymentFailed,
            "payment.cancelled" => Self::PaymentCancelled,
            "payment.refunded" => Self::PaymentRefunded,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// What a webhook delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The transition was applied by this delivery
    Applied,
    /// Another delivery already applied this payment
    AlreadyProcessed,
    /// Unrecognized event kind, acknowledged with no state change
    Ignored,
}

pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
}

impl ReconciliationService {
    pub fn new(db: Arc<DatabaseConnection>, events: EventSender) -> Self {
        Self { db, events }
    }

    /// Applies one webhook event. Signature verification and rate limiting
    /// happen at the HTTP boundary before this is called.
    #[instrument(skip_all, fields(event_type = %payload.event_type, payment_id = %payload.data.id))]
    pub async fn process_event(&self, payload: &WebhookPayload) -> Result<Outcome, ServiceError> {
        let kind = WebhookEventKind::parse(&payload.event_type);

        if let WebhookEventKind::Unknown(ref event_type) = kind {
            info!(%event_type, "ignoring unrecognized webhook event");
            return Ok(Outcome::Ignored);
        }

        let order_id = self.correlate(payload)?;

        match kind {
            WebhookEventKind::PaymentApproved => {
                self.apply_approved(order_id, &payload.data.id).await
            }
            WebhookEventKind::PaymentFailed => {
                self.apply_terminal(
                    order_id,
                    PaymentStatus::Failed,
                    OrderStatus::PaymentFailed,
                    false,
                    Event::PaymentFailed(order_id),
                )
                .await
            }
            WebhookEventKind::PaymentCancelled => {
                self.apply_terminal(
                    order_id,
                    PaymentStatus::Cancelled,
                    OrderStatus::Cancelled,
                    false,
                    Event::PaymentCancelled(order_id),
                )
                .await
            }
            WebhookEventKind::PaymentRefunded => {
                self.apply_terminal(
                    order_id,
                    PaymentStatus::Refunded,
                    OrderStatus::Refunded,
                    true,
                    Event::PaymentRefunded(order_id),
                )
                .await
            }
            WebhookEventKind::Unknown(_) => Ok(Outcome::Ignored),
        }
    }

    fn correlate(&self, payload: &WebhookPayload) -> Result<Uuid, ServiceError> {
        let reference = payload.data.external_reference.as_deref().ok_or_else(|| {
            ServiceError::InvalidInput("Webhook event carries no order reference".to_string())
        })?;
        Uuid::parse_str(reference).map_err(|_| {
            ServiceError::InvalidInput(format!("Malformed order reference \"{}\"", reference))
        })
    }

    /// payment approved: record the payment id, move to processing, then run
    /// per-item settlement (stock decrement, partner sale bookkeeping).
    async fn apply_approved(
        &self,
        order_id: Uuid,
        payment_id: &str,
    ) -> Result<Outcome, ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Approved.to_string()),
            )
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Processing.to_string()),
            )
            .col_expr(order::Column::PaymentId, Expr::value(payment_id.to_string()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentId.is_null())
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            let order = order::Entity::find_by_id(order_id)
                .one(self.db.as_ref())
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Order {} not found", order_id))
                })?;

            if order.payment_id.is_some() {
                info!(%order_id, "payment already applied; skipping");
                return Ok(Outcome::AlreadyProcessed);
            }
            return Err(ServiceError::Conflict(format!(
                "Order {} could not be transitioned",
                order_id
            )));
        }

        self.settle_items(order_id).await?;
        self.emit(Event::PaymentApproved(order_id)).await;

        info!(%order_id, %payment_id, "payment approved and reconciled");
        Ok(Outcome::Applied)
    }

    /// Per-item settlement after an approved payment. A failed stock
    /// decrement is surfaced for manual reconciliation and never rolls back
    /// the payment confirmation.
    async fn settle_items(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(self.db.as_ref())
            .await?;

        for item in items {
            let decremented =
                inventory::decrement_stock(self.db.as_ref(), item.product_id, item.quantity)
                    .await?;
            if !decremented {
                warn!(
                    %order_id,
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    "stock decrement failed after payment confirmation"
                );
                self.emit(Event::StockDecrementFailed {
                    order_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .await;
            }

            if let Some(partner_id) = item.partner_id {
                let sale = partner_sale::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order_id),
                    order_item_id: Set(item.id),
                    partner_id: Set(partner_id),
                    product_id: Set(item.product_id),
                    amount: Set(item.partner_amount),
                    platform_fee: Set(item.platform_fee),
                    status: Set(PartnerSaleStatus::PendingPayout.to_string()),
                    created_at: Set(Utc::now()),
                    paid_out_at: Set(None),
                };
                sale.insert(self.db.as_ref()).await?;

                self.emit(Event::PartnerSaleRecorded {
                    order_id,
                    partner_id,
                    amount: item.partner_amount,
                })
                .await;
            }
        }

        Ok(())
    }

    /// Guarded terminal transition (failed, cancelled, refunded), reachable
    /// only from pending or processing.
    async fn apply_terminal(
        &self,
        order_id: Uuid,
        payment_status: PaymentStatus,
        status: OrderStatus,
        record_refund_time: bool,
        event: Event,
    ) -> Result<Outcome, ServiceError> {
        let mut update = order::Entity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(payment_status.to_string()),
            )
            .col_expr(order::Column::Status, Expr::value(status.to_string()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            );
        if record_refund_time {
            update = update.col_expr(order::Column::RefundedAt, Expr::value(Utc::now()));
        }

        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in([
                OrderStatus::Pending.to_string(),
                OrderStatus::Processing.to_string(),
            ]))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            let exists = order::Entity::find_by_id(order_id)
                .one(self.db.as_ref())
                .await?
                .is_some();
            if !exists {
                return Err(ServiceError::NotFound(format!(
                    "Order {} not found",
                    order_id
                )));
            }
            info!(%order_id, target = %status, "order already past this transition; skipping");
            return Ok(Outcome::AlreadyProcessed);
        }

        self.emit(event).await;
        info!(%order_id, %status, "terminal payment transition applied");
        Ok(Outcome::Applied)
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.events.send(event).await {
            warn!(error = %e, "event dispatch failed");
        }
    }
}
