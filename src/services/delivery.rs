//! Delivery confirmation state machine.
//!
//! Shipped orders move through carrier confirmation and then customer
//! confirmation. A customer may only confirm after the carrier has, which
//! prevents premature fund release. A periodic sweep applies the
//! deemed-acceptance rule: carrier-confirmed orders untouched for the grace
//! period are confirmed automatically. Both the manual confirmation and the
//! sweep use conditional updates keyed on the current state, so they cannot
//! double-apply when they race.

use crate::entities::delivery_audit;
use crate::entities::order::{self, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const ACTION_CARRIER_DELIVERED: &str = "carrier_delivered";
const ACTION_CUSTOMER_CONFIRMED: &str = "customer_confirmed";
const ACTION_AUTO_CONFIRMED: &str = "auto_confirmed";
const SYSTEM_ACTOR: &str = "system";

pub struct DeliveryService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
}

impl DeliveryService {
    pub fn new(db: Arc<DatabaseConnection>, events: EventSender) -> Self {
        Self { db, events }
    }

    /// Records the carrier's delivery confirmation and moves the order to
    /// shipped if it was still processing.
    #[instrument(skip(self))]
    pub async fn confirm_carrier_delivery(
        &self,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(
                order::Column::CarrierDeliveredAt,
                Expr::value(Utc::now()),
            )
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Shipped.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::CarrierDeliveredAt.is_null())
            .filter(order::Column::Status.is_in([
                OrderStatus::Processing.to_string(),
                OrderStatus::Shipped.to_string(),
            ]))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            let order = self.load(order_id).await?;
            if order.carrier_delivered_at.is_some() {
                return Err(ServiceError::Conflict(format!(
                    "Carrier delivery already recorded for order {}",
                    order_id
                )));
            }
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is not awaiting delivery (status: {})",
                order_id, order.status
            )));
        }

        self.audit(order_id, ACTION_CARRIER_DELIVERED, SYSTEM_ACTOR)
            .await?;
        info!(%order_id, "carrier delivery recorded");
        self.load(order_id).await
    }

    /// Customer delivery confirmation. The caller's identity comes from the
    /// authenticated session and must match the order's customer. Rejected
    /// with an explicit message while the carrier has not signed off.
    #[instrument(skip(self, caller_email))]
    pub async fn confirm_delivery(
        &self,
        order_id: Uuid,
        caller_email: &str,
    ) -> Result<order::Model, ServiceError> {
        let order = self.load(order_id).await?;

        if !order.customer_email.eq_ignore_ascii_case(caller_email.trim()) {
            warn!(%order_id, "delivery confirmation attempted by non-owner");
            return Err(ServiceError::Forbidden(
                "This order belongs to another customer".to_string(),
            ));
        }

        if order.carrier_delivered_at.is_none() {
            return Err(ServiceError::InvalidOperation(
                "Awaiting carrier confirmation before delivery can be confirmed".to_string(),
            ));
        }

        let result = order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Delivered.to_string()),
            )
            .col_expr(order::Column::DeliveredAt, Expr::value(Utc::now()))
            .col_expr(order::Column::AutoConfirmed, Expr::value(false))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Shipped.to_string()))
            .filter(order::Column::DeliveredAt.is_null())
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Delivery already confirmed for order {}",
                order_id
            )));
        }

        self.audit(order_id, ACTION_CUSTOMER_CONFIRMED, &order.customer_email)
            .await?;
        self.emit(Event::DeliveryConfirmed {
            order_id,
            auto_confirmed: false,
        })
        .await;

        info!(%order_id, "delivery confirmed by customer");
        self.load(order_id).await
    }

    /// Deemed-acceptance sweep: confirms every order whose carrier
    /// confirmation is older than `grace_days` and that the customer never
    /// confirmed. Each order is transitioned with its own conditional update,
    /// so a manual confirmation landing mid-sweep wins and is left untouched.
    /// Returns the number of orders confirmed.
    #[instrument(skip(self))]
    pub async fn auto_confirm_overdue(&self, grace_days: i64) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - Duration::days(grace_days);

        let candidates = order::Entity::find()
            .filter(order::Column::Status.eq(OrderStatus::Shipped.to_string()))
            .filter(order::Column::DeliveredAt.is_null())
            .filter(order::Column::CarrierDeliveredAt.lte(cutoff))
            .all(self.db.as_ref())
            .await?;

        let mut confirmed = 0u64;
        for candidate in candidates {
            let result = order::Entity::update_many()
                .col_expr(
                    order::Column::Status,
                    Expr::value(OrderStatus::Delivered.to_string()),
                )
                .col_expr(order::Column::DeliveredAt, Expr::value(Utc::now()))
                .col_expr(order::Column::AutoConfirmed, Expr::value(true))
                .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(order::Column::Id.eq(candidate.id))
                .filter(order::Column::Status.eq(OrderStatus::Shipped.to_string()))
                .filter(order::Column::DeliveredAt.is_null())
                .exec(self.db.as_ref())
                .await?;

            if result.rows_affected == 0 {
                continue;
            }

            self.audit(candidate.id, ACTION_AUTO_CONFIRMED, SYSTEM_ACTOR)
                .await?;
            self.emit(Event::DeliveryConfirmed {
                order_id: candidate.id,
                auto_confirmed: true,
            })
            .await;
            confirmed += 1;
        }

        if confirmed > 0 {
            info!(confirmed, grace_days, "deemed-acceptance sweep completed");
        }
        Ok(confirmed)
    }

    async fn load(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn audit(
        &self,
        order_id: Uuid,
        action: &str,
        actor: &str,
    ) -> Result<(), ServiceError> {
        let entry = delivery_audit::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            action: Set(action.to_string()),
            actor: Set(actor.to_string()),
            created_at: Set(Utc::now()),
        };
        entry.insert(self.db.as_ref()).await?;
        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.events.send(event).await {
            warn!(error = %e, "event dispatch failed");
        }
    }
}
