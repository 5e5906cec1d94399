//! Checkout submission: cart verification, coverage check, order creation
//! and payment session creation, in that order. No stock is reserved here.

use crate::entities::coverage_area;
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::coverage::{CoverageDecision, ResolvedLocation};
use crate::services::inventory::{self, CartItem};
use crate::services::orders::{CustomerInfo, ShippingAddress};
use crate::services::payments::PaymentMethod;
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate]
    pub customer: CustomerInfo,
    #[validate]
    pub address: ShippingAddress,
    pub items: Vec<CartItem>,
    /// Client-side cart total, verified against stored prices
    #[schema(value_type = String, example = "100.00")]
    pub total: Decimal,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub success: bool,
    pub order_id: Uuid,
    pub order_number: String,
    /// URL to redirect the customer to for payment
    pub payment_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CoverageRejection {
    pub error: String,
    pub out_of_coverage: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub user_location: Option<ResolvedLocation>,
}

/// Creates an order and a payment session from a submitted cart.
#[utoipa::path(
    post,
    path = "/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Order created, redirect to payment", body = CheckoutResponse),
        (status = 400, description = "Validation failure or destination out of coverage"),
        (status = 422, description = "Insufficient stock"),
        (status = 402, description = "Payment session could not be created")
    ),
    tag = "checkout"
)]
#[instrument(skip_all, fields(customer = %request.customer.email, lines = request.items.len()))]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Response, ServiceError> {
    request.validate()?;

    let lines = inventory::verify_cart(state.db.as_ref(), &request.items).await?;
    let total = inventory::check_cart_total(&lines, request.total)?;

    if let Some(rejection) = check_partner_coverage(&state, &request.address, &lines).await? {
        return Ok((StatusCode::BAD_REQUEST, Json(rejection)).into_response());
    }

    let (order, items) = state
        .orders
        .create_order(
            &request.customer,
            &request.address,
            &lines,
            Some(request.payment_method.to_string()),
            total,
            state.fee_percent,
        )
        .await?;

    let session = state
        .payments
        .create_checkout_session(&order, &items, request.payment_method)
        .await?;
    state
        .orders
        .record_payment_session(order.id, &session.session_id)
        .await?;

    if let Err(e) = state.events.send(Event::OrderCreated(order.id)).await {
        warn!(error = %e, "event dispatch failed");
    }

    info!(order_id = %order.id, "checkout completed; redirecting to payment");
    Ok(Json(CheckoutResponse {
        success: true,
        order_id: order.id,
        order_number: order.order_number,
        payment_url: session.redirect_url,
    })
    .into_response())
}

/// Every partner in the cart must cover the destination. Partners without
/// declared coverage areas ship nationwide.
async fn check_partner_coverage(
    state: &AppState,
    address: &ShippingAddress,
    lines: &[crate::services::inventory::VerifiedLine],
) -> Result<Option<CoverageRejection>, ServiceError> {
    let partner_ids: Vec<Uuid> = {
        let mut ids: Vec<Uuid> = lines.iter().filter_map(|l| l.product.partner_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    if partner_ids.is_empty() {
        return Ok(None);
    }

    let mut areas_by_partner: HashMap<Uuid, Vec<coverage_area::Model>> = HashMap::new();
    let areas = coverage_area::Entity::find()
        .filter(coverage_area::Column::PartnerId.is_in(partner_ids.clone()))
        .all(state.db.as_ref())
        .await?;
    for area in areas {
        areas_by_partner.entry(area.partner_id).or_default().push(area);
    }

    for partner_id in partner_ids {
        let partner_areas = areas_by_partner.remove(&partner_id).unwrap_or_default();
        let decision = state
            .coverage
            .validate_any(&address.postal_code, &partner_areas)
            .await?;

        if let CoverageDecision::NotCovered { reason, resolved } = decision {
            info!(%partner_id, %reason, "destination out of coverage");
            return Ok(Some(CoverageRejection {
                error: format!("Delivery is not available for your address: {}", reason),
                out_of_coverage: true,
                user_location: resolved,
            }));
        }
    }

    Ok(None)
}
