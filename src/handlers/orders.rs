//! Order queries and delivery confirmation actions.

use crate::entities::{order, order_item};
use crate::errors::ServiceError;
use crate::{AppState, PaginatedResponse};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Header set by the authentication layer in front of this service.
const CALLER_EMAIL_HEADER: &str = "x-user-email";

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub order: order::Model,
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    pub status: Option<String>,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with line items", body = OrderResponse),
        (status = 404, description = "Order not found")
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let (order, items) = state.orders.get_order(id).await?;
    Ok(Json(OrderResponse { order, items }))
}

#[utoipa::path(
    get,
    path = "/orders",
    params(ListOrdersQuery),
    responses((status = 200, description = "Paginated orders, newest first")),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<PaginatedResponse<order::Model>>, ServiceError> {
    let (orders, total) = state
        .orders
        .list_orders(query.page, query.per_page, query.status.as_deref())
        .await?;

    Ok(Json(PaginatedResponse {
        items: orders,
        total,
        page: query.page.max(1),
        per_page: query.per_page.clamp(1, 100),
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeliveryActionResponse {
    pub success: bool,
    pub message: String,
}

/// Customer confirmation that the order arrived. The caller's identity comes
/// from the authentication layer and must match the order's customer.
#[utoipa::path(
    post,
    path = "/orders/{id}/confirm-delivery",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Delivery confirmed", body = DeliveryActionResponse),
        (status = 400, description = "Awaiting carrier confirmation"),
        (status = 403, description = "Order belongs to another customer"),
        (status = 409, description = "Already confirmed")
    ),
    tag = "delivery"
)]
pub async fn confirm_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<DeliveryActionResponse>, ServiceError> {
    let caller_email = headers
        .get(CALLER_EMAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("Missing caller identity".to_string()))?;

    let order = state.delivery.confirm_delivery(id, caller_email).await?;

    Ok(Json(DeliveryActionResponse {
        success: true,
        message: format!("Delivery confirmed for order {}", order.order_number),
    }))
}

/// Carrier-side delivery confirmation, called by the shipping integration.
#[utoipa::path(
    post,
    path = "/orders/{id}/carrier-delivered",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Carrier confirmation recorded", body = DeliveryActionResponse),
        (status = 409, description = "Already recorded")
    ),
    tag = "delivery"
)]
pub async fn carrier_delivered(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryActionResponse>, ServiceError> {
    let order = state.delivery.confirm_carrier_delivery(id).await?;

    Ok(Json(DeliveryActionResponse {
        success: true,
        message: format!("Carrier delivery recorded for order {}", order.order_number),
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SweepResponse {
    pub confirmed: u64,
}

/// Deemed-acceptance sweep, triggered by an external scheduler.
#[utoipa::path(
    post,
    path = "/orders/sweep-auto-confirm",
    responses((status = 200, description = "Number of orders auto-confirmed", body = SweepResponse)),
    tag = "delivery"
)]
pub async fn sweep_auto_confirm(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepResponse>, ServiceError> {
    let confirmed = state
        .delivery
        .auto_confirm_overdue(state.config.delivery_auto_confirm_days)
        .await?;

    Ok(Json(SweepResponse { confirmed }))
}
