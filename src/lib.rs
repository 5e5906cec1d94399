//! Marketplace backend: multi-partner checkout, payment webhook
//! reconciliation, delivery confirmation and fiscal document emission.

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod rate_limiter;
pub mod services;

use axum::{
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::rate_limiter::{RateLimitBackend, RateLimitConfig, RateLimiter};
use crate::services::coverage::{CepClient, CoverageService};
use crate::services::delivery::DeliveryService;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentClient;
use crate::services::reconciliation::ReconciliationService;

/// Shared application state, cheap to clone behind `Arc`.
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub events: EventSender,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentClient>,
    pub reconciliation: Arc<ReconciliationService>,
    pub delivery: Arc<DeliveryService>,
    pub coverage: Arc<CoverageService>,
    pub rate_limiter: Arc<RateLimiter>,
    /// Platform fee as a `Decimal` percentage, converted once from config
    pub fee_percent: Decimal,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>, events: EventSender) -> Self {
        let fee_percent = Decimal::try_from(config.platform_fee_percent).unwrap_or_else(|_| {
            warn!(
                value = config.platform_fee_percent,
                "platform_fee_percent is not representable; using the default rate"
            );
            services::fees::DEFAULT_PLATFORM_FEE_PERCENT
        });

        let cep = Arc::new(CepClient::new(
            config.cep_lookup_url.clone(),
            Duration::from_secs(config.cep_cache_ttl_secs),
        ));

        let rate_limit_config = RateLimitConfig {
            requests_per_window: config.rate_limit_requests_per_window,
            window_duration: Duration::from_secs(config.rate_limit_window_seconds),
        };
        let backend = match &config.rate_limit_redis_url {
            Some(url) => match redis::Client::open(url.as_str()) {
                Ok(client) => RateLimitBackend::Redis {
                    client: Arc::new(client),
                    namespace: config.rate_limit_namespace.clone(),
                },
                Err(e) => {
                    warn!(error = %e, "invalid Redis URL; using in-process rate limiting");
                    RateLimitBackend::InMemory
                }
            },
            None => RateLimitBackend::InMemory,
        };

        Self {
            orders: Arc::new(OrderService::new(db.clone())),
            payments: Arc::new(PaymentClient::from_config(&config)),
            reconciliation: Arc::new(ReconciliationService::new(db.clone(), events.clone())),
            delivery: Arc::new(DeliveryService::new(db.clone(), events.clone())),
            coverage: Arc::new(CoverageService::new(cep)),
            rate_limiter: Arc::new(RateLimiter::new(rate_limit_config, backend)),
            fee_percent,
            db,
            config,
            events,
        }
    }
}

/// Paginated listing envelope.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T: Serialize> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::checkout::checkout,
        handlers::payment_webhooks::payment_webhook,
        handlers::orders::get_order,
        handlers::orders::list_orders,
        handlers::orders::confirm_delivery,
        handlers::orders::carrier_delivered,
        handlers::orders::sweep_auto_confirm,
        handlers::health::health_check,
    ),
    components(schemas(
        handlers::checkout::CheckoutRequest,
        handlers::checkout::CheckoutResponse,
        handlers::checkout::CoverageRejection,
        handlers::orders::DeliveryActionResponse,
        handlers::orders::SweepResponse,
        handlers::health::HealthResponse,
        services::inventory::CartItem,
        services::orders::CustomerInfo,
        services::orders::ShippingAddress,
        services::payments::PaymentMethod,
        services::reconciliation::WebhookPayload,
        services::reconciliation::WebhookData,
        errors::ErrorResponse,
    )),
    info(
        title = "Feira API",
        description = "Marketplace checkout and payment reconciliation backend"
    )
)]
pub struct ApiDoc;

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Builds the full application router.
pub fn app_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/checkout", post(handlers::checkout::checkout))
        .route("/payments/webhook", post(handlers::payment_webhooks::payment_webhook))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/confirm-delivery",
            post(handlers::orders::confirm_delivery),
        )
        .route(
            "/orders/:id/carrier-delivered",
            post(handlers::orders::carrier_delivered),
        )
        .route(
            "/orders/sweep-auto-confirm",
            post(handlers::orders::sweep_auto_confirm),
        )
        .route("/openapi.json", get(openapi_spec));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
