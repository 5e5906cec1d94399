#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use feira_api::config::AppConfig;
use feira_api::db;
use feira_api::entities::{coverage_area, order, order_item, product};
use feira_api::events::{self, EventSender, SideEffects};
use feira_api::{app_router, AppState};

pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Test harness backed by a throwaway SQLite database.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    db_path: std::path::PathBuf,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application, letting the caller adjust configuration
    /// (e.g. to point external providers at a mock server).
    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let db_path = std::env::temp_dir().join(format!(
            "feira_test_{}.db",
            Uuid::new_v4().simple()
        ));

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        cfg.payment_access_token = Some("test-token".to_string());
        cfg.rate_limit_requests_per_window = 1_000;
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::bootstrap_schema(&pool)
            .await
            .expect("failed to bootstrap test schema");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx, SideEffects::default()));

        let state = Arc::new(AppState::new(
            db_arc,
            Arc::new(cfg),
            event_sender,
        ));

        let router = app_router(state.clone())
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 41234))));

        Self {
            router,
            state,
            db_path,
            _event_task: event_task,
        }
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Send a raw body with explicit headers, used by webhook tests.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder.body(Body::from(body)).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        stock: Option<i32>,
        partner_id: Option<Uuid>,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            partner_id: Set(partner_id),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed product")
    }

    pub async fn seed_coverage_area(
        &self,
        partner_id: Uuid,
        kind: &str,
        cities: Option<&str>,
        states: Option<&str>,
    ) -> coverage_area::Model {
        coverage_area::ActiveModel {
            id: Set(Uuid::new_v4()),
            partner_id: Set(partner_id),
            kind: Set(kind.to_string()),
            cities: Set(cities.map(str::to_string)),
            states: Set(states.map(str::to_string)),
            created_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed coverage area")
    }

    /// Inserts an order with one line item directly, bypassing checkout.
    #[allow(clippy::too_many_arguments)]
    pub async fn seed_order_with_item(
        &self,
        product: &product::Model,
        quantity: i32,
        status: &str,
        payment_status: &str,
        payment_id: Option<&str>,
        carrier_delivered_at: Option<DateTime<Utc>>,
    ) -> (order::Model, order_item::Model) {
        let order_id = Uuid::new_v4();
        let line_total = product.price * Decimal::from(quantity);
        let split = feira_api::services::fees::split_default(line_total);

        let header = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!("FR-TEST-{}", &order_id.simple().to_string()[..8])),
            customer_name: Set("Ana Souza".to_string()),
            customer_email: Set("ana@example.com".to_string()),
            customer_phone: Set(None),
            customer_tax_id: Set(Some("529.982.247-25".to_string())),
            address_street: Set("Rua das Flores".to_string()),
            address_number: Set(Some("100".to_string())),
            address_city: Set("São Paulo".to_string()),
            address_state: Set("SP".to_string()),
            address_postal_code: Set("01310-100".to_string()),
            total_amount: Set(line_total),
            status: Set(status.to_string()),
            payment_status: Set(payment_status.to_string()),
            payment_method: Set(Some("pix".to_string())),
            payment_id: Set(payment_id.map(str::to_string)),
            payment_session_id: Set(None),
            carrier_delivered_at: Set(carrier_delivered_at),
            delivered_at: Set(None),
            auto_confirmed: Set(false),
            refunded_at: Set(None),
            nfe_key: Set(None),
            nfe_url: Set(None),
            nfe_error: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            version: Set(1),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed order");

        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(product.id),
            partner_id: Set(product.partner_id),
            name: Set(product.name.clone()),
            quantity: Set(quantity),
            price_at_purchase: Set(product.price),
            partner_amount: Set(split.partner_amount),
            platform_fee: Set(split.platform_fee),
            created_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed order item");

        (header, item)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}

/// Signature header value for a webhook body, as the provider would send it.
pub fn sign_webhook(secret: &str, body: &[u8]) -> String {
    let ts = Utc::now().timestamp();
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(format!("{}.", ts).as_bytes());
    mac.update(body);
    format!("ts={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
