//! End-to-end checkout tests: cart verification, coverage, order creation
//! and payment session handoff.

mod common;

use axum::http::Method;
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feira_api::entities::{order, order_item};

async fn payment_mock() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout/preferences"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pref_123",
            "init_point": "https://pay.example.com/init/pref_123",
            "sandbox_init_point": "https://sandbox.pay.example.com/init/pref_123"
        })))
        .mount(&server)
        .await;
    server
}

fn checkout_body(product_id: Uuid, quantity: i32, unit_price: &str, total: &str) -> serde_json::Value {
    json!({
        "customer": {
            "name": "Ana Souza",
            "email": "ana@example.com",
            "phone": "+55 11 91234-5678",
            "tax_id": "529.982.247-25"
        },
        "address": {
            "street": "Rua das Flores",
            "number": "100",
            "city": "São Paulo",
            "state": "SP",
            "postal_code": "01310-100"
        },
        "items": [{
            "product_id": product_id,
            "quantity": quantity,
            "unit_price": unit_price,
            "name": "Ceramic Mug"
        }],
        "total": total,
        "payment_method": "pix"
    })
}

#[tokio::test]
async fn checkout_creates_order_with_fee_split_and_returns_payment_url() {
    let payments = payment_mock().await;
    let app = TestApp::with_config(|cfg| {
        cfg.payment_provider_url = payments.uri();
    })
    .await;

    let product = app.seed_product("Ceramic Mug", dec!(50.00), Some(5), None).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body(product.id, 2, "50.00", "100.00")),
            &[],
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(
        body["payment_url"],
        "https://sandbox.pay.example.com/init/pref_123"
    );
    let order_id = Uuid::parse_str(body["order_id"].as_str().unwrap()).unwrap();

    let stored = order::Entity::find_by_id(order_id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_amount, dec!(100.00));
    assert_eq!(stored.status, "pending");
    assert_eq!(stored.payment_status, "pending");
    assert_eq!(stored.payment_session_id.as_deref(), Some("pref_123"));
    assert!(stored.payment_id.is_none());

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].price_at_purchase, dec!(50.00));
    assert_eq!(items[0].partner_amount, dec!(92.50));
    assert_eq!(items[0].platform_fee, dec!(7.50));

    // stock is untouched until the payment webhook arrives
    let product_after = feira_api::entities::product::Entity::find_by_id(product.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product_after.stock, Some(5));
}

#[tokio::test]
async fn insufficient_stock_rejects_before_any_order_row() {
    let app = TestApp::new().await;
    let product = app.seed_product("Ceramic Mug", dec!(50.00), Some(1), None).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body(product.id, 2, "50.00", "100.00")),
            &[],
        )
        .await;
    assert_eq!(response.status(), 422);

    let body = response_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("stock"));

    let orders = order::Entity::find()
        .count(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(orders, 0);
}

#[tokio::test]
async fn unlimited_stock_accepts_any_quantity() {
    let payments = payment_mock().await;
    let app = TestApp::with_config(|cfg| {
        cfg.payment_provider_url = payments.uri();
    })
    .await;

    let product = app.seed_product("Digital Gift Card", dec!(50.00), None, None).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body(product.id, 500, "50.00", "25000.00")),
            &[],
        )
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn tampered_price_rejects_before_any_order_row() {
    let app = TestApp::new().await;
    let product = app.seed_product("Ceramic Mug", dec!(50.00), Some(5), None).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body(product.id, 2, "1.00", "2.00")),
            &[],
        )
        .await;
    assert_eq!(response.status(), 400);

    let orders = order::Entity::find()
        .count(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(orders, 0);
}

#[tokio::test]
async fn tampered_total_is_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product("Ceramic Mug", dec!(50.00), Some(5), None).await;

    // correct unit price, wrong total
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body(product.id, 2, "50.00", "50.00")),
            &[],
        )
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn out_of_coverage_destination_is_rejected_with_resolved_location() {
    let cep = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/01310100/json/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "localidade": "São Paulo",
            "uf": "SP"
        })))
        .mount(&cep)
        .await;

    let app = TestApp::with_config(|cfg| {
        cfg.cep_lookup_url = cep.uri();
    })
    .await;

    let partner_id = Uuid::new_v4();
    let product = app
        .seed_product("Queijo Canastra", dec!(80.00), Some(10), Some(partner_id))
        .await;
    app.seed_coverage_area(partner_id, "city", Some(r#"["Belo Horizonte"]"#), None)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body(product.id, 1, "80.00", "80.00")),
            &[],
        )
        .await;
    assert_eq!(response.status(), 400);

    let body = response_json(response).await;
    assert_eq!(body["out_of_coverage"], true);
    assert_eq!(body["user_location"]["city"], "São Paulo");

    let orders = order::Entity::find()
        .count(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(orders, 0);
}

#[tokio::test]
async fn covered_destination_passes_accent_insensitive_matching() {
    let cep = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/01310100/json/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "localidade": "São Paulo",
            "uf": "SP"
        })))
        .mount(&cep)
        .await;
    let payments = payment_mock().await;

    let app = TestApp::with_config(|cfg| {
        cfg.cep_lookup_url = cep.uri();
        cfg.payment_provider_url = payments.uri();
    })
    .await;

    let partner_id = Uuid::new_v4();
    let product = app
        .seed_product("Queijo Canastra", dec!(80.00), Some(10), Some(partner_id))
        .await;
    // stored without accents; the resolved city has them
    app.seed_coverage_area(partner_id, "city", Some(r#"["sao paulo"]"#), None)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body(product.id, 1, "80.00", "80.00")),
            &[],
        )
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn unknown_product_is_a_not_found() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(checkout_body(Uuid::new_v4(), 1, "50.00", "50.00")),
            &[],
        )
        .await;
    assert_eq!(response.status(), 404);
}
