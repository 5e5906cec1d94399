//! Delivery confirmation state machine tests, including the
//! deemed-acceptance sweep.

mod common;

use axum::http::Method;
use chrono::{Duration, Utc};
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::Value;

use feira_api::entities::{delivery_audit, order};

const CUSTOMER_EMAIL: &str = "ana@example.com";

#[tokio::test]
async fn customer_confirmation_requires_carrier_sign_off_first() {
    let app = TestApp::new().await;
    let product = app.seed_product("Ceramic Mug", dec!(50.00), Some(5), None).await;
    let (order_row, _) = app
        .seed_order_with_item(&product, 1, "shipped", "approved", Some("pay_1"), None)
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/confirm-delivery", order_row.id),
            None,
            &[("x-user-email", CUSTOMER_EMAIL)],
        )
        .await;
    assert_eq!(response.status(), 400);

    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .to_lowercase()
        .contains("awaiting carrier confirmation"));
}

#[tokio::test]
async fn carrier_then_customer_confirmation_delivers_the_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Ceramic Mug", dec!(50.00), Some(5), None).await;
    let (order_row, _) = app
        .seed_order_with_item(&product, 1, "processing", "approved", Some("pay_1"), None)
        .await;

    let carrier = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/carrier-delivered", order_row.id),
            None,
            &[],
        )
        .await;
    assert_eq!(carrier.status(), 200);

    let confirm = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/confirm-delivery", order_row.id),
            None,
            &[("x-user-email", CUSTOMER_EMAIL)],
        )
        .await;
    assert_eq!(confirm.status(), 200);

    let updated = order::Entity::find_by_id(order_row.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, "delivered");
    assert!(updated.carrier_delivered_at.is_some());
    assert!(updated.delivered_at.is_some());
    assert!(!updated.auto_confirmed);

    let audit: Vec<String> = delivery_audit::Entity::find()
        .filter(delivery_audit::Column::OrderId.eq(order_row.id))
        .all(app.state.db.as_ref())
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.action)
        .collect();
    assert!(audit.contains(&"carrier_delivered".to_string()));
    assert!(audit.contains(&"customer_confirmed".to_string()));
}

#[tokio::test]
async fn confirmation_by_another_customer_is_forbidden() {
    let app = TestApp::new().await;
    let product = app.seed_product("Ceramic Mug", dec!(50.00), Some(5), None).await;
    let (order_row, _) = app
        .seed_order_with_item(
            &product,
            1,
            "shipped",
            "approved",
            Some("pay_1"),
            Some(Utc::now()),
        )
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/confirm-delivery", order_row.id),
            None,
            &[("x-user-email", "intruder@example.com")],
        )
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn confirmation_without_identity_is_unauthorized() {
    let app = TestApp::new().await;
    let product = app.seed_product("Ceramic Mug", dec!(50.00), Some(5), None).await;
    let (order_row, _) = app
        .seed_order_with_item(
            &product,
            1,
            "shipped",
            "approved",
            Some("pay_1"),
            Some(Utc::now()),
        )
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/confirm-delivery", order_row.id),
            None,
            &[],
        )
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn sweep_confirms_only_orders_past_the_grace_period() {
    let app = TestApp::new().await;
    let product = app.seed_product("Ceramic Mug", dec!(50.00), Some(10), None).await;

    let (overdue, _) = app
        .seed_order_with_item(
            &product,
            1,
            "shipped",
            "approved",
            Some("pay_1"),
            Some(Utc::now() - Duration::days(8)),
        )
        .await;
    let (recent, _) = app
        .seed_order_with_item(
            &product,
            1,
            "shipped",
            "approved",
            Some("pay_2"),
            Some(Utc::now() - Duration::days(6)),
        )
        .await;

    let response = app
        .request(Method::POST, "/api/v1/orders/sweep-auto-confirm", None, &[])
        .await;
    assert_eq!(response.status(), 200);

    let body: Value = response_json(response).await;
    assert_eq!(body["confirmed"], 1);

    let overdue_after = order::Entity::find_by_id(overdue.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(overdue_after.status, "delivered");
    assert!(overdue_after.auto_confirmed);
    assert!(overdue_after.delivered_at.is_some());

    let recent_after = order::Entity::find_by_id(recent.id)
        .one(app.state.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recent_after.status, "shipped");
    assert!(!recent_after.auto_confirmed);
    assert!(recent_after.delivered_at.is_none());

    let audit = delivery_audit::Entity::find()
        .filter(delivery_audit::Column::OrderId.eq(overdue.id))
        .filter(delivery_audit::Column::Action.eq("auto_confirmed"))
        .all(app.state.db.as_ref())
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].actor, "system");

    // a second sweep finds nothing left to confirm
    let again = app
        .request(Method::POST, "/api/v1/orders/sweep-auto-confirm", None, &[])
        .await;
    assert_eq!(response_json(again).await["confirmed"], 0);
}
