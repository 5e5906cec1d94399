use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

/// Order header. Orders are financial records and are never deleted; state
/// changes go through the reconciliation and delivery services.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(min = 1, max = 50))]
    pub order_number: String,

    /// Customer contact snapshot taken at checkout
    #[validate(length(min = 1, max = 255))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: String,
    pub customer_phone: Option<String>,
    /// CPF or CNPJ of the buyer, used for fiscal document emission
    pub customer_tax_id: Option<String>,

    /// Shipping address snapshot
    pub address_street: String,
    pub address_number: Option<String>,
    pub address_city: String,
    pub address_state: String,
    pub address_postal_code: String,

    pub total_amount: Decimal,
    pub status: String,
    pub payment_status: String,
    pub payment_method: Option<String>,

    /// External payment correlation id; set exactly once by reconciliation
    /// and used as the idempotency guard
    pub payment_id: Option<String>,
    /// Provider checkout session / preference id
    pub payment_session_id: Option<String>,

    pub carrier_delivered_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub auto_confirmed: bool,
    pub refunded_at: Option<DateTime<Utc>>,

    /// Fiscal document (NF-e) emission results
    pub nfe_key: Option<String>,
    pub nfe_url: Option<String>,
    pub nfe_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

/// Order lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    PaymentFailed,
    Refunded,
}

/// Payment settlement states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Failed,
    Cancelled,
    Refunded,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::partner_sale::Entity")]
    PartnerSales,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::partner_sale::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PartnerSales.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {}
