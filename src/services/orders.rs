//! Order creation and queries.

use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::entities::order_item;
use crate::errors::ServiceError;
use crate::services::fees;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::inventory::VerifiedLine;

/// Customer contact details captured at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CustomerInfo {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
    /// CPF or CNPJ, required only for fiscal document emission
    pub tax_id: Option<String>,
}

/// Shipping address captured at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 255))]
    pub street: String,
    pub number: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub city: String,
    #[validate(length(min = 2, max = 2))]
    pub state: String,
    #[validate(length(min = 8, max = 9))]
    pub postal_code: String,
}

pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts the order header and its line items as one transaction.
    ///
    /// The header and items commit together; a failed item insert rolls the
    /// header back so no order is ever visible without its lines. Prices come
    /// from the verified lines, and each line's partner/platform split is
    /// computed and persisted here. Stock is not touched.
    #[instrument(skip_all, fields(customer = %customer.email, lines = lines.len()))]
    pub async fn create_order(
        &self,
        customer: &CustomerInfo,
        address: &ShippingAddress,
        lines: &[VerifiedLine],
        payment_method: Option<String>,
        total: Decimal,
        fee_percent: Decimal,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        customer.validate()?;
        address.validate()?;

        let txn = self.db.begin().await?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let header = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            customer_name: Set(customer.name.clone()),
            customer_email: Set(customer.email.trim().to_lowercase()),
            customer_phone: Set(customer.phone.clone()),
            customer_tax_id: Set(customer.tax_id.clone()),
            address_street: Set(address.street.clone()),
            address_number: Set(address.number.clone()),
            address_city: Set(address.city.clone()),
            address_state: Set(address.state.trim().to_uppercase()),
            address_postal_code: Set(address.postal_code.clone()),
            total_amount: Set(total),
            status: Set(OrderStatus::Pending.to_string()),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            payment_method: Set(payment_method),
            payment_id: Set(None),
            payment_session_id: Set(None),
            carrier_delivered_at: Set(None),
            delivered_at: Set(None),
            auto_confirmed: Set(false),
            refunded_at: Set(None),
            nfe_key: Set(None),
            nfe_url: Set(None),
            nfe_error: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
            version: Set(1),
        };
        let header = header.insert(&txn).await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let split = fees::split_amount(line.line_total, fee_percent);
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product.id),
                partner_id: Set(line.product.partner_id),
                name: Set(line.product.name.clone()),
                quantity: Set(line.quantity),
                price_at_purchase: Set(line.product.price),
                partner_amount: Set(split.partner_amount),
                platform_fee: Set(split.platform_fee),
                created_at: Set(now),
            };
            items.push(item.insert(&txn).await?);
        }

        txn.commit().await?;
        info!(order_id = %header.id, order_number = %header.order_number, "order created");

        Ok((header, items))
    }

    pub async fn get_order(
        &self,
        order_id: Uuid,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        Ok((order, items))
    }

    /// Paginated order listing, newest first, optionally filtered by status.
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
        status: Option<&str>,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let per_page = per_page.clamp(1, 100);

        let mut query = order::Entity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            let status = OrderStatus::from_str(status).map_err(|_| {
                ServiceError::InvalidInput(format!("Unknown order status \"{}\"", status))
            })?;
            query = query.filter(order::Column::Status.eq(status.to_string()));
        }

        let paginator = query.paginate(self.db.as_ref(), per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// Records the payment provider's session id on the order.
    pub async fn record_payment_session(
        &self,
        order_id: Uuid,
        session_id: &str,
    ) -> Result<(), ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(
                order::Column::PaymentSessionId,
                Expr::value(session_id.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order_id
            )));
        }
        Ok(())
    }
}

fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "FR-{}-{}",
        Utc::now().format("%Y%m%d"),
        &suffix[..8].to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_are_prefixed_and_unique() {
        let a = generate_order_number();
        let b = generate_order_number();
        assert!(a.starts_with("FR-"));
        assert_ne!(a, b);
    }

    #[test]
    fn customer_info_requires_a_valid_email() {
        let customer = CustomerInfo {
            name: "Ana Souza".to_string(),
            email: "not-an-email".to_string(),
            phone: None,
            tax_id: None,
        };
        assert!(customer.validate().is_err());
    }

    #[test]
    fn address_requires_a_two_letter_state() {
        let address = ShippingAddress {
            street: "Rua das Flores".to_string(),
            number: Some("100".to_string()),
            city: "São Paulo".to_string(),
            state: "São Paulo".to_string(),
            postal_code: "01310-100".to_string(),
        };
        assert!(address.validate().is_err());
    }
}
