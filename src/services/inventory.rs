//! Cart verification against the product catalog.
//!
//! Client-submitted prices and totals are never trusted: every line is
//! re-priced from the stored product row, and the submitted figures are only
//! used for tamper detection. Stock is checked here but decremented later, on
//! payment confirmation, so abandoned checkouts never hold inventory.

use crate::entities::product;
use crate::errors::ServiceError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

/// Tolerance for price and total comparisons, in currency units.
pub const PRICE_TOLERANCE: Decimal = dec!(0.01);

/// One cart line as submitted by the client.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CartItem {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Unit price the client saw; verified against the stored price
    #[schema(value_type = String, example = "50.00")]
    pub unit_price: Decimal,
    pub name: String,
}

/// A cart line after verification, carrying the authoritative product row.
#[derive(Debug, Clone)]
pub struct VerifiedLine {
    pub product: product::Model,
    pub quantity: i32,
    pub line_total: Decimal,
}

/// Re-fetches every product and applies the tamper and stock guards.
///
/// Rejections happen before any order row is written. The returned lines use
/// the stored price, never the submitted one.
#[instrument(skip_all, fields(lines = items.len()))]
pub async fn verify_cart<C>(db: &C, items: &[CartItem]) -> Result<Vec<VerifiedLine>, ServiceError>
where
    C: ConnectionTrait,
{
    if items.is_empty() {
        return Err(ServiceError::InvalidInput("Cart is empty".to_string()));
    }

    let mut verified = Vec::with_capacity(items.len());

    for item in items {
        if item.quantity <= 0 {
            return Err(ServiceError::InvalidInput(format!(
                "Invalid quantity {} for \"{}\"",
                item.quantity, item.name
            )));
        }

        let product = product::Entity::find_by_id(item.product_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;

        if !product.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "\"{}\" is no longer available",
                product.name
            )));
        }

        if (product.price - item.unit_price).abs() > PRICE_TOLERANCE {
            warn!(
                product_id = %product.id,
                stored = %product.price,
                submitted = %item.unit_price,
                "price mismatch on checkout"
            );
            return Err(ServiceError::ValidationError(format!(
                "The price of \"{}\" has changed. Please review your cart.",
                product.name
            )));
        }

        if let Some(stock) = product.stock {
            if stock < item.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for \"{}\": requested {}, available {}",
                    product.name, item.quantity, stock
                )));
            }
        }

        let line_total = product.price * Decimal::from(item.quantity);
        verified.push(VerifiedLine {
            product,
            quantity: item.quantity,
            line_total,
        });
    }

    Ok(verified)
}

/// Compares a client-submitted total against the server-side sum. Returns the
/// authoritative total. Called once before order creation and again before
/// handing totals to the payment provider.
pub fn check_cart_total(
    lines: &[VerifiedLine],
    client_total: Decimal,
) -> Result<Decimal, ServiceError> {
    let server_total: Decimal = lines.iter().map(|l| l.line_total).sum();

    if (server_total - client_total).abs() > PRICE_TOLERANCE {
        warn!(%server_total, %client_total, "cart total mismatch");
        return Err(ServiceError::ValidationError(
            "Cart total does not match current prices. Please review your cart.".to_string(),
        ));
    }

    Ok(server_total)
}

/// Atomically decrements stock with a floor at the requested quantity.
///
/// The guard is expressed in the UPDATE itself so concurrent confirmations
/// cannot oversell. Products with NULL stock are unlimited and pass through
/// unchanged. Returns whether a row was updated.
pub async fn decrement_stock<C>(
    db: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .col_expr(
            product::Column::UpdatedAt,
            Expr::value(chrono::Utc::now()),
        )
        .filter(product::Column::Id.eq(product_id))
        .filter(
            Condition::any()
                .add(product::Column::Stock.is_null())
                .add(product::Column::Stock.gte(quantity)),
        )
        .exec(db)
        .await?;

    Ok(result.rows_affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn line(price: Decimal, quantity: i32) -> VerifiedLine {
        VerifiedLine {
            product: product::Model {
                id: Uuid::new_v4(),
                partner_id: None,
                name: "Ceramic Mug".to_string(),
                price,
                stock: Some(10),
                is_active: true,
                created_at: Utc::now(),
                updated_at: None,
            },
            quantity,
            line_total: price * Decimal::from(quantity),
        }
    }

    #[test]
    fn total_check_accepts_exact_and_one_cent_drift() {
        let lines = vec![line(dec!(50.00), 2)];
        assert_eq!(check_cart_total(&lines, dec!(100.00)).unwrap(), dec!(100.00));
        assert!(check_cart_total(&lines, dec!(100.01)).is_ok());
        assert!(check_cart_total(&lines, dec!(99.99)).is_ok());
    }

    #[test]
    fn total_check_rejects_beyond_tolerance() {
        let lines = vec![line(dec!(50.00), 2)];
        let err = check_cart_total(&lines, dec!(99.00)).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn total_check_sums_multiple_lines() {
        let lines = vec![line(dec!(19.90), 3), line(dec!(5.50), 1)];
        assert_eq!(check_cart_total(&lines, dec!(65.20)).unwrap(), dec!(65.20));
    }
}
