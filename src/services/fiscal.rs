//! Fiscal document (NF-e) emission, a best-effort side effect of payment.
//!
//! Emission never blocks or reverses payment settlement. Provider failures
//! and invalid tax ids are persisted on the order as `nfe_error` for manual
//! follow-up; success persists the document's access key and PDF URL.

use crate::config::AppConfig;
use crate::entities::{order, order_item};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Kind of Brazilian tax id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxIdKind {
    /// Individual taxpayer id, 11 digits
    Cpf,
    /// Business taxpayer id, 14 digits
    Cnpj,
}

/// Checksum-validates a CPF or CNPJ, ignoring punctuation. Returns the kind
/// on success.
pub fn validate_tax_id(tax_id: &str) -> Option<TaxIdKind> {
    let digits: Vec<u32> = tax_id.chars().filter_map(|c| c.to_digit(10)).collect();
    match digits.len() {
        11 if valid_cpf(&digits) => Some(TaxIdKind::Cpf),
        14 if valid_cnpj(&digits) => Some(TaxIdKind::Cnpj),
        _ => None,
    }
}

fn mod11_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        0 | 1 => 0,
        rem => 11 - rem,
    }
}

fn valid_cpf(digits: &[u32]) -> bool {
    // sequences of one repeated digit pass the checksum but are not valid ids
    if digits.windows(2).all(|w| w[0] == w[1]) {
        return false;
    }

    let first = mod11_digit(&digits[..9], &[10, 9, 8, 7, 6, 5, 4, 3, 2]);
    let second = mod11_digit(&digits[..10], &[11, 10, 9, 8, 7, 6, 5, 4, 3, 2]);
    digits[9] == first && digits[10] == second
}

fn valid_cnpj(digits: &[u32]) -> bool {
    if digits.windows(2).all(|w| w[0] == w[1]) {
        return false;
    }

    let first = mod11_digit(&digits[..12], &[5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2]);
    let second = mod11_digit(&digits[..13], &[6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2]);
    digits[12] == first && digits[13] == second
}

#[derive(Debug, Serialize)]
struct EmissionBuyer {
    name: String,
    tax_id: String,
    email: String,
}

#[derive(Debug, Serialize)]
struct EmissionAddress {
    street: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    number: Option<String>,
    city: String,
    state: String,
    postal_code: String,
}

#[derive(Debug, Serialize)]
struct EmissionItem {
    description: String,
    quantity: i32,
    unit_price: Decimal,
}

#[derive(Debug, Serialize)]
struct EmissionRequest {
    reference: String,
    buyer: EmissionBuyer,
    address: EmissionAddress,
    items: Vec<EmissionItem>,
    total: Decimal,
}

#[derive(Debug, Deserialize)]
struct EmissionResponse {
    access_key: String,
    pdf_url: String,
}

pub struct FiscalService {
    db: Arc<DatabaseConnection>,
    http: reqwest::Client,
    provider_url: Option<String>,
    api_key: Option<String>,
    events: Option<EventSender>,
}

impl FiscalService {
    pub fn from_config(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            http: reqwest::Client::new(),
            provider_url: config
                .fiscal_provider_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            api_key: config.fiscal_api_key.clone(),
            events,
        }
    }

    /// Emits the fiscal document for a paid order. Failures are recorded on
    /// the order and reported back; the caller treats them as non-fatal.
    #[instrument(skip(self))]
    pub async fn emit_for_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let (Some(provider_url), Some(api_key)) = (&self.provider_url, &self.api_key) else {
            debug!(%order_id, "fiscal provider not configured; skipping emission");
            return Ok(());
        };

        let order = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.nfe_key.is_some() {
            debug!(%order_id, "fiscal document already emitted");
            return Ok(());
        }

        let tax_id = match order.customer_tax_id.as_deref() {
            Some(tax_id) if validate_tax_id(tax_id).is_some() => tax_id.to_string(),
            Some(_) => {
                return self
                    .record_error(order_id, "Invalid customer tax id")
                    .await;
            }
            None => {
                return self
                    .record_error(order_id, "No customer tax id on order")
                    .await;
            }
        };

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(self.db.as_ref())
            .await?;

        let request = EmissionRequest {
            reference: order.order_number.clone(),
            buyer: EmissionBuyer {
                name: order.customer_name.clone(),
                tax_id,
                email: order.customer_email.clone(),
            },
            address: EmissionAddress {
                street: order.address_street.clone(),
                number: order.address_number.clone(),
                city: order.address_city.clone(),
                state: order.address_state.clone(),
                postal_code: order.address_postal_code.clone(),
            },
            items: items
                .iter()
                .map(|i| EmissionItem {
                    description: i.name.clone(),
                    quantity: i.quantity,
                    unit_price: i.price_at_purchase,
                })
                .collect(),
            total: order.total_amount,
        };

        let url = format!("{}/v2/nfe", provider_url);
        let response = match self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                return self
                    .record_error(order_id, &format!("Provider unreachable: {}", e))
                    .await;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return self
                .record_error(order_id, &format!("Provider returned {}: {}", status, body))
                .await;
        }

        let emitted: EmissionResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                return self
                    .record_error(order_id, &format!("Invalid provider response: {}", e))
                    .await;
            }
        };

        order::Entity::update_many()
            .col_expr(order::Column::NfeKey, Expr::value(emitted.access_key.clone()))
            .col_expr(order::Column::NfeUrl, Expr::value(emitted.pdf_url))
            .col_expr(order::Column::NfeError, Expr::value(Option::<String>::None))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(self.db.as_ref())
            .await?;

        if let Some(events) = &self.events {
            if let Err(e) = events
                .send(Event::FiscalDocumentEmitted {
                    order_id,
                    nfe_key: emitted.access_key.clone(),
                })
                .await
            {
                warn!(error = %e, "event dispatch failed");
            }
        }

        info!(%order_id, nfe_key = %emitted.access_key, "fiscal document emitted");
        Ok(())
    }

    async fn record_error(&self, order_id: Uuid, message: &str) -> Result<(), ServiceError> {
        warn!(%order_id, message, "fiscal emission failed; recorded for follow-up");

        order::Entity::update_many()
            .col_expr(order::Column::NfeError, Expr::value(message.to_string()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(self.db.as_ref())
            .await?;

        Ok(())
    }
}
