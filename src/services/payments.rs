//! Payment provider integration: builds a checkout preference and returns the
//! redirect URL the customer is sent to.
//!
//! The preference total is cross-checked against the order total immediately
//! before submission. A mismatch at this point means state was corrupted
//! between verification and payment, so the request is aborted instead of
//! sending an inconsistent amount to the provider.

use crate::config::AppConfig;
use crate::entities::{order, order_item};
use crate::errors::ServiceError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{error, info, instrument};

/// Customer-selected payment method, mapped to provider payment-type filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, utoipa::ToSchema)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Pix,
    Boleto,
    Wallet,
}

impl PaymentMethod {
    /// Provider payment-type codes excluded for this method.
    fn excluded_payment_types(&self) -> Vec<&'static str> {
        match self {
            // cards only: no boleto, no ATM payments
            PaymentMethod::Card => vec!["ticket", "atm", "bank_transfer"],
            // instant transfer only
            PaymentMethod::Pix => vec!["credit_card", "debit_card", "ticket", "atm"],
            // boleto only
            PaymentMethod::Boleto => vec!["credit_card", "debit_card", "bank_transfer", "atm"],
            PaymentMethod::Wallet => vec![],
        }
    }

    fn purpose(&self) -> Option<&'static str> {
        match self {
            PaymentMethod::Wallet => Some("wallet_purchase"),
            _ => None,
        }
    }
}

/// Result of creating a provider checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub session_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Serialize)]
struct PreferenceItem {
    id: String,
    title: String,
    quantity: i32,
    unit_price: Decimal,
}

#[derive(Debug, Serialize)]
struct PreferencePayer {
    name: String,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExcludedType {
    id: String,
}

#[derive(Debug, Serialize)]
struct PreferencePaymentMethods {
    excluded_payment_types: Vec<ExcludedType>,
}

#[derive(Debug, Serialize)]
struct PreferenceBackUrls {
    success: String,
    failure: String,
    pending: String,
}

#[derive(Debug, Serialize)]
struct PreferenceRequest {
    items: Vec<PreferenceItem>,
    payer: PreferencePayer,
    payment_methods: PreferencePaymentMethods,
    back_urls: PreferenceBackUrls,
    notification_url: String,
    /// Order id; echoed back in webhook events for correlation
    external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    id: String,
    init_point: String,
    #[serde(default)]
    sandbox_init_point: Option<String>,
}

pub struct PaymentClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    notification_url: String,
    success_url: String,
    failure_url: String,
    pending_url: String,
    use_sandbox_redirect: bool,
}

impl PaymentClient {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.payment_provider_url.trim_end_matches('/').to_string(),
            access_token: config.payment_access_token.clone(),
            notification_url: config.webhook_notification_url(),
            success_url: config.checkout_return_url("success"),
            failure_url: config.checkout_return_url("failure"),
            pending_url: config.checkout_return_url("pending"),
            use_sandbox_redirect: !config.is_production(),
        }
    }

    /// Creates a provider checkout session for an order and returns the URL
    /// the customer should be redirected to.
    #[instrument(skip_all, fields(order_id = %order.id, method = %method))]
    pub async fn create_checkout_session(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
        method: PaymentMethod,
    ) -> Result<PaymentSession, ServiceError> {
        let token = self.access_token.as_deref().ok_or_else(|| {
            ServiceError::PaymentFailed("Payment provider is not configured".to_string())
        })?;

        let session_total: Decimal = items
            .iter()
            .map(|i| i.price_at_purchase * Decimal::from(i.quantity))
            .sum();
        if (session_total - order.total_amount).abs() > dec!(0.01) {
            error!(
                %session_total,
                order_total = %order.total_amount,
                "session total diverged from order total; aborting payment request"
            );
            return Err(ServiceError::InternalError(
                "Order total mismatch while preparing payment".to_string(),
            ));
        }

        let request = PreferenceRequest {
            items: items
                .iter()
                .map(|i| PreferenceItem {
                    id: i.product_id.to_string(),
                    title: i.name.clone(),
                    quantity: i.quantity,
                    unit_price: i.price_at_purchase,
                })
                .collect(),
            payer: PreferencePayer {
                name: order.customer_name.clone(),
                email: order.customer_email.clone(),
                phone: order.customer_phone.clone(),
            },
            payment_methods: PreferencePaymentMethods {
                excluded_payment_types: method
                    .excluded_payment_types()
                    .into_iter()
                    .map(|id| ExcludedType { id: id.to_string() })
                    .collect(),
            },
            back_urls: PreferenceBackUrls {
                success: self.success_url.clone(),
                failure: self.failure_url.clone(),
                pending: self.pending_url.clone(),
            },
            notification_url: self.notification_url.clone(),
            external_reference: order.id.to_string(),
            purpose: method.purpose().map(str::to_string),
        };

        let url = format!("{}/checkout/preferences", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("Payment provider unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "payment provider rejected preference");
            return Err(ServiceError::PaymentFailed(
                "Payment could not be started. Please try again.".to_string(),
            ));
        }

        let preference: PreferenceResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Invalid payment provider response: {}", e))
        })?;

        let redirect_url = if self.use_sandbox_redirect {
            preference
                .sandbox_init_point
                .unwrap_or(preference.init_point)
        } else {
            preference.init_point
        };

        info!(session_id = %preference.id, "payment session created");
        Ok(PaymentSession {
            session_id: preference.id,
            redirect_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn method_names_parse_from_snake_case() {
        assert_eq!(PaymentMethod::from_str("pix").unwrap(), PaymentMethod::Pix);
        assert_eq!(
            PaymentMethod::from_str("boleto").unwrap(),
            PaymentMethod::Boleto
        );
        assert!(PaymentMethod::from_str("cheque").is_err());
    }

    #[test]
    fn card_excludes_offline_payment_types() {
        let excluded = PaymentMethod::Card.excluded_payment_types();
        assert!(excluded.contains(&"ticket"));
        assert!(excluded.contains(&"atm"));
        assert!(!excluded.contains(&"credit_card"));
    }

    #[test]
    fn pix_excludes_everything_but_bank_transfer() {
        let excluded = PaymentMethod::Pix.excluded_payment_types();
        assert!(excluded.contains(&"credit_card"));
        assert!(excluded.contains(&"ticket"));
        assert!(!excluded.contains(&"bank_transfer"));
    }

    #[test]
    fn wallet_sets_the_purchase_purpose() {
        assert_eq!(PaymentMethod::Wallet.purpose(), Some("wallet_purchase"));
        assert_eq!(PaymentMethod::Card.purpose(), None);
        assert!(PaymentMethod::Wallet.excluded_payment_types().is_empty());
    }
}
