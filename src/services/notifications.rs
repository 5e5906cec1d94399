//! Transactional email notifications through an external email API.
//!
//! Every send here is best-effort: callers run these off the critical path
//! and only log failures.

use crate::config::AppConfig;
use crate::entities::order;
use crate::errors::ServiceError;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct EmailMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: String,
    body: String,
}

pub struct NotificationService {
    db: Arc<DatabaseConnection>,
    http: reqwest::Client,
    api_url: Option<String>,
    api_key: Option<String>,
    from: String,
}

impl NotificationService {
    pub fn from_config(db: Arc<DatabaseConnection>, config: &AppConfig) -> Self {
        Self {
            db,
            http: reqwest::Client::new(),
            api_url: config.email_api_url.clone(),
            api_key: config.email_api_key.clone(),
            from: config.email_from.clone(),
        }
    }

    /// Emails the customer that their payment was approved.
    #[instrument(skip(self))]
    pub async fn notify_payment_approved(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        self.send(
            &order.customer_email,
            format!("Pagamento confirmado - pedido {}", order.order_number),
            format!(
                "Olá {}, recebemos o pagamento do pedido {} no valor de R$ {}. \
                 Seu pedido está sendo preparado.",
                order.customer_name, order.order_number, order.total_amount
            ),
        )
        .await
    }

    /// Notifies operations that a partner sale was recorded, for payout
    /// bookkeeping.
    #[instrument(skip(self))]
    pub async fn notify_partner_sale(
        &self,
        order_id: Uuid,
        partner_id: Uuid,
        amount: Decimal,
    ) -> Result<(), ServiceError> {
        let to = self.from.clone();
        self.send(
            &to,
            format!("Nova venda de parceiro {}", partner_id),
            format!(
                "Pedido {}: R$ {} devidos ao parceiro {} (pendente de repasse).",
                order_id, amount, partner_id
            ),
        )
        .await
    }

    /// Emails the fiscal document link to the customer after emission.
    #[instrument(skip(self))]
    pub async fn notify_fiscal_document(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let link = order
            .nfe_url
            .as_deref()
            .unwrap_or("(documento disponível em breve)");
        self.send(
            &order.customer_email,
            format!("Nota fiscal do pedido {}", order.order_number),
            format!(
                "Olá {}, a nota fiscal do seu pedido {} foi emitida: {}",
                order.customer_name, order.order_number, link
            ),
        )
        .await
    }

    async fn send(
        &self,
        to: &str,
        subject: String,
        body: String,
    ) -> Result<(), ServiceError> {
        let (Some(api_url), Some(api_key)) = (&self.api_url, &self.api_key) else {
            debug!(%to, %subject, "email provider not configured; skipping send");
            return Ok(());
        };

        let message = EmailMessage {
            from: &self.from,
            to,
            subject,
            body,
        };

        let response = self
            .http
            .post(api_url)
            .bearer_auth(api_key)
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("Email provider unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "Email provider returned {}",
                response.status()
            )));
        }

        info!(%to, "notification email sent");
        Ok(())
    }
}
