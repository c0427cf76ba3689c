use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(String),

    #[error("gateway rejected the call: {0}")]
    Api(String),

    #[error("unparseable gateway response: {0}")]
    Parse(String),

    #[error("amount {0} cannot be represented in minor units")]
    Amount(Decimal),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Gateway(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SessionLineItem {
    pub name: String,
    pub unit_amount: Decimal,
    pub quantity: u32,
}

#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub correlation_id: Uuid,
    pub payer_email: String,
    pub currency: String,
    pub line_items: Vec<SessionLineItem>,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub id: String,
    pub paid: bool,
}

/// External payment collaborator. The checkout service only depends on
/// this trait, so tests can settle payments without touching the network.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, GatewayError>;

    async fn verify_session(&self, session_id: &str) -> Result<SessionStatus, GatewayError>;
}

/// Convert a decimal amount to gateway minor units (cents), rounding to
/// the nearest unit. Truncation would drift from the displayed total.
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    (amount * Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(GatewayError::Amount(amount))
}

/// Stripe Checkout Sessions client.
#[derive(Clone)]
pub struct StripeGateway {
    secret_key: String,
    success_url: String,
    cancel_url: String,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(secret_key: String, success_url: String, cancel_url: String) -> Self {
        Self {
            secret_key,
            success_url,
            cancel_url,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeSessionStatus {
    id: String,
    payment_status: String,
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let mut params: HashMap<String, String> = HashMap::new();
        params.insert("mode".to_string(), "payment".to_string());
        params.insert(
            "client_reference_id".to_string(),
            request.correlation_id.to_string(),
        );
        params.insert("customer_email".to_string(), request.payer_email.clone());
        // {CHECKOUT_SESSION_ID} is substituted by Stripe on redirect.
        params.insert(
            "success_url".to_string(),
            format!(
                "{}?session_id={{CHECKOUT_SESSION_ID}}&transaction_id={}",
                self.success_url, request.correlation_id
            ),
        );
        params.insert("cancel_url".to_string(), self.cancel_url.clone());

        for (i, item) in request.line_items.iter().enumerate() {
            params.insert(
                format!("line_items[{i}][quantity]"),
                item.quantity.to_string(),
            );
            params.insert(
                format!("line_items[{i}][price_data][currency]"),
                request.currency.clone(),
            );
            params.insert(
                format!("line_items[{i}][price_data][unit_amount]"),
                to_minor_units(item.unit_amount)?.to_string(),
            );
            params.insert(
                format!("line_items[{i}][price_data][product_data][name]"),
                item.name.clone(),
            );
        }

        let response = self
            .client
            .post("https://api.stripe.com/v1/checkout/sessions")
            .basic_auth(&self.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(error = %error_text, "checkout session creation failed");
            return Err(GatewayError::Api(error_text));
        }

        let session: StripeSession = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        let url = session
            .url
            .ok_or_else(|| GatewayError::Parse("session has no redirect url".to_string()))?;

        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    async fn verify_session(&self, session_id: &str) -> Result<SessionStatus, GatewayError> {
        let url = format!("https://api.stripe.com/v1/checkout/sessions/{session_id}");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(error_text));
        }

        let status: StripeSessionStatus = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        Ok(SessionStatus {
            id: status.id,
            paid: status.payment_status == "paid",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_are_exact_for_whole_cents() {
        assert_eq!(to_minor_units(dec!(10.00)).unwrap(), 1000);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
        assert_eq!(to_minor_units(dec!(145)).unwrap(), 14500);
    }

    #[test]
    fn minor_units_round_to_nearest_not_truncate() {
        assert_eq!(to_minor_units(dec!(10.005)).unwrap(), 1001);
        assert_eq!(to_minor_units(dec!(19.994)).unwrap(), 1999);
        assert_eq!(to_minor_units(dec!(0.125)).unwrap(), 13);
    }
}
