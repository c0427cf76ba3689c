use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Offline,
    Stripe,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Offline => "offline",
            PaymentMethod::Stripe => "stripe",
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CheckoutCartItem {
    pub course_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AppliedCoupon {
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CheckoutRequest {
    pub cart_items: Vec<CheckoutCartItem>,
    pub applied_coupon: Option<AppliedCoupon>,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutData {
    pub transaction_id: Uuid,
    pub amount: Decimal,
    pub session_id: Option<String>,
    pub session_url: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmQuery {
    pub session_id: String,
    pub transaction_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmationData {
    pub transactions: i64,
    pub enrollments: i64,
    pub already_processed: bool,
}
