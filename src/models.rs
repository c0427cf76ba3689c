use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub course_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(DiscountType::Percentage),
            "fixed" => Some(DiscountType::Fixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage_limit: Option<i32>,
    pub times_used: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored transaction statuses are `pending`, `completed`, `failed` and
/// `refunded`, but an offline order is written as `pending` with
/// `completed_at` already set. That pair means "awaiting manual admin
/// confirmation", so the code names it instead of re-deriving it from the
/// raw column values at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    AwaitingPayment,
    AwaitingManualConfirmation,
    Completed,
    Failed,
    Refunded,
}

impl TransactionState {
    pub fn from_row(status: &str, completed_at: Option<DateTime<Utc>>) -> Self {
        match status {
            "completed" => TransactionState::Completed,
            "failed" => TransactionState::Failed,
            "refunded" => TransactionState::Refunded,
            _ if completed_at.is_some() => TransactionState::AwaitingManualConfirmation,
            _ => TransactionState::AwaitingPayment,
        }
    }

    /// The status value stored and exposed over the API.
    pub fn wire_status(&self) -> &'static str {
        match self {
            TransactionState::AwaitingPayment => "pending",
            TransactionState::AwaitingManualConfirmation => "pending",
            TransactionState::Completed => "completed",
            TransactionState::Failed => "failed",
            TransactionState::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub payment_gateway: Option<String>,
    pub transaction_reference: String,
    pub status: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_with_completion_timestamp_is_awaiting_manual_confirmation() {
        let state = TransactionState::from_row("pending", Some(Utc::now()));
        assert_eq!(state, TransactionState::AwaitingManualConfirmation);
        assert_eq!(state.wire_status(), "pending");
    }

    #[test]
    fn pending_without_timestamp_is_awaiting_payment() {
        let state = TransactionState::from_row("pending", None);
        assert_eq!(state, TransactionState::AwaitingPayment);
        assert_eq!(state.wire_status(), "pending");
    }

    #[test]
    fn terminal_statuses_ignore_the_timestamp() {
        assert_eq!(
            TransactionState::from_row("refunded", Some(Utc::now())),
            TransactionState::Refunded
        );
        assert_eq!(
            TransactionState::from_row("completed", None),
            TransactionState::Completed
        );
    }
}
