use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Coupon;

/// Client-side cart line as submitted to the apply endpoint. Prices here
/// are display values; checkout re-prices from the course records.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ApplyCouponCartItem {
    pub course_id: Uuid,
    pub price: Decimal,
    pub current_price: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ApplyCouponRequest {
    pub code: String,
    pub cart_items: Vec<ApplyCouponCartItem>,
    pub cart_total: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RemoveCouponRequest {
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponWithCourses {
    pub coupon: Coupon,
    pub applicable_course_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponApplyData {
    pub coupon: Option<Coupon>,
    pub discount_amount: Decimal,
    pub final_total: Decimal,
}
