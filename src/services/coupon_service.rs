use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::coupons::{ApplyCouponRequest, CouponApplyData, RemoveCouponRequest},
    entity::{
        coupon_courses::{Column as CouponCourseCol, Entity as CouponCourses},
        coupon_usages::{Column as UsageCol, Entity as CouponUsages},
        coupons::{Column as CouponCol, Entity as Coupons, Model as CouponModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Coupon, DiscountType},
    response::{ApiResponse, Meta},
    state::AppState,
};

pub const MSG_INVALID_OR_EXPIRED: &str = "Invalid or expired coupon";
pub const MSG_LIMIT_REACHED: &str = "Coupon usage limit reached";
pub const MSG_ALREADY_USED: &str = "You have already used this coupon";
pub const MSG_NOT_APPLICABLE: &str = "Coupon not applicable to any course in your cart";

/// A coupon that passed every validation gate, plus the course ids it is
/// restricted to (empty means it applies to the whole cart).
#[derive(Debug)]
pub struct ValidCoupon {
    pub coupon: CouponModel,
    pub discount_type: DiscountType,
    pub applicable_courses: Vec<Uuid>,
}

#[derive(Debug)]
pub enum CouponCheck {
    Valid(ValidCoupon),
    Rejected(&'static str),
}

/// A cart line with the price the discount math runs against.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub course_id: Uuid,
    pub unit_price: Decimal,
}

/// Run the validation gates in order, each one short-circuiting.
pub async fn validate<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    user_id: Uuid,
    course_ids: &[Uuid],
) -> AppResult<CouponCheck> {
    let now = Utc::now();
    let coupon = Coupons::find()
        .filter(CouponCol::Code.eq(code.trim().to_uppercase()))
        .filter(CouponCol::IsActive.eq(true))
        .filter(CouponCol::ValidFrom.lte(now))
        .filter(CouponCol::ValidUntil.gte(now))
        .one(conn)
        .await?;
    let coupon = match coupon {
        Some(c) => c,
        None => return Ok(CouponCheck::Rejected(MSG_INVALID_OR_EXPIRED)),
    };

    let discount_type = match DiscountType::from_str(&coupon.discount_type) {
        Some(t) => t,
        None => return Ok(CouponCheck::Rejected(MSG_INVALID_OR_EXPIRED)),
    };

    if let Some(limit) = coupon.usage_limit {
        if coupon.times_used >= limit {
            return Ok(CouponCheck::Rejected(MSG_LIMIT_REACHED));
        }
    }

    // One redemption per user, ever, regardless of how the settling
    // transaction ended up.
    let used = CouponUsages::find()
        .filter(UsageCol::CouponId.eq(coupon.id))
        .filter(UsageCol::UserId.eq(user_id))
        .count(conn)
        .await?;
    if used > 0 {
        return Ok(CouponCheck::Rejected(MSG_ALREADY_USED));
    }

    let applicable_courses: Vec<Uuid> = CouponCourses::find()
        .filter(CouponCourseCol::CouponId.eq(coupon.id))
        .all(conn)
        .await?
        .into_iter()
        .map(|row| row.course_id)
        .collect();

    if !applicable_courses.is_empty()
        && !course_ids.iter().any(|id| applicable_courses.contains(id))
    {
        return Ok(CouponCheck::Rejected(MSG_NOT_APPLICABLE));
    }

    Ok(CouponCheck::Valid(ValidCoupon {
        coupon,
        discount_type,
        applicable_courses,
    }))
}

/// Basis the discount is computed against: the subtotal of the matching
/// lines when the coupon restricts courses, otherwise the whole cart.
pub fn discount_basis(
    applicable_courses: &[Uuid],
    lines: &[PricedLine],
    cart_total: Decimal,
) -> Decimal {
    if applicable_courses.is_empty() {
        return cart_total;
    }
    lines
        .iter()
        .filter(|line| applicable_courses.contains(&line.course_id))
        .map(|line| line.unit_price)
        .sum()
}

pub fn compute_discount(
    discount_type: DiscountType,
    discount_value: Decimal,
    basis: Decimal,
) -> Decimal {
    let discount = match discount_type {
        DiscountType::Percentage => basis * discount_value / Decimal::from(100),
        DiscountType::Fixed => discount_value.min(basis),
    };
    discount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub async fn apply_coupon(
    state: &AppState,
    user: &AuthUser,
    payload: ApplyCouponRequest,
) -> AppResult<ApiResponse<CouponApplyData>> {
    if payload.code.trim().is_empty() {
        return Err(AppError::BadRequest("Coupon code is required".to_string()));
    }

    let course_ids: Vec<Uuid> = payload.cart_items.iter().map(|i| i.course_id).collect();

    let valid = match validate(&state.orm, &payload.code, user.user_id, &course_ids).await? {
        CouponCheck::Valid(valid) => valid,
        CouponCheck::Rejected(message) => {
            // A safe no-op, not an error: the cart total stands.
            return Ok(ApiResponse::failure(
                message,
                CouponApplyData {
                    coupon: None,
                    discount_amount: Decimal::ZERO,
                    final_total: payload.cart_total,
                },
            ));
        }
    };

    let lines: Vec<PricedLine> = payload
        .cart_items
        .iter()
        .map(|item| PricedLine {
            course_id: item.course_id,
            unit_price: item.current_price,
        })
        .collect();

    let basis = discount_basis(&valid.applicable_courses, &lines, payload.cart_total);
    let discount_amount =
        compute_discount(valid.discount_type, valid.coupon.discount_value, basis);
    // The subset-restricted discount still comes off the whole-cart total.
    let final_total = payload.cart_total - discount_amount;

    Ok(ApiResponse::success(
        "Coupon applied",
        CouponApplyData {
            coupon: Some(coupon_from_entity(valid.coupon)),
            discount_amount,
            final_total,
        },
        Some(Meta::empty()),
    ))
}

/// Removing a coupon is a stateless acknowledgement. No usage row exists
/// until redemption inside checkout, so there is nothing to reverse.
pub async fn remove_coupon(
    state: &AppState,
    user: &AuthUser,
    payload: RemoveCouponRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "coupon_remove",
        Some("coupons"),
        Some(serde_json::json!({ "code": payload.code.to_uppercase() })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Coupon removed",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub fn coupon_from_entity(model: CouponModel) -> Coupon {
    Coupon {
        id: model.id,
        code: model.code,
        discount_type: DiscountType::from_str(&model.discount_type)
            .unwrap_or(DiscountType::Fixed),
        discount_value: model.discount_value,
        valid_from: model.valid_from.with_timezone(&Utc),
        valid_until: model.valid_until.with_timezone(&Utc),
        usage_limit: model.usage_limit,
        times_used: model.times_used,
        is_active: model.is_active,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(course_id: Uuid, unit_price: Decimal) -> PricedLine {
        PricedLine {
            course_id,
            unit_price,
        }
    }

    #[test]
    fn fixed_discount_on_a_single_matching_course() {
        let course_a = Uuid::new_v4();
        let lines = vec![line(course_a, dec!(100))];
        let basis = discount_basis(&[course_a], &lines, dec!(100));
        let discount = compute_discount(DiscountType::Fixed, dec!(20), basis);
        assert_eq!(discount, dec!(20));
        assert_eq!(dec!(100) - discount, dec!(80));
    }

    #[test]
    fn percentage_discount_restricted_to_a_subset_uses_the_subset_basis() {
        let course_a = Uuid::new_v4();
        let course_b = Uuid::new_v4();
        let lines = vec![line(course_a, dec!(100)), line(course_b, dec!(50))];
        let cart_total = dec!(150);

        let basis = discount_basis(&[course_b], &lines, cart_total);
        assert_eq!(basis, dec!(50));

        let discount = compute_discount(DiscountType::Percentage, dec!(10), basis);
        assert_eq!(discount, dec!(5));
        // Subtracted from the whole-cart total, not the subset basis.
        assert_eq!(cart_total - discount, dec!(145));
    }

    #[test]
    fn unrestricted_coupon_uses_the_whole_cart_as_basis() {
        let lines = vec![line(Uuid::new_v4(), dec!(30)), line(Uuid::new_v4(), dec!(70))];
        assert_eq!(discount_basis(&[], &lines, dec!(100)), dec!(100));
    }

    #[test]
    fn fixed_discount_never_exceeds_its_basis() {
        let discount = compute_discount(DiscountType::Fixed, dec!(500), dec!(80));
        assert_eq!(discount, dec!(80));
    }

    #[test]
    fn percentage_discount_is_bounded_by_the_basis() {
        let discount = compute_discount(DiscountType::Percentage, dec!(100), dec!(75.50));
        assert_eq!(discount, dec!(75.50));
    }

    #[test]
    fn restricted_coupon_with_no_matching_lines_yields_zero() {
        let course_a = Uuid::new_v4();
        let lines = vec![line(Uuid::new_v4(), dec!(100))];
        let basis = discount_basis(&[course_a], &lines, dec!(100));
        assert_eq!(basis, Decimal::ZERO);
        assert_eq!(
            compute_discount(DiscountType::Percentage, dec!(50), basis),
            Decimal::ZERO
        );
        assert_eq!(
            compute_discount(DiscountType::Fixed, dec!(10), basis),
            Decimal::ZERO
        );
    }

    #[test]
    fn discounts_round_to_cents_away_from_zero() {
        // 12.5% of 99.99 = 12.49875 -> 12.50
        let discount = compute_discount(DiscountType::Percentage, dec!(12.5), dec!(99.99));
        assert_eq!(discount, dec!(12.50));
    }
}
