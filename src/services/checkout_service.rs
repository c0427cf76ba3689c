use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::checkout::{CheckoutData, CheckoutRequest, ConfirmQuery, ConfirmationData, PaymentMethod},
    entity::{
        cart_items::{Column as CartCol, Entity as CartItems},
        coupon_usages,
        coupons::Column as CouponCol,
        Coupons,
        courses::{Column as CourseCol, Entity as Courses, Model as CourseModel},
        enrollments::{self, Column as EnrollCol, Entity as Enrollments},
        transactions::{self, Column as TxnCol, Entity as Transactions},
        users::Entity as Users,
    },
    error::{AppError, AppResult},
    gamification::{self, COURSE_REWARD_POINTS},
    gateway::{CreateSessionRequest, SessionLineItem},
    middleware::auth::AuthUser,
    response::{ApiResponse, Meta},
    services::coupon_service::{self, CouponCheck, PricedLine, ValidCoupon},
    state::AppState,
};

/// Sibling transactions of one checkout are correlated by creation time,
/// not a shared order id; this window bounds the heuristic.
pub const SIBLING_WINDOW_MINUTES: i64 = 5;

pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<CheckoutData>> {
    if payload.cart_items.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let mut course_ids: Vec<Uuid> = payload.cart_items.iter().map(|i| i.course_id).collect();
    course_ids.sort();
    course_ids.dedup();

    // Authoritative course records; client prices are never trusted.
    let courses = Courses::find()
        .filter(CourseCol::Id.is_in(course_ids.clone()))
        .filter(CourseCol::Status.eq("published"))
        .all(&state.orm)
        .await?;
    if courses.len() < course_ids.len() {
        return Err(AppError::Conflict(
            "Some courses are no longer available".into(),
        ));
    }

    let owned = Enrollments::find()
        .filter(EnrollCol::UserId.eq(user.user_id))
        .filter(EnrollCol::CourseId.is_in(course_ids.clone()))
        .count(&state.orm)
        .await?;
    if owned > 0 {
        return Err(AppError::Conflict(
            "Already enrolled in some of these courses".into(),
        ));
    }

    let lines: Vec<PricedLine> = courses
        .iter()
        .map(|c| PricedLine {
            course_id: c.id,
            unit_price: c.discount_price.unwrap_or(c.price),
        })
        .collect();
    let subtotal: Decimal = lines.iter().map(|l| l.unit_price).sum();

    // Strict at apply-time, lenient here: a coupon that no longer passes
    // validation is dropped and checkout proceeds at full price.
    let mut coupon: Option<ValidCoupon> = None;
    let mut discount = Decimal::ZERO;
    if let Some(applied) = payload.applied_coupon.as_ref() {
        match coupon_service::validate(&state.orm, &applied.code, user.user_id, &course_ids)
            .await?
        {
            CouponCheck::Valid(valid) => {
                let basis =
                    coupon_service::discount_basis(&valid.applicable_courses, &lines, subtotal);
                discount = coupon_service::compute_discount(
                    valid.discount_type,
                    valid.coupon.discount_value,
                    basis,
                );
                coupon = Some(valid);
            }
            CouponCheck::Rejected(message) => {
                tracing::debug!(code = %applied.code, message, "coupon dropped at checkout");
            }
        }
    }

    let total = subtotal - discount;

    match payload.payment_method {
        PaymentMethod::Offline => {
            place_offline_order(state, user, &courses, coupon, &course_ids, total).await
        }
        PaymentMethod::Stripe => {
            open_payment_session(state, user, &courses, coupon, discount, total).await
        }
    }
}

/// Offline order: the whole write set commits or none of it does. The
/// transactions are stored `pending` with completed_at already set, the
/// awaiting-manual-confirmation state an admin later settles.
async fn place_offline_order(
    state: &AppState,
    user: &AuthUser,
    courses: &[CourseModel],
    coupon: Option<ValidCoupon>,
    course_ids: &[Uuid],
    total: Decimal,
) -> AppResult<ApiResponse<CheckoutData>> {
    let now = Utc::now();
    let txn = state.orm.begin().await?;

    let mut created: Vec<transactions::Model> = Vec::new();
    for course in courses {
        let transaction = transactions::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.user_id),
            course_id: Set(course.id),
            amount: Set(course.discount_price.unwrap_or(course.price)),
            currency: Set(state.currency.clone()),
            payment_method: Set(PaymentMethod::Offline.as_str().to_string()),
            payment_gateway: Set(None),
            transaction_reference: Set(build_transaction_reference()),
            status: Set("pending".to_string()),
            completed_at: Set(Some(now.into())),
            created_at: NotSet,
            updated_at: NotSet,
        }
        .insert(&txn)
        .await?;

        enrollments::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.user_id),
            course_id: Set(course.id),
            is_paid: Set(false),
            paid_amount: Set(None),
            transaction_id: Set(Some(transaction.id)),
            enrolled_at: NotSet,
            updated_at: NotSet,
        }
        .insert(&txn)
        .await?;

        created.push(transaction);
    }

    let first = created
        .first()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("checkout created no transactions")))?;

    if let Some(valid) = coupon.as_ref() {
        // Atomic increment; the usage row is keyed to the first sibling.
        Coupons::update_many()
            .col_expr(
                CouponCol::TimesUsed,
                Expr::col(CouponCol::TimesUsed).add(1),
            )
            .filter(CouponCol::Id.eq(valid.coupon.id))
            .exec(&txn)
            .await?;

        coupon_usages::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(valid.coupon.id),
            user_id: Set(user.user_id),
            transaction_id: Set(first.id),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::CourseId.is_in(course_ids.to_vec()))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "offline_checkout",
        Some("transactions"),
        Some(serde_json::json!({
            "transaction_id": first.id,
            "courses": course_ids.len(),
            "coupon": coupon.as_ref().map(|c| c.coupon.code.clone()),
            "total": total,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order placed, awaiting confirmation",
        CheckoutData {
            transaction_id: first.id,
            amount: total,
            session_id: None,
            session_url: None,
        },
        Some(Meta::empty()),
    ))
}

/// Online checkout: pending transactions are committed first, then the
/// session is opened. A gateway failure surfaces after the commit, so the
/// rows legitimately stay pending awaiting a retry.
async fn open_payment_session(
    state: &AppState,
    user: &AuthUser,
    courses: &[CourseModel],
    coupon: Option<ValidCoupon>,
    discount: Decimal,
    total: Decimal,
) -> AppResult<ApiResponse<CheckoutData>> {
    let payer = Users::find_by_id(user.user_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let txn = state.orm.begin().await?;
    let mut created: Vec<transactions::Model> = Vec::new();
    for course in courses {
        let transaction = transactions::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.user_id),
            course_id: Set(course.id),
            amount: Set(course.discount_price.unwrap_or(course.price)),
            currency: Set(state.currency.clone()),
            payment_method: Set(PaymentMethod::Stripe.as_str().to_string()),
            payment_gateway: Set(Some("stripe".to_string())),
            transaction_reference: Set(build_transaction_reference()),
            status: Set("pending".to_string()),
            completed_at: Set(None),
            created_at: NotSet,
            updated_at: NotSet,
        }
        .insert(&txn)
        .await?;
        created.push(transaction);
    }
    txn.commit().await?;

    let first = created
        .first()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("checkout created no transactions")))?;

    // With a coupon the gateway gets one aggregated line annotated with
    // the code, since per-course unit prices no longer add up to the total.
    let line_items = match coupon.as_ref() {
        Some(valid) => vec![SessionLineItem {
            name: format!(
                "Course order (coupon {}: -{})",
                valid.coupon.code, discount
            ),
            unit_amount: total,
            quantity: 1,
        }],
        None => courses
            .iter()
            .map(|c| SessionLineItem {
                name: c.title.clone(),
                unit_amount: c.discount_price.unwrap_or(c.price),
                quantity: 1,
            })
            .collect(),
    };

    let session = state
        .gateway
        .create_session(CreateSessionRequest {
            correlation_id: first.id,
            payer_email: payer.email,
            currency: state.currency.clone(),
            line_items,
            total_amount: total,
        })
        .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout_session_created",
        Some("transactions"),
        Some(serde_json::json!({
            "transaction_id": first.id,
            "session_id": session.id,
            "total": total,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Payment session created",
        CheckoutData {
            transaction_id: first.id,
            amount: total,
            session_id: Some(session.id),
            session_url: Some(session.url),
        },
        Some(Meta::empty()),
    ))
}

pub async fn confirm_payment(
    state: &AppState,
    user: &AuthUser,
    query: ConfirmQuery,
) -> AppResult<ApiResponse<ConfirmationData>> {
    let session = state.gateway.verify_session(&query.session_id).await?;
    if !session.paid {
        return Err(AppError::BadRequest("Payment not completed".into()));
    }

    let correlation = Transactions::find_by_id(query.transaction_id)
        .one(&state.orm)
        .await?
        .filter(|t| t.user_id == user.user_id)
        .ok_or(AppError::NotFound)?;

    if correlation.status == "completed" {
        return Ok(already_processed());
    }

    let txn = state.orm.begin().await?;

    // Re-read under lock: a concurrent confirmation either already won
    // (no-op below) or queues behind this one.
    let correlation = Transactions::find_by_id(query.transaction_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;
    if correlation.status == "completed" {
        txn.commit().await?;
        return Ok(already_processed());
    }

    let window = Duration::minutes(SIBLING_WINDOW_MINUTES);
    let siblings = Transactions::find()
        .filter(TxnCol::UserId.eq(correlation.user_id))
        .filter(TxnCol::Status.eq("pending"))
        .filter(TxnCol::CreatedAt.between(
            correlation.created_at - window,
            correlation.created_at + window,
        ))
        .lock(LockType::Update)
        .all(&txn)
        .await?;

    let now = Utc::now();
    let mut transactions_settled: i64 = 0;
    let mut enrollments_affected: i64 = 0;
    let mut course_ids: Vec<Uuid> = Vec::new();

    for sibling in siblings {
        let sibling_id = sibling.id;
        let sibling_course = sibling.course_id;
        let amount = sibling.amount;
        course_ids.push(sibling_course);

        let mut active: transactions::ActiveModel = sibling.into();
        active.status = Set("completed".to_string());
        active.completed_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        active.update(&txn).await?;
        transactions_settled += 1;

        upsert_paid_enrollment(
            &txn,
            correlation.user_id,
            sibling_course,
            amount,
            sibling_id,
        )
        .await?;
        enrollments_affected += 1;
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(correlation.user_id))
        .filter(CartCol::CourseId.is_in(course_ids))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    // Best-effort collaborators only after the settlement is durable.
    if let Err(err) = gamification::award_points(
        &state.pool,
        correlation.user_id,
        COURSE_REWARD_POINTS * transactions_settled,
        "course_purchase",
    )
    .await
    {
        tracing::warn!(error = %err, "points award failed");
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(correlation.user_id),
        "payment_confirmed",
        Some("transactions"),
        Some(serde_json::json!({
            "transaction_id": correlation.id,
            "session_id": query.session_id,
            "transactions": transactions_settled,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Payment confirmed",
        ConfirmationData {
            transactions: transactions_settled,
            enrollments: enrollments_affected,
            already_processed: false,
        },
        Some(Meta::empty()),
    ))
}

fn already_processed() -> ApiResponse<ConfirmationData> {
    ApiResponse::success(
        "Payment already processed",
        ConfirmationData {
            transactions: 0,
            enrollments: 0,
            already_processed: true,
        },
        Some(Meta::empty()),
    )
}

/// Create the enrollment, or upgrade one left unpaid by an earlier
/// offline placement or free enroll.
pub(crate) async fn upsert_paid_enrollment<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    course_id: Uuid,
    amount: Decimal,
    transaction_id: Uuid,
) -> AppResult<()> {
    let existing = Enrollments::find()
        .filter(EnrollCol::UserId.eq(user_id))
        .filter(EnrollCol::CourseId.eq(course_id))
        .one(conn)
        .await?;

    match existing {
        Some(enrollment) => {
            let mut active: enrollments::ActiveModel = enrollment.into();
            active.is_paid = Set(true);
            active.paid_amount = Set(Some(amount));
            active.transaction_id = Set(Some(transaction_id));
            active.updated_at = Set(Utc::now().into());
            active.update(conn).await?;
        }
        None => {
            enrollments::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                course_id: Set(course_id),
                is_paid: Set(true),
                paid_amount: Set(Some(amount)),
                transaction_id: Set(Some(transaction_id)),
                enrolled_at: NotSet,
                updated_at: NotSet,
            }
            .insert(conn)
            .await?;
        }
    }

    Ok(())
}

fn build_transaction_reference() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = Uuid::new_v4().to_string();
    let short = &suffix[..8];
    format!("TXN-{}-{}", date, short)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_references_carry_date_and_random_suffix() {
        let reference = build_transaction_reference();
        assert!(reference.starts_with("TXN-"));
        let parts: Vec<&str> = reference.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn references_are_unique_enough_for_the_db_constraint() {
        let a = build_transaction_reference();
        let b = build_transaction_reference();
        assert_ne!(a, b);
    }
}
