use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::coupons::CouponWithCourses,
    entity::{
        coupon_courses::{self, Column as CouponCourseCol, Entity as CouponCourses},
        coupon_usages::{Column as UsageCol, Entity as CouponUsages},
        coupons::{ActiveModel as CouponActive, Column as CouponCol, Entity as Coupons},
        courses::{Column as CourseCol, Entity as Courses},
        transactions::{
            self, Column as TxnCol, Entity as Transactions, Model as TransactionModel,
        },
    },
    error::{AppError, AppResult},
    gamification::{self, COURSE_REWARD_POINTS},
    middleware::auth::{AuthUser, ensure_admin},
    models::{DiscountType, Transaction, TransactionState},
    response::{ApiResponse, Meta},
    routes::admin::{
        CouponList, CreateCouponRequest, TransactionList, UpdateCouponRequest,
        UpdateTransactionStatusRequest,
    },
    routes::params::{Pagination, SortOrder, TransactionListQuery},
    services::checkout_service::upsert_paid_enrollment,
    services::coupon_service::coupon_from_entity,
    state::AppState,
};

pub async fn create_coupon(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCouponRequest,
) -> AppResult<ApiResponse<CouponWithCourses>> {
    ensure_admin(user)?;

    let code = payload.code.trim().to_uppercase();
    if code.is_empty() {
        return Err(AppError::BadRequest("Coupon code is required".into()));
    }
    validate_coupon_terms(
        payload.discount_type,
        payload.discount_value,
        payload.valid_from,
        payload.valid_until,
        payload.usage_limit,
    )?;

    let applicable = payload.applicable_course_ids.unwrap_or_default();
    if !applicable.is_empty() {
        let found = Courses::find()
            .filter(CourseCol::Id.is_in(applicable.clone()))
            .count(&state.orm)
            .await?;
        if found < applicable.len() as u64 {
            return Err(AppError::BadRequest(
                "some applicable courses do not exist".into(),
            ));
        }
    }

    let txn = state.orm.begin().await?;

    let coupon = CouponActive {
        id: Set(Uuid::new_v4()),
        code: Set(code),
        discount_type: Set(payload.discount_type.as_str().to_string()),
        discount_value: Set(payload.discount_value),
        valid_from: Set(payload.valid_from.into()),
        valid_until: Set(payload.valid_until.into()),
        usage_limit: Set(payload.usage_limit),
        times_used: Set(0),
        is_active: Set(payload.is_active.unwrap_or(true)),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    for course_id in &applicable {
        coupon_courses::ActiveModel {
            coupon_id: Set(coupon.id),
            course_id: Set(*course_id),
        }
        .insert(&txn)
        .await?;
    }

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "coupon_create",
        Some("coupons"),
        Some(serde_json::json!({ "coupon_id": coupon.id, "code": coupon.code })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Coupon created",
        CouponWithCourses {
            coupon: coupon_from_entity(coupon),
            applicable_course_ids: applicable,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_coupons(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<CouponList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = pagination.normalize();

    let finder = Coupons::find().order_by_desc(CouponCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(coupon_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Coupons",
        CouponList { items },
        Some(meta),
    ))
}

pub async fn update_coupon(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCouponRequest,
) -> AppResult<ApiResponse<CouponWithCourses>> {
    ensure_admin(user)?;

    let existing = Coupons::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    let discount_type = DiscountType::from_str(&existing.discount_type)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown discount type")))?;
    let discount_value = payload.discount_value.unwrap_or(existing.discount_value);
    let valid_from = payload
        .valid_from
        .unwrap_or_else(|| existing.valid_from.with_timezone(&Utc));
    let valid_until = payload
        .valid_until
        .unwrap_or_else(|| existing.valid_until.with_timezone(&Utc));
    let usage_limit = payload.usage_limit.or(existing.usage_limit);
    validate_coupon_terms(discount_type, discount_value, valid_from, valid_until, usage_limit)?;

    if let Some(ids) = payload.applicable_course_ids.as_ref() {
        if !ids.is_empty() {
            let found = Courses::find()
                .filter(CourseCol::Id.is_in(ids.clone()))
                .count(&state.orm)
                .await?;
            if found < ids.len() as u64 {
                return Err(AppError::BadRequest(
                    "some applicable courses do not exist".into(),
                ));
            }
        }
    }

    let txn = state.orm.begin().await?;

    let mut active: CouponActive = existing.into();
    active.discount_value = Set(discount_value);
    active.valid_from = Set(valid_from.into());
    active.valid_until = Set(valid_until.into());
    active.usage_limit = Set(usage_limit);
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now().into());
    let coupon = active.update(&txn).await?;

    // A provided set replaces the previous restriction wholesale.
    if let Some(ids) = payload.applicable_course_ids.as_ref() {
        CouponCourses::delete_many()
            .filter(CouponCourseCol::CouponId.eq(coupon.id))
            .exec(&txn)
            .await?;
        for course_id in ids {
            coupon_courses::ActiveModel {
                coupon_id: Set(coupon.id),
                course_id: Set(*course_id),
            }
            .insert(&txn)
            .await?;
        }
    }

    txn.commit().await?;

    let applicable_course_ids: Vec<Uuid> = CouponCourses::find()
        .filter(CouponCourseCol::CouponId.eq(coupon.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|row| row.course_id)
        .collect();

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "coupon_update",
        Some("coupons"),
        Some(serde_json::json!({ "coupon_id": coupon.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Coupon updated",
        CouponWithCourses {
            coupon: coupon_from_entity(coupon),
            applicable_course_ids,
        },
        Some(Meta::empty()),
    ))
}

pub async fn delete_coupon(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let existing = Coupons::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    let usages = CouponUsages::find()
        .filter(UsageCol::CouponId.eq(existing.id))
        .count(&state.orm)
        .await?;
    if usages > 0 {
        return Err(AppError::Conflict(
            "Coupon has been used and cannot be deleted".into(),
        ));
    }

    let txn = state.orm.begin().await?;
    CouponCourses::delete_many()
        .filter(CouponCourseCol::CouponId.eq(existing.id))
        .exec(&txn)
        .await?;
    Coupons::delete_by_id(existing.id).exec(&txn).await?;
    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "coupon_delete",
        Some("coupons"),
        Some(serde_json::json!({ "coupon_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn list_transactions(
    state: &AppState,
    user: &AuthUser,
    query: TransactionListQuery,
) -> AppResult<ApiResponse<TransactionList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(TxnCol::Status.eq(status.clone()));
    }

    let mut finder = Transactions::find().filter(condition);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(TxnCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(TxnCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(transaction_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Transactions",
        TransactionList { items },
        Some(meta),
    ))
}

/// Manual settlement of a single transaction. Completing one applies the
/// same enrollment upgrade and reward as one confirmation sibling; this
/// is how offline orders leave the awaiting-manual-confirmation state.
pub async fn update_transaction_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateTransactionStatusRequest,
) -> AppResult<ApiResponse<Transaction>> {
    ensure_admin(user)?;
    validate_target_status(&payload.status)?;

    let txn = state.orm.begin().await?;

    let existing = Transactions::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let existing = match existing {
        Some(t) => t,
        None => return Err(AppError::NotFound),
    };

    let current = TransactionState::from_row(
        &existing.status,
        existing.completed_at.map(|dt| dt.with_timezone(&Utc)),
    );

    let settled = matches!(
        (current, payload.status.as_str()),
        (
            TransactionState::AwaitingPayment | TransactionState::AwaitingManualConfirmation,
            "completed"
        )
    );
    let allowed = settled
        || matches!(
            (current, payload.status.as_str()),
            (
                TransactionState::AwaitingPayment
                    | TransactionState::AwaitingManualConfirmation,
                "failed"
            ) | (TransactionState::Completed, "refunded")
        );
    if !allowed {
        return Err(AppError::Conflict("Invalid status transition".into()));
    }

    let now = Utc::now();
    let user_id = existing.user_id;
    let course_id = existing.course_id;
    let amount = existing.amount;

    let mut active: transactions::ActiveModel = existing.into();
    active.status = Set(payload.status.clone());
    if settled {
        active.completed_at = Set(Some(now.into()));
    }
    active.updated_at = Set(now.into());
    let updated = active.update(&txn).await?;

    if settled {
        upsert_paid_enrollment(&txn, user_id, course_id, amount, updated.id).await?;
    }

    txn.commit().await?;

    if settled {
        if let Err(err) = gamification::award_points(
            &state.pool,
            user_id,
            COURSE_REWARD_POINTS,
            "course_purchase",
        )
        .await
        {
            tracing::warn!(error = %err, "points award failed");
        }
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "transaction_status_update",
        Some("transactions"),
        Some(serde_json::json!({ "transaction_id": updated.id, "status": updated.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Transaction updated",
        transaction_from_entity(updated),
        Some(Meta::empty()),
    ))
}

fn validate_coupon_terms(
    discount_type: DiscountType,
    discount_value: Decimal,
    valid_from: chrono::DateTime<Utc>,
    valid_until: chrono::DateTime<Utc>,
    usage_limit: Option<i32>,
) -> Result<(), AppError> {
    if valid_until <= valid_from {
        return Err(AppError::BadRequest(
            "valid_until must be after valid_from".into(),
        ));
    }
    match discount_type {
        DiscountType::Percentage => {
            if discount_value <= Decimal::ZERO || discount_value > Decimal::from(100) {
                return Err(AppError::BadRequest(
                    "percentage discount must be greater than 0 and at most 100".into(),
                ));
            }
        }
        DiscountType::Fixed => {
            if discount_value <= Decimal::ZERO {
                return Err(AppError::BadRequest(
                    "discount value must be positive".into(),
                ));
            }
        }
    }
    if let Some(limit) = usage_limit {
        if limit <= 0 {
            return Err(AppError::BadRequest(
                "usage limit must be greater than 0".into(),
            ));
        }
    }
    Ok(())
}

fn validate_target_status(status: &str) -> Result<(), AppError> {
    const VALID: [&str; 3] = ["completed", "failed", "refunded"];
    if VALID.contains(&status) {
        Ok(())
    } else {
        Err(AppError::BadRequest("Invalid transaction status".into()))
    }
}

fn transaction_from_entity(model: TransactionModel) -> Transaction {
    Transaction {
        id: model.id,
        user_id: model.user_id,
        course_id: model.course_id,
        amount: model.amount,
        currency: model.currency,
        payment_method: model.payment_method,
        payment_gateway: model.payment_gateway,
        transaction_reference: model.transaction_reference,
        status: model.status,
        completed_at: model.completed_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}
