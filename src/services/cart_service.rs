use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::cart::{AddToCartRequest, CartItemDto, CartList},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, Course},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
};

#[derive(FromRow)]
struct CartWithCourseRow {
    cart_id: Uuid,
    course_id: Uuid,
    title: String,
    description: Option<String>,
    price: Decimal,
    discount_price: Option<Decimal>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

pub async fn list_cart(
    pool: &DbPool,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<CartList>> {
    let (page, limit, offset) = pagination.normalize();
    let rows = sqlx::query_as::<_, CartWithCourseRow>(
        r#"
        SELECT ci.id AS cart_id,
               c.id AS course_id, c.title, c.description, c.price, c.discount_price,
               c.status, c.created_at, c.updated_at
        FROM cart_items ci
        JOIN courses c ON c.id = ci.course_id
        WHERE ci.user_id = $1
        ORDER BY ci.created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user.user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cart_items WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(pool)
        .await?;

    let items = rows
        .into_iter()
        .map(|row| CartItemDto {
            id: row.cart_id,
            course: Course {
                id: row.course_id,
                title: row.title,
                description: row.description,
                price: row.price,
                discount_price: row.discount_price,
                status: row.status,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
        })
        .collect();

    let meta = Meta::new(page, limit, total.0);
    Ok(ApiResponse::success("OK", CartList { items }, Some(meta)))
}

pub async fn add_to_cart(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    let course_exist: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM courses WHERE id = $1 AND status = 'published'")
            .bind(payload.course_id)
            .fetch_optional(pool)
            .await?;
    if course_exist.is_none() {
        return Err(AppError::BadRequest("course not found".to_string()));
    }

    let enrolled: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM enrollments WHERE user_id = $1 AND course_id = $2")
            .bind(user.user_id)
            .bind(payload.course_id)
            .fetch_optional(pool)
            .await?;
    if enrolled.is_some() {
        return Err(AppError::Conflict(
            "Already enrolled in this course".to_string(),
        ));
    }

    let exist: Option<CartItem> =
        sqlx::query_as("SELECT * FROM cart_items WHERE user_id = $1 AND course_id = $2")
            .bind(user.user_id)
            .bind(payload.course_id)
            .fetch_optional(pool)
            .await?;
    if exist.is_some() {
        return Err(AppError::Conflict("Course already in cart".to_string()));
    }

    let cart_item: CartItem = sqlx::query_as(
        "INSERT INTO cart_items (id, user_id, course_id) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(payload.course_id)
    .fetch_one(pool)
    .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_add",
        Some("cart_items"),
        Some(serde_json::json!({ "course_id": payload.course_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("OK", cart_item, None))
}

pub async fn remove_from_cart(
    pool: &DbPool,
    user: &AuthUser,
    course_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE course_id = $1 AND user_id = $2")
        .bind(course_id)
        .bind(user.user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "course_id": course_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
