use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::courses::{CourseList, CreateCourseRequest, EnrollmentDto, UpdateCourseRequest},
    entity::{
        courses::{ActiveModel, Column, Entity as Courses, Model as CourseModel},
        enrollments::{self, Column as EnrollCol, Entity as Enrollments},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Course,
    response::{ApiResponse, Meta},
    routes::params::{CourseQuery, CourseSortBy, SortOrder},
    state::AppState,
};

pub async fn list_courses(
    state: &AppState,
    query: CourseQuery,
) -> AppResult<ApiResponse<CourseList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(Column::Status.eq("published"));

    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Title).ilike(pattern.clone()))
                .add(Expr::col(Column::Description).ilike(pattern)),
        );
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(CourseSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        CourseSortBy::CreatedAt => Column::CreatedAt,
        CourseSortBy::Price => Column::Price,
        CourseSortBy::Title => Column::Title,
    };

    let mut finder = Courses::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(course_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    let data = CourseList { items };
    Ok(ApiResponse::success("Courses", data, Some(meta)))
}

pub async fn get_course(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Course>> {
    let result = Courses::find_by_id(id)
        .filter(Column::Status.eq("published"))
        .one(&state.orm)
        .await?
        .map(course_from_entity);
    let result = match result {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };
    Ok(ApiResponse::success("Course", result, None))
}

/// Direct enrollment, only for courses whose effective price is zero.
/// Paid courses go through the cart and checkout.
pub async fn enroll_free(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<EnrollmentDto>> {
    let course = Courses::find_by_id(id)
        .filter(Column::Status.eq("published"))
        .one(&state.orm)
        .await?;
    let course = match course {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    let effective_price = course.discount_price.unwrap_or(course.price);
    if effective_price > Decimal::ZERO {
        return Err(AppError::BadRequest("Course is not free".into()));
    }

    let existing = Enrollments::find()
        .filter(EnrollCol::UserId.eq(user.user_id))
        .filter(EnrollCol::CourseId.eq(course.id))
        .count(&state.orm)
        .await?;
    if existing > 0 {
        return Err(AppError::Conflict("Already enrolled in this course".into()));
    }

    let enrollment = enrollments::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        course_id: Set(course.id),
        is_paid: Set(false),
        paid_amount: Set(None),
        transaction_id: Set(None),
        enrolled_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "course_enroll_free",
        Some("enrollments"),
        Some(serde_json::json!({ "course_id": course.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Enrolled",
        EnrollmentDto {
            id: enrollment.id,
            course_id: enrollment.course_id,
            is_paid: enrollment.is_paid,
            paid_amount: enrollment.paid_amount,
            enrolled_at: enrollment.enrolled_at.with_timezone(&Utc),
        },
        Some(Meta::empty()),
    ))
}

pub async fn create_course(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCourseRequest,
) -> AppResult<ApiResponse<Course>> {
    ensure_admin(user)?;
    let status = payload.status.unwrap_or_else(|| "draft".to_string());
    validate_course_status(&status)?;
    validate_pricing(payload.price, payload.discount_price)?;

    let active = ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(payload.title),
        description: Set(payload.description),
        price: Set(payload.price),
        discount_price: Set(payload.discount_price),
        status: Set(status),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let course = active.insert(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "course_create",
        Some("courses"),
        Some(serde_json::json!({ "course_id": course.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Course created",
        course_from_entity(course),
        Some(Meta::empty()),
    ))
}

pub async fn update_course(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCourseRequest,
) -> AppResult<ApiResponse<Course>> {
    ensure_admin(user)?;
    let existing = Courses::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    let price = payload.price.unwrap_or(existing.price);
    let discount_price = match payload.discount_price {
        Some(p) => Some(p),
        None => existing.discount_price,
    };
    validate_pricing(price, discount_price)?;

    let mut active: ActiveModel = existing.into();
    if let Some(title) = payload.title {
        active.title = Set(title);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(status) = payload.status {
        validate_course_status(&status)?;
        active.status = Set(status);
    }
    active.price = Set(price);
    active.discount_price = Set(discount_price);
    active.updated_at = Set(Utc::now().into());

    let course = active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "course_update",
        Some("courses"),
        Some(serde_json::json!({ "course_id": course.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Updated",
        course_from_entity(course),
        Some(Meta::empty()),
    ))
}

pub async fn delete_course(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let result = Courses::delete_by_id(id).exec(&state.orm).await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "course_delete",
        Some("courses"),
        Some(serde_json::json!({ "course_id": id })),
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

fn validate_course_status(status: &str) -> Result<(), AppError> {
    const VALID: [&str; 3] = ["draft", "published", "archived"];
    if VALID.contains(&status) {
        Ok(())
    } else {
        Err(AppError::BadRequest("Invalid course status".into()))
    }
}

fn validate_pricing(price: Decimal, discount_price: Option<Decimal>) -> Result<(), AppError> {
    if price < Decimal::ZERO {
        return Err(AppError::BadRequest("price must not be negative".into()));
    }
    if let Some(discount) = discount_price {
        if discount < Decimal::ZERO || discount > price {
            return Err(AppError::BadRequest(
                "discount price must be between 0 and price".into(),
            ));
        }
    }
    Ok(())
}

pub fn course_from_entity(model: CourseModel) -> Course {
    Course {
        id: model.id,
        title: model.title,
        description: model.description,
        price: model.price,
        discount_price: model.discount_price,
        status: model.status,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}
