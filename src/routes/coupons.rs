use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::coupons::{ApplyCouponRequest, CouponApplyData, RemoveCouponRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::coupon_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/apply", post(apply_coupon))
        .route("/remove", post(remove_coupon))
}

#[utoipa::path(
    post,
    path = "/api/coupons/apply",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Coupon evaluated; success=false carries the rejection reason", body = ApiResponse<CouponApplyData>),
        (status = 400, description = "Missing coupon code"),
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ApplyCouponRequest>,
) -> AppResult<Json<ApiResponse<CouponApplyData>>> {
    let resp = coupon_service::apply_coupon(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/coupons/remove",
    request_body = RemoveCouponRequest,
    responses(
        (status = 200, description = "Stateless acknowledgement", body = ApiResponse<serde_json::Value>),
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn remove_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<RemoveCouponRequest>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = coupon_service::remove_coupon(&state, &user, payload).await?;
    Ok(Json(resp))
}
