use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::checkout::{CheckoutData, CheckoutRequest, ConfirmQuery, ConfirmationData},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::checkout_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(checkout))
        .route("/success", get(confirm_payment))
}

#[utoipa::path(
    post,
    path = "/api/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Order placed or payment session opened", body = ApiResponse<CheckoutData>),
        (status = 400, description = "Empty cart or invalid payment method"),
        (status = 409, description = "Course unavailable or already enrolled"),
        (status = 502, description = "Payment gateway failure"),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<ApiResponse<CheckoutData>>> {
    let resp = checkout_service::checkout(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/checkout/success",
    params(
        ("session_id" = String, Query, description = "Gateway checkout session id"),
        ("transaction_id" = Uuid, Query, description = "Correlation transaction id")
    ),
    responses(
        (status = 200, description = "Payment settled (idempotent)", body = ApiResponse<ConfirmationData>),
        (status = 400, description = "Payment not completed"),
        (status = 404, description = "Unknown transaction"),
        (status = 502, description = "Payment gateway failure"),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ConfirmQuery>,
) -> AppResult<Json<ApiResponse<ConfirmationData>>> {
    let resp = checkout_service::confirm_payment(&state, &user, query).await?;
    Ok(Json(resp))
}
