use uuid::Uuid;

use crate::{db::DbPool, error::AppResult};

/// Reward granted per settled course enrollment.
pub const COURSE_REWARD_POINTS: i64 = 50;

/// Atomic points increment. Callers treat this as fire-and-forget: a
/// failed award is logged, never allowed to abort a settlement.
pub async fn award_points(
    pool: &DbPool,
    user_id: Uuid,
    amount: i64,
    reason: &str,
) -> AppResult<()> {
    sqlx::query("UPDATE users SET points = points + $2 WHERE id = $1")
        .bind(user_id)
        .bind(amount)
        .execute(pool)
        .await?;

    tracing::debug!(%user_id, amount, reason, "points awarded");
    Ok(())
}
