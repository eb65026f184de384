use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

/// A curation label partitioning the corpus; users only see documents in
/// their allowed universes (or unscoped documents).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductUniverse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl ProductUniverse {
    pub async fn create(pool: &PgPool, name: &str, description: &str) -> Result<Self, AppError> {
        let universe = sqlx::query_as::<_, Self>(
            "INSERT INTO product_universes (id, name, description)
             VALUES ($1, $2, $3)
             RETURNING id, name, description, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .fetch_one(pool)
        .await?;
        Ok(universe)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Self>, AppError> {
        let universe = sqlx::query_as::<_, Self>(
            "SELECT id, name, description, created_at FROM product_universes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(universe)
    }
}

pub struct UserUniverseAccess;

impl UserUniverseAccess {
    pub async fn grant(
        pool: &PgPool,
        user_id: Uuid,
        universe_id: Uuid,
        is_default: bool,
    ) -> Result<(), AppError> {
        let mut tx = pool.begin().await?;

        // A user has exactly one default; granting a new default demotes the
        // previous one inside the same transaction.
        if is_default {
            sqlx::query(
                "UPDATE user_universe_accesses SET is_default = FALSE WHERE user_id = $1",
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO user_universe_accesses (user_id, universe_id, is_default)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id, universe_id) DO UPDATE SET is_default = EXCLUDED.is_default",
        )
        .bind(user_id)
        .bind(universe_id)
        .bind(is_default)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn default_for_user(pool: &PgPool, user_id: Uuid) -> Result<Option<Uuid>, AppError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT universe_id FROM user_universe_accesses
             WHERE user_id = $1 AND is_default",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn has_access(
        pool: &PgPool,
        user_id: Uuid,
        universe_id: Uuid,
    ) -> Result<bool, AppError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT universe_id FROM user_universe_accesses
             WHERE user_id = $1 AND universe_id = $2",
        )
        .bind(user_id)
        .bind(universe_id)
        .fetch_optional(pool)
        .await?;
        Ok(row.is_some())
    }
}
