pub mod migrations;

use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};

use crate::error::AppError;

/// Handle on the primary relational store. Cloning is cheap; the pool is
/// shared. Passed explicitly to handlers and workers, never global.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
    database_url: String,
}

impl Db {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;

        Ok(Self {
            pool,
            database_url: database_url.to_owned(),
        })
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies pending schema migrations. Dependent services must refuse to
    /// start when this fails.
    pub async fn apply_migrations(&self) -> Result<(), AppError> {
        migrations::apply_all(&self.pool).await
    }

    /// Opens a dedicated connection subscribed to the given notification
    /// channels. Workers hold this for their whole lifetime.
    pub async fn listener(&self, channels: &[&str]) -> Result<PgListener, AppError> {
        let mut listener = PgListener::connect(&self.database_url).await?;
        listener.listen_all(channels.iter().copied()).await?;
        Ok(listener)
    }

    /// Readiness check used by the HTTP probe.
    pub async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
