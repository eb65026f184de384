use chrono::Utc;
use include_dir::{include_dir, Dir};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::time::Instant;
use tracing::{error, info};

use crate::error::AppError;

/// Forward-only SQL migrations, embedded at build time and applied in
/// lexical filename order. `<name>_DOWN.sql` companions are kept out of the
/// forward pass and used only by [`revert_last`].
static MIGRATIONS_DIR: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

const DOWN_SUFFIX: &str = "_DOWN.sql";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub filename: String,
    pub sql: String,
    pub checksum: String,
}

fn checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collects the forward migration files in lexical order.
pub fn forward_migrations() -> Result<Vec<MigrationFile>, AppError> {
    collect(|name| name.ends_with(".sql") && !name.ends_with(DOWN_SUFFIX))
}

fn collect(keep: impl Fn(&str) -> bool) -> Result<Vec<MigrationFile>, AppError> {
    let mut files = Vec::new();

    for file in MIGRATIONS_DIR.files() {
        let filename = file
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| AppError::Migration("migration with non-utf8 filename".into()))?
            .to_owned();

        if !keep(&filename) {
            continue;
        }

        let sql = file
            .contents_utf8()
            .ok_or_else(|| AppError::Migration(format!("{filename} is not valid UTF-8")))?
            .to_owned();

        let checksum = checksum(&sql);
        files.push(MigrationFile {
            filename,
            sql,
            checksum,
        });
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

/// Looks up the rollback companion for a forward migration, if one exists.
pub fn down_migration_for(forward_filename: &str) -> Option<MigrationFile> {
    let stem = forward_filename.strip_suffix(".sql")?;
    let down_name = format!("{stem}{DOWN_SUFFIX}");
    let file = MIGRATIONS_DIR.get_file(&down_name)?;
    let sql = file.contents_utf8()?.to_owned();
    let checksum = checksum(&sql);
    Some(MigrationFile {
        filename: down_name,
        sql,
        checksum,
    })
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    success: bool,
    checksum: String,
}

async fn ensure_ledger(pool: &PgPool) -> Result<(), AppError> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            filename TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL,
            success BOOLEAN NOT NULL,
            execution_ms BIGINT NOT NULL,
            checksum TEXT NOT NULL,
            error TEXT
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Applies every migration not yet recorded as successfully applied.
/// Re-running is a no-op; a checksum mismatch on an applied file aborts the
/// boot rather than proceeding on a drifted schema.
pub async fn apply_all(pool: &PgPool) -> Result<(), AppError> {
    ensure_ledger(pool).await?;

    let files = forward_migrations()?;
    for file in files {
        let ledger: Option<LedgerRow> =
            sqlx::query_as("SELECT success, checksum FROM schema_migrations WHERE filename = $1")
                .bind(&file.filename)
                .fetch_optional(pool)
                .await?;

        match ledger {
            Some(row) if row.success => {
                if row.checksum != file.checksum {
                    return Err(AppError::Migration(format!(
                        "{} was modified after being applied (checksum drift)",
                        file.filename
                    )));
                }
                continue;
            }
            // A previously failed attempt is retried after the ledger row is
            // cleared so the insert below does not conflict.
            Some(_) => {
                sqlx::query("DELETE FROM schema_migrations WHERE filename = $1")
                    .bind(&file.filename)
                    .execute(pool)
                    .await?;
            }
            None => {}
        }

        apply_one(pool, &file).await?;
    }

    Ok(())
}

async fn apply_one(pool: &PgPool, file: &MigrationFile) -> Result<(), AppError> {
    let started = Instant::now();
    let mut tx = pool.begin().await?;

    let outcome = sqlx::raw_sql(&file.sql).execute(&mut *tx).await;
    let execution_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

    match outcome {
        Ok(_) => {
            sqlx::query(
                "INSERT INTO schema_migrations
                     (filename, applied_at, success, execution_ms, checksum, error)
                 VALUES ($1, $2, TRUE, $3, $4, NULL)",
            )
            .bind(&file.filename)
            .bind(Utc::now())
            .bind(execution_ms)
            .bind(&file.checksum)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            info!(filename = %file.filename, execution_ms, "applied migration");
            Ok(())
        }
        Err(err) => {
            tx.rollback().await?;
            let message = err.to_string();

            sqlx::query(
                "INSERT INTO schema_migrations
                     (filename, applied_at, success, execution_ms, checksum, error)
                 VALUES ($1, $2, FALSE, $3, $4, $5)",
            )
            .bind(&file.filename)
            .bind(Utc::now())
            .bind(execution_ms)
            .bind(&file.checksum)
            .bind(&message)
            .execute(pool)
            .await?;

            error!(filename = %file.filename, error = %message, "migration failed");
            Err(AppError::Migration(format!(
                "{} failed: {message}",
                file.filename
            )))
        }
    }
}

/// Opt-in rollback of the most recently applied migration, available only
/// when a `<name>_DOWN.sql` companion ships with it.
pub async fn revert_last(pool: &PgPool) -> Result<(), AppError> {
    ensure_ledger(pool).await?;

    let last: Option<(String,)> = sqlx::query_as(
        "SELECT filename FROM schema_migrations
         WHERE success ORDER BY filename DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    let Some((filename,)) = last else {
        return Err(AppError::Migration("nothing to revert".into()));
    };

    let down = down_migration_for(&filename).ok_or_else(|| {
        AppError::Migration(format!("{filename} has no rollback companion file"))
    })?;

    let mut tx = pool.begin().await?;
    sqlx::raw_sql(&down.sql).execute(&mut *tx).await?;
    sqlx::query("DELETE FROM schema_migrations WHERE filename = $1")
        .bind(&filename)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(%filename, "reverted migration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_migrations_are_lexically_ordered() {
        let files = forward_migrations().expect("collect migrations");
        assert!(!files.is_empty(), "expected embedded migration files");

        let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted, "forward pass must be lexically ordered");
    }

    #[test]
    fn test_forward_pass_excludes_down_files() {
        let files = forward_migrations().expect("collect migrations");
        assert!(
            files.iter().all(|f| !f.filename.ends_with(DOWN_SUFFIX)),
            "down companions must not run in the forward pass"
        );
    }

    #[test]
    fn test_checksum_is_stable_and_content_sensitive() {
        let a = checksum("CREATE TABLE t (id INT);");
        let b = checksum("CREATE TABLE t (id INT);");
        let c = checksum("CREATE TABLE t (id BIGINT);");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64, "sha256 hex digest");
    }

    #[test]
    fn test_down_companion_lookup() {
        // The analytics migration ships with a rollback companion.
        let down = down_migration_for("0004_analytics.sql");
        assert!(down.is_some(), "expected 0004_analytics_DOWN.sql");
        assert!(down_migration_for("0001_core_schema.sql").is_none());
    }

    #[test]
    fn test_every_migration_has_content() {
        for file in forward_migrations().expect("collect migrations") {
            assert!(
                !file.sql.trim().is_empty(),
                "{} is empty",
                file.filename
            );
        }
    }
}
