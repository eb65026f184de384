//! Daily quality maintenance: chunk satisfaction scores, validated
//! blacklisting, re-ingestion recommendations and analytics refresh.
//! Single-instance via a database advisory lock.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use common::{
    db::Db,
    error::AppError,
    llm::LlmClient,
    storage::types::{
        analytics,
        chunk::Chunk,
        quality::{
            AuditActor, BlacklistSource, ChunkBlacklist, ChunkQualityScore, DocumentQualityScore,
            QualityAuditLog,
        },
        thumbs_down_validation::ThumbsDownValidation,
    },
    utils::config::{parse_schedule, AppConfig},
};

/// Advisory-lock key for leader election across scheduler instances.
const SCHEDULER_LOCK_KEY: i64 = 0x5152_4147;

/// Ratings inside this window feed the chunk scores.
const RATING_WINDOW_DAYS: i64 = 30;

/// Blacklist thresholds: satisfaction at or below, with at least this many
/// ratings.
const BLACKLIST_SCORE_CEILING: f32 = -0.5;
const BLACKLIST_MIN_RATINGS: i32 = 3;

const BLACKLIST_SYSTEM_PROMPT: &str = "Un extrait de document interne reçoit des avis très \
négatifs quand il est cité. Décide s'il doit être exclu de la recherche : exclus-le \
uniquement s'il est hors sujet, trompeur ou obsolète. Donne une justification courte en \
français.";

fn blacklist_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "blacklist": { "type": "boolean" },
            "reason": { "type": "string" }
        },
        "required": ["blacklist", "reason"],
        "additionalProperties": false
    })
}

#[derive(Debug, Deserialize)]
struct BlacklistVerdict {
    blacklist: bool,
    reason: String,
}

pub const fn is_blacklist_candidate(satisfaction: f32, rating_count: i32) -> bool {
    satisfaction <= BLACKLIST_SCORE_CEILING && rating_count >= BLACKLIST_MIN_RATINGS
}

/// Seconds until the next daily HH:MM occurrence after `now`.
pub fn duration_until_next(now: DateTime<Utc>, hour: u32, minute: u32) -> Duration {
    let today_run = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .map_or(now, |naive| naive.and_utc());

    let next = if today_run > now {
        today_run
    } else {
        today_run + ChronoDuration::days(1)
    };

    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

#[derive(Clone)]
pub struct QualityScheduler {
    db: Db,
    llm: LlmClient,
    hour: u32,
    minute: u32,
    missing_sources_threshold: i64,
}

impl QualityScheduler {
    pub fn new(db: Db, llm: LlmClient, config: &AppConfig) -> Result<Self, AppError> {
        let (hour, minute) = parse_schedule(&config.quality_analysis_schedule)?;
        Ok(Self {
            db,
            llm,
            hour,
            minute,
            missing_sources_threshold: config.missing_sources_reingest_threshold,
        })
    }

    /// Sleeps until the configured wall-clock time, runs the maintenance
    /// pass, repeats. Errors are recorded and the next day's run proceeds.
    pub async fn run(&self) -> Result<(), AppError> {
        info!(
            schedule = format!("{:02}:{:02}", self.hour, self.minute),
            "quality scheduler armed"
        );

        loop {
            let wait = duration_until_next(Utc::now(), self.hour, self.minute);
            tokio::time::sleep(wait).await;

            if let Err(err) = self.run_once().await {
                error!(error = %err, "quality maintenance run failed");
            }
        }
    }

    /// One maintenance pass. The advisory lock makes concurrent instances
    /// no-ops rather than duplicate runs.
    #[instrument(skip_all)]
    pub async fn run_once(&self) -> Result<(), AppError> {
        let mut lock_conn = self.db.pool().acquire().await?;
        let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(SCHEDULER_LOCK_KEY)
            .fetch_one(&mut *lock_conn)
            .await?;

        if !locked {
            info!("another scheduler instance holds the lock, skipping run");
            return Ok(());
        }

        let outcome = self.maintain().await;

        // Release on the same connection that acquired the lock.
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(SCHEDULER_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await?;

        outcome
    }

    async fn maintain(&self) -> Result<(), AppError> {
        let since = Utc::now() - ChronoDuration::days(RATING_WINDOW_DAYS);

        // 1. Score every chunk cited in the window.
        let aggregates = ChunkQualityScore::aggregate_window(self.db.pool(), since).await?;
        info!(chunks = aggregates.len(), "scored cited chunks");

        for (chunk_id, satisfaction, rating_count) in &aggregates {
            ChunkQualityScore::upsert(self.db.pool(), *chunk_id, *satisfaction, *rating_count)
                .await?;
        }

        // 2. Blacklist chronically bad chunks, but only after the model
        //    confirms the content itself is the problem.
        for (chunk_id, satisfaction, rating_count) in &aggregates {
            if !is_blacklist_candidate(*satisfaction, *rating_count) {
                continue;
            }
            if ChunkBlacklist::contains(self.db.pool(), *chunk_id).await? {
                continue;
            }

            match self.validate_blacklist(*chunk_id).await {
                Ok(Some(reason)) => {
                    ChunkBlacklist::add(self.db.pool(), *chunk_id, &reason, BlacklistSource::Ai)
                        .await?;
                    QualityAuditLog::record(
                        self.db.pool(),
                        "chunk",
                        *chunk_id,
                        "blacklisted",
                        serde_json::json!({
                            "satisfaction": satisfaction,
                            "rating_count": rating_count,
                            "reason": reason,
                        }),
                        AuditActor::Scheduler,
                    )
                    .await?;
                    info!(%chunk_id, satisfaction, "chunk blacklisted");
                }
                Ok(None) => {
                    QualityAuditLog::record(
                        self.db.pool(),
                        "chunk",
                        *chunk_id,
                        "blacklist_declined",
                        serde_json::json!({
                            "satisfaction": satisfaction,
                            "rating_count": rating_count,
                        }),
                        AuditActor::Scheduler,
                    )
                    .await?;
                }
                Err(err) => {
                    warn!(%chunk_id, error = %err, "blacklist validation failed, keeping chunk");
                }
            }
        }

        // 3. Recommend re-ingestion for documents repeatedly flagged as
        //    missing sources.
        let documents = ThumbsDownValidation::documents_with_missing_sources(
            self.db.pool(),
            self.missing_sources_threshold,
            since,
        )
        .await?;
        for document_id in documents {
            DocumentQualityScore::mark_needs_reingestion(
                self.db.pool(),
                document_id,
                "signalé plusieurs fois comme documentation incomplète",
            )
            .await?;
            QualityAuditLog::record(
                self.db.pool(),
                "document",
                document_id,
                "needs_reingestion",
                serde_json::json!({ "threshold": self.missing_sources_threshold }),
                AuditActor::Scheduler,
            )
            .await?;
        }

        // 4. Refresh the dashboard read model.
        analytics::refresh_views(self.db.pool()).await?;

        info!("quality maintenance run completed");
        Ok(())
    }

    /// Asks the model to confirm a blacklist candidate. `Some(reason)` means
    /// exclude; `None` keeps the chunk.
    async fn validate_blacklist(&self, chunk_id: uuid::Uuid) -> Result<Option<String>, AppError> {
        let chunk = Chunk::get(self.db.pool(), chunk_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("chunk {chunk_id} not found")))?;

        let user_prompt = format!(
            "Extrait (section « {} ») :\n{}",
            chunk.heading_context, chunk.content
        );

        let value = self
            .llm
            .chat_complete_structured(
                BLACKLIST_SYSTEM_PROMPT,
                &user_prompt,
                "blacklist_decision",
                blacklist_schema(),
            )
            .await?;

        let verdict: BlacklistVerdict = serde_json::from_value(value)
            .map_err(|e| AppError::LLMParsing(format!("blacklist verdict unparseable: {e}")))?;

        Ok(verdict.blacklist.then_some(verdict.reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_blacklist_thresholds() {
        assert!(is_blacklist_candidate(-0.5, 3));
        assert!(is_blacklist_candidate(-1.0, 10));
        assert!(!is_blacklist_candidate(-0.4, 10));
        assert!(!is_blacklist_candidate(-1.0, 2));
        assert!(!is_blacklist_candidate(0.5, 8));
    }

    #[test]
    fn test_duration_until_next_same_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 14, 1, 0, 0).unwrap();
        let wait = duration_until_next(now, 3, 0);
        assert_eq!(wait, Duration::from_secs(2 * 3600));
    }

    #[test]
    fn test_duration_until_next_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 5, 14, 4, 30, 0).unwrap();
        let wait = duration_until_next(now, 3, 0);
        assert_eq!(wait, Duration::from_secs(22 * 3600 + 30 * 60));
    }

    #[test]
    fn test_duration_until_next_exact_boundary_waits_a_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 14, 3, 0, 0).unwrap();
        let wait = duration_until_next(now, 3, 0);
        assert_eq!(wait, Duration::from_secs(24 * 3600));
    }
}
