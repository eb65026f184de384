//! Thumbs-down analyser: a single LISTEN connection drives LLM
//! classification of negative feedback; a periodic sweep catches ratings
//! whose notification was lost.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use common::{
    db::Db,
    error::AppError,
    llm::LlmClient,
    storage::types::{
        chunk::Chunk,
        message::Message,
        message_rating::MessageRating,
        quality::{AuditActor, DocumentQualityScore, QualityAuditLog, UserNotification},
        thumbs_down_validation::{ThumbsDownClassification, ThumbsDownValidation},
    },
    utils::config::AppConfig,
};

const CHANNEL: &str = "thumbs_down_created";
const SWEEP_BATCH: usize = 20;

const CLASSIFIER_SYSTEM_PROMPT: &str = "Tu analyses un avis négatif (pouce baissé) laissé \
sur une réponse d'un assistant documentaire interne. Classe la cause dans une de ces \
catégories : bad_answer (la réponse est fausse ou hors sujet alors que la documentation \
couvre la question), bad_question (la question est trop vague ou mal posée), \
missing_sources (la documentation ne couvre pas la question), ambiguous (impossible de \
trancher). Donne aussi ta confiance entre 0 et 1 et une justification courte en français.";

fn classification_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "classification": {
                "type": "string",
                "enum": ["bad_answer", "bad_question", "missing_sources", "ambiguous"]
            },
            "confidence": { "type": "number" },
            "rationale": { "type": "string" }
        },
        "required": ["classification", "confidence", "rationale"],
        "additionalProperties": false
    })
}

#[derive(Debug, Deserialize)]
struct ClassifierVerdict {
    classification: String,
    confidence: f32,
    rationale: String,
}

#[derive(Clone)]
pub struct ThumbsDownAnalyser {
    db: Db,
    llm: LlmClient,
    confidence_threshold: f32,
    auto_notifications: bool,
    sweep_interval: Duration,
}

impl ThumbsDownAnalyser {
    pub fn new(db: Db, llm: LlmClient, config: &AppConfig) -> Self {
        Self {
            db,
            llm,
            confidence_threshold: config.thumbs_down_confidence_threshold,
            auto_notifications: config.auto_notifications_enabled,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        }
    }

    /// Single-instance worker loop. Classification failures are logged and
    /// left to the sweep; they never tear the process down.
    pub async fn run(&self) -> Result<(), AppError> {
        let mut listener = self.db.listener(&[CHANNEL]).await?;
        let mut sweep = tokio::time::interval(self.sweep_interval);
        info!(channel = CHANNEL, "thumbs-down analyser listening");

        loop {
            tokio::select! {
                notification = listener.recv() => match notification {
                    Ok(notification) => {
                        match notification.payload().parse::<Uuid>() {
                            Ok(rating_id) => {
                                if let Err(err) = self.process_rating(rating_id).await {
                                    error!(%rating_id, error = %err, "classification failed");
                                }
                            }
                            Err(_) => {
                                warn!(payload = notification.payload(), "unparseable notification payload");
                            }
                        }
                    }
                    Err(err) => {
                        // The listener reconnects on the next recv; missed
                        // notifications are covered by the sweep.
                        warn!(error = %err, "notification stream interrupted");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
                _ = sweep.tick() => {
                    if let Err(err) = self.sweep().await {
                        error!(error = %err, "thumbs-down sweep failed");
                    }
                }
            }
        }
    }

    /// Retries ratings that never got a validation row (worker crash,
    /// dropped notification, earlier LLM failure).
    async fn sweep(&self) -> Result<(), AppError> {
        let pending =
            MessageRating::unvalidated_thumbs_down(self.db.pool(), SWEEP_BATCH).await?;
        if pending.is_empty() {
            return Ok(());
        }

        info!(count = pending.len(), "sweeping unclassified thumbs-down ratings");
        for rating in pending {
            if let Err(err) = self.process_rating(rating.id).await {
                error!(rating_id = %rating.id, error = %err, "sweep classification failed");
            }
        }
        Ok(())
    }

    /// Classifies one negative rating. Processing is at-least-once; the
    /// write is idempotent on the rating id, so replays are harmless.
    #[instrument(skip_all, fields(%rating_id))]
    pub async fn process_rating(&self, rating_id: Uuid) -> Result<(), AppError> {
        if ThumbsDownValidation::get_by_rating(self.db.pool(), rating_id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let rating = MessageRating::get(self.db.pool(), rating_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("rating {rating_id} not found")))?;
        if rating.rating != -1 {
            return Ok(());
        }

        let message = Message::get(self.db.pool(), rating.message_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("message {} not found", rating.message_id))
            })?;
        let question = Message::preceding_user_message(self.db.pool(), &message).await?;

        let verdict = self.classify(&rating, &message, question.as_ref()).await?;
        let classification = ThumbsDownClassification::parse(&verdict.classification)
            .map_err(|err| AppError::LLMParsing(err.to_string()))?;
        let confidence = verdict.confidence.clamp(0.0, 1.0);
        let needs_admin_review = confidence < self.confidence_threshold;

        let validation = ThumbsDownValidation::insert_idempotent(
            self.db.pool(),
            rating_id,
            classification,
            confidence,
            &verdict.rationale,
            needs_admin_review,
        )
        .await?;

        QualityAuditLog::record(
            self.db.pool(),
            "message_rating",
            rating_id,
            "classified",
            serde_json::json!({
                "classification": classification.as_str(),
                "confidence": confidence,
                "needs_admin_review": needs_admin_review,
            }),
            AuditActor::Ai,
        )
        .await?;

        info!(
            classification = classification.as_str(),
            confidence,
            needs_admin_review,
            "thumbs-down classified"
        );

        self.apply_side_effects(&rating, &message, &validation).await
    }

    async fn classify(
        &self,
        rating: &MessageRating,
        message: &Message,
        question: Option<&Message>,
    ) -> Result<ClassifierVerdict, AppError> {
        let sources = message
            .sources
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|source| format!("- {} : {}", source.document_title, source.content_preview))
            .collect::<Vec<_>>()
            .join("\n");

        let user_prompt = format!(
            "Question de l'utilisateur :\n{question}\n\nRéponse de l'assistant ({provider}) :\n\
             {answer}\n\nSources citées :\n{sources}\n\nCommentaire de l'utilisateur :\n{feedback}",
            question = question.map_or("(inconnue)", |m| m.content.as_str()),
            provider = message.provider.as_deref().unwrap_or("inconnu"),
            answer = message.content,
            sources = if sources.is_empty() { "(aucune)" } else { sources.as_str() },
            feedback = rating.feedback.as_deref().unwrap_or("(aucun)"),
        );

        let value = self
            .llm
            .chat_complete_structured(
                CLASSIFIER_SYSTEM_PROMPT,
                &user_prompt,
                "thumbs_down_classification",
                classification_schema(),
            )
            .await?;

        serde_json::from_value(value)
            .map_err(|e| AppError::LLMParsing(format!("classifier verdict unparseable: {e}")))
    }

    async fn apply_side_effects(
        &self,
        rating: &MessageRating,
        message: &Message,
        validation: &ThumbsDownValidation,
    ) -> Result<(), AppError> {
        match validation.ai_classification {
            ThumbsDownClassification::BadQuestion if self.auto_notifications => {
                UserNotification::enqueue(
                    self.db.pool(),
                    rating.user_id,
                    "question_coaching",
                    "Votre question était difficile à interpréter. Essayez de préciser le \
                     document, le code d'erreur ou la procédure concernée.",
                )
                .await?;
            }
            ThumbsDownClassification::MissingSources
                if validation.confidence >= self.confidence_threshold =>
            {
                let chunk_ids: Vec<Uuid> = message
                    .sources
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|source| source.chunk_id)
                    .collect();

                let document_ids =
                    Chunk::document_ids_for(self.db.pool(), &chunk_ids).await?;
                for document_id in document_ids {
                    DocumentQualityScore::mark_needs_reingestion(
                        self.db.pool(),
                        document_id,
                        "cité dans une réponse jugée incomplète (missing_sources)",
                    )
                    .await?;
                    QualityAuditLog::record(
                        self.db.pool(),
                        "document",
                        document_id,
                        "needs_reingestion",
                        serde_json::json!({ "rating_id": rating.id }),
                        AuditActor::Ai,
                    )
                    .await?;
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_schema_lists_all_categories() {
        let schema = classification_schema();
        let categories = schema["properties"]["classification"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(categories.len(), 4);
        for category in ["bad_answer", "bad_question", "missing_sources", "ambiguous"] {
            assert!(categories.iter().any(|value| value == category));
        }
    }

    #[test]
    fn test_verdict_parses_from_schema_shaped_json() {
        let verdict: ClassifierVerdict = serde_json::from_value(serde_json::json!({
            "classification": "missing_sources",
            "confidence": 0.85,
            "rationale": "La documentation ne couvre pas ce cas."
        }))
        .unwrap();
        assert_eq!(verdict.classification, "missing_sources");
        assert!((verdict.confidence - 0.85).abs() < f32::EPSILON);
        assert!(!verdict.rationale.is_empty());
    }
}
