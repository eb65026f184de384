use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::storage::types::message_rating::MessageRating;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthUser};

#[derive(Debug, Deserialize)]
pub struct RatingParams {
    /// -1 (thumbs down) or +1 (thumbs up).
    pub rating: i16,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RatingResponse {
    pub id: Uuid,
    pub message_id: Uuid,
    pub rating: i16,
    pub feedback: Option<String>,
}

/// Create-or-update: submitting twice for the same message updates the
/// existing row. A thumbs down wakes the analyser through a database
/// trigger, never inline.
pub async fn submit_rating(
    State(state): State<ApiState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(message_id): Path<Uuid>,
    Json(params): Json<RatingParams>,
) -> Result<impl IntoResponse, ApiError> {
    let rating = MessageRating::upsert(
        state.db.pool(),
        message_id,
        user_id,
        params.rating,
        params.feedback.as_deref(),
    )
    .await?;

    Ok(Json(RatingResponse {
        id: rating.id,
        message_id: rating.message_id,
        rating: rating.rating,
        feedback: rating.feedback,
    }))
}
