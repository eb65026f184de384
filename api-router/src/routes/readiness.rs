use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: 200 when the database and the embedding service answer,
/// 503 otherwise.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let db_ok = state.db.ping().await.is_ok();
    let embedding_ok = state.embedding.healthy().await;

    let status = |ok: bool| if ok { "ok" } else { "fail" };

    if db_ok && embedding_ok {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "db": "ok", "embedding": "ok" }
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "db": status(db_ok), "embedding": status(embedding_ok) }
            })),
        )
    }
}
