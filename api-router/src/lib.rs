#![allow(clippy::missing_docs_in_private_items)]

use api_state::ApiState;
use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    conversations::{create_conversation, message_sources, post_message},
    ingest::{enqueue_job, list_jobs},
    liveness::live,
    ratings::submit_rating,
    readiness::ready,
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    // Protected API endpoints (require auth)
    let protected = Router::new()
        .route("/conversations", post(create_conversation))
        .route("/conversations/{conversation_id}/messages", post(post_message))
        .route("/messages/{message_id}/sources", get(message_sources))
        .route("/messages/{message_id}/rating", put(submit_rating))
        .route("/ingestion/jobs", post(enqueue_job).get(list_jobs))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}
