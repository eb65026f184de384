//! Thin gate in front of the protected routes: a static bearer token plus
//! the caller identity relayed by the upstream auth layer in `X-User-Id`.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError};

/// Authenticated caller, inserted into request extensions.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

pub async fn api_auth(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config.api_token.is_empty() {
        let provided = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        if provided != Some(state.config.api_token.as_str()) {
            return Err(ApiError::Unauthorized("invalid API token".to_string()));
        }
    }

    let user_id = request
        .headers()
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<Uuid>().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing or invalid X-User-Id".to_string()))?;

    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}
