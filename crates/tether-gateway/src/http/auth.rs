use axum::{
    http::{HeaderMap, StatusCode},
    Json,
};
use tether_core::config::AuthMode;

use crate::app::AppState;
use crate::http::chat::ChatError;

/// Reject the request unless it carries the configured bearer token.
pub fn require_auth(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<ChatError>)> {
    if check_auth(state, headers) {
        return Ok(());
    }
    Err((
        StatusCode::UNAUTHORIZED,
        Json(ChatError::new(
            "Unauthorized. Set 'Authorization: Bearer <your-token>' header.",
        )),
    ))
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> bool {
    match &state.config.gateway.auth.mode {
        AuthMode::None => true,
        AuthMode::Token => {
            let expected = match &state.config.gateway.auth.token {
                Some(t) if !t.is_empty() => t.as_str(),
                // token mode without a token value: deny everything
                _ => return false,
            };
            extract_bearer(headers)
                .map(|t| t == expected)
                .unwrap_or(false)
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
