//! GET /channels: the persisted channel → session mappings.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use tether_sessions::ChannelSession;

use crate::app::AppState;
use crate::http::auth::require_auth;
use crate::http::chat::HandlerError;

pub async fn channels_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChannelSession>>, HandlerError> {
    require_auth(&state, &headers)?;
    Ok(Json(state.router.registry().entries()))
}
