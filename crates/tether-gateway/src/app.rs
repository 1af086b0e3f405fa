use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tether_channels::MessageRouter;
use tether_core::TetherConfig;

/// Central shared state, passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub config: TetherConfig,
    pub router: MessageRouter,
}

impl AppState {
    pub fn new(config: TetherConfig, router: MessageRouter) -> Self {
        Self { config, router }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/channels", get(crate::http::channels::channels_handler))
        .route("/chat", post(crate::http::chat::chat_handler))
        .route("/chat/stream", post(crate::http::chat::chat_stream_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
