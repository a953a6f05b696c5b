//! Route configuration for the notification API

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::dispatch::NotificationService;
use crate::handlers::{lifecycle_handlers, ops_handlers, send_handlers};

/// Build the API router around a constructed service
pub fn create_router(service: Arc<NotificationService>) -> Router {
    let request_timeout = Duration::from_secs(service.config().server.request_timeout_secs);

    Router::new()
        .route(
            "/notifications",
            post(send_handlers::dispatch).get(lifecycle_handlers::list),
        )
        .route("/notifications/email", post(send_handlers::send_email))
        .route("/notifications/sms", post(send_handlers::send_sms))
        .route("/notifications/whatsapp", post(send_handlers::send_whatsapp))
        .route(
            "/notifications/external/:external_id",
            get(lifecycle_handlers::find_by_external_id),
        )
        .route("/notifications/retry", post(lifecycle_handlers::retry))
        .route("/notifications/cancel", post(lifecycle_handlers::cancel))
        .route("/notifications/health", get(ops_handlers::health))
        .route("/notifications/stats", get(ops_handlers::stats))
        .route("/metrics", get(ops_handlers::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(service)
}
