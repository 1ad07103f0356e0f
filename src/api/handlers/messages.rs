use super::error_response;
use crate::attempts::{outbox::PendingMessage, AttemptTracker};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{debug, error, instrument};

#[utoipa::path(
    get,
    path= "/messages/{recipient_id}",
    params(
        ("recipient_id" = String, Path, description = "Canonical recipient id returned by the identity lookup")
    ),
    responses (
        (status = 200, description = "Pending warning, now deleted", body = PendingMessage),
        (status = 404, description = "No pending message", body = super::ErrorBody),
        (status = 500, description = "Storage failure", body = super::ErrorBody),
    ),
    tag= "messages"
)]
// axum handler for reading a pending message once
#[instrument(skip(tracker))]
pub async fn consume(
    tracker: Extension<Arc<AttemptTracker>>,
    Path(recipient_id): Path<String>,
) -> Response {
    match tracker.consume_message(&recipient_id).await {
        Ok(Some(message)) => {
            debug!("pending message delivered");

            (StatusCode::OK, Json(message)).into_response()
        }

        Ok(None) => error_response(StatusCode::NOT_FOUND, "No pending message"),

        Err(e) => {
            error!("Error reading pending message: {:#}", e);

            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Error reading message")
        }
    }
}
