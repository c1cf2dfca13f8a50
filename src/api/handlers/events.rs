use super::{ClientIp, ErrorBody, error_response};
use crate::security::{EventKind, NewRequestEvent, RequestEventStore};
use axum::{
    Extension, Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct EventRequest {
    #[serde(default)]
    identity: String,
    kind: EventKind,
}

#[utoipa::path(
    post,
    path = "/v1/events",
    request_body = EventRequest,
    responses (
        (status = 204, description = "Event recorded"),
        (status = 400, description = "Malformed request", body = ErrorBody),
        (status = 500, description = "Event store unavailable", body = ErrorBody),
    ),
    tag = "events",
)]
/// Record a login outcome or a sent email for the calling client address.
#[instrument(skip(store, payload))]
pub async fn record_event(
    client_ip: ClientIp,
    store: Extension<Arc<dyn RequestEventStore>>,
    payload: Result<Json<EventRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let event = NewRequestEvent::new(&request.identity, client_ip.0, request.kind);

    match store.append_event(event).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to record {} event: {err}", request.kind.as_str());
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "event could not be recorded")
        }
    }
}
