use crate::security::{RequestEventStore, SecurityCheck};
use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    routing::options,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;

pub mod handlers;
mod openapi;

pub use self::openapi::openapi;

const REQUEST_ID: &str = "x-request-id";

/// Build the application router with its middleware and shared state.
#[must_use]
pub fn app(store: Arc<dyn RequestEventStore>, check: Arc<SecurityCheck>) -> Router {
    let (router, _openapi) = openapi::api_router().split_for_parts();

    router
        .route("/health", options(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(check))
                .layer(Extension(store)),
        )
}

/// Serve the API on `port` until ctrl-c.
/// # Errors
/// Returns an error if the server fails to start
pub async fn new(
    port: u16,
    store: Arc<dyn RequestEventStore>,
    check: Arc<SecurityCheck>,
) -> Result<()> {
    let app = app(store, check);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    info_span!(
        "http.request",
        method = %request.method(),
        route = request.uri().path(),
        request_id
    )
}
