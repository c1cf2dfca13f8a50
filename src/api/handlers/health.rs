use crate::{GIT_COMMIT_HASH, security::RequestEventStore};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, warn};
use utoipa::ToSchema;

const HEALTH_DB_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Event store is reachable", body = Health),
        (status = 503, description = "Event store is unreachable", body = Health)
    ),
    tag = "health",
)]
// axum handler for health
pub async fn health(
    method: Method,
    store: Extension<Arc<dyn RequestEventStore>>,
) -> impl IntoResponse {
    let db_healthy = probe_store(store.0.as_ref()).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if db_healthy {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = health.commit.get(..7).unwrap_or_default();

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .unwrap_or_else(|err| {
            debug!("Failed to parse X-App header: {}", err);
            HeaderMap::new()
        });

    if db_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

async fn probe_store(store: &dyn RequestEventStore) -> bool {
    match timeout(Duration::from_secs(HEALTH_DB_TIMEOUT_SECONDS), store.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!("Failed to ping event store: {}", err);
            false
        }
        Err(_) => {
            warn!("Event store health check timed out");
            false
        }
    }
}
