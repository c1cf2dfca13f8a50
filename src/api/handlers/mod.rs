pub mod check;
pub mod events;
pub mod health;

use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Debug)]
pub struct ErrorBody {
    pub message: String,
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
        .into_response()
}

/// Address of the client the request is made on behalf of.
///
/// Resolved from the first `x-forwarded-for` entry, then `x-real-ip`, then
/// the TCP peer. Header values that don't parse as an address are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ip) = client_ip_from_headers(&parts.headers) {
            return Ok(Self(ip));
        }

        ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .map(|ConnectInfo(addr)| Self(addr.ip()))
            .map_err(|_| error_response(StatusCode::BAD_REQUEST, "client address unavailable"))
    }
}

pub(crate) fn client_ip_from_headers(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(parse_ip);

    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_ip)
    })
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    value.trim().parse().ok()
}
