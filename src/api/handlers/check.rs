//! Login and email decision endpoints.
//!
//! - `204 No Content`: go ahead; `x-vigil-captcha: verified` is set when a
//!   CAPTCHA lifted the throttle.
//! - `429 Too Many Requests`: throttled, with a `Throttled` body and a
//!   `Retry-After` header for delay tiers.
//! - `500 Internal Server Error`: the event store could not be read, the
//!   request is not allowed.

use super::{ClientIp, ErrorBody, error_response};
use crate::security::{AbuseSignal, Allowed, CheckError, Remedy, Scope, SecurityCheck};
use axum::{
    Extension, Json,
    extract::rejection::JsonRejection,
    http::{HeaderName, HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

pub const CAPTCHA_HEADER: HeaderName = HeaderName::from_static("x-vigil-captcha");

#[derive(ToSchema, Deserialize, Debug)]
pub struct CheckRequest {
    /// Account identifier (username or email address). May be empty.
    #[serde(default)]
    identity: String,
    /// Solved CAPTCHA response, if the client has one.
    #[serde(default)]
    captcha_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemedyKind {
    Wait,
    Captcha,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct Throttled {
    scope: Scope,
    remedy: RemedyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    message: String,
}

impl From<&AbuseSignal> for Throttled {
    fn from(signal: &AbuseSignal) -> Self {
        let remedy = match signal.remedy() {
            Remedy::WaitSeconds(_) => RemedyKind::Wait,
            Remedy::SolveCaptcha => RemedyKind::Captcha,
        };
        Self {
            scope: signal.scope(),
            remedy,
            retry_after: signal.remedy().retry_after(),
            message: signal.message().to_string(),
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/check/login",
    request_body = CheckRequest,
    responses (
        (status = 204, description = "Login attempt may proceed"),
        (status = 400, description = "Malformed request", body = ErrorBody),
        (status = 429, description = "Login attempt is throttled", body = Throttled),
        (status = 500, description = "Event store unavailable", body = ErrorBody),
    ),
    tag = "check",
)]
/// Decide whether a login attempt may proceed.
#[instrument(skip(check, payload))]
pub async fn check_login(
    client_ip: ClientIp,
    check: Extension<Arc<SecurityCheck>>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let result = check
        .check_login_allowed(
            &request.identity,
            client_ip.0,
            request.captcha_token.as_deref(),
        )
        .await;

    decision_response(result)
}

#[utoipa::path(
    post,
    path = "/v1/check/email",
    request_body = CheckRequest,
    responses (
        (status = 204, description = "Email may be sent"),
        (status = 400, description = "Malformed request", body = ErrorBody),
        (status = 429, description = "Email is throttled", body = Throttled),
        (status = 500, description = "Event store unavailable", body = ErrorBody),
    ),
    tag = "check",
)]
/// Decide whether a verification or recovery email may be sent.
#[instrument(skip(check, payload))]
pub async fn check_email(
    client_ip: ClientIp,
    check: Extension<Arc<SecurityCheck>>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let result = check
        .check_email_allowed(
            &request.identity,
            client_ip.0,
            request.captcha_token.as_deref(),
        )
        .await;

    decision_response(result)
}

fn decision_response(result: Result<Allowed, CheckError>) -> Response {
    match result {
        Ok(Allowed::Unthrottled) => StatusCode::NO_CONTENT.into_response(),
        Ok(Allowed::CaptchaVerified) => (
            StatusCode::NO_CONTENT,
            [(CAPTCHA_HEADER, HeaderValue::from_static("verified"))],
        )
            .into_response(),
        Err(CheckError::Abuse(signal)) => throttled_response(&signal),
        Err(CheckError::Store(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "request could not be checked, try again later",
        ),
    }
}

fn throttled_response(signal: &AbuseSignal) -> Response {
    let body = Throttled::from(signal);
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    if let Some(seconds) = signal.remedy().retry_after() {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(seconds));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::StoreError;
    use anyhow::Result;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn json_body(response: Response) -> Result<Value> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn unthrottled_is_no_content() {
        let response = decision_response(Ok(Allowed::Unthrottled));
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get(CAPTCHA_HEADER).is_none());
    }

    #[tokio::test]
    async fn captcha_verified_sets_header() {
        let response = decision_response(Ok(Allowed::CaptchaVerified));
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers().get(CAPTCHA_HEADER),
            Some(&HeaderValue::from_static("verified"))
        );
    }

    #[tokio::test]
    async fn wait_signal_sets_retry_after() -> Result<()> {
        let signal = AbuseSignal::wait(Scope::UserLogin, 8);
        let response = decision_response(Err(signal.into()));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER),
            Some(&HeaderValue::from(8_u64))
        );

        let body = json_body(response).await?;
        assert_eq!(body["scope"], "user_login");
        assert_eq!(body["remedy"], "wait");
        assert_eq!(body["retry_after"], 8);
        Ok(())
    }

    #[tokio::test]
    async fn captcha_signal_has_no_retry_after() -> Result<()> {
        let signal = AbuseSignal::captcha(Scope::GlobalEmail);
        let response = decision_response(Err(signal.into()));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(RETRY_AFTER).is_none());

        let body = json_body(response).await?;
        assert_eq!(body["scope"], "global_email");
        assert_eq!(body["remedy"], "captcha");
        assert!(body.get("retry_after").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let err = CheckError::Store(StoreError::InvalidData("boom".to_string()));
        let response = decision_response(Err(err));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
