//! CAPTCHA response verification.
//!
//! Providers (reCAPTCHA, hCaptcha, Turnstile) share the same `siteverify`
//! contract: a form POST with `secret` and `response`, answered by a JSON body
//! carrying a boolean `success`. Anything other than an explicit
//! `"success": true` is a failed verification.

use super::signal::Scope;
use crate::APP_USER_AGENT;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{fmt, time::Duration};
use tracing::{debug, instrument};
use url::Url;

pub const DEFAULT_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationFailure {
    #[error("empty captcha response")]
    EmptyToken,
    #[error("captcha verification is not configured")]
    NotConfigured,
    #[error("captcha provider timed out")]
    Timeout,
    #[error("captcha provider unreachable: {0}")]
    Transport(String),
    #[error("captcha provider returned HTTP {0}")]
    Status(u16),
    #[error("malformed captcha provider response: {0}")]
    Malformed(String),
    #[error("captcha rejected ({})", .0.join(", "))]
    Rejected(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("captcha verification failed for {scope}: {failure}")]
pub struct VerificationError {
    pub scope: Scope,
    pub failure: VerificationFailure,
}

impl VerificationError {
    #[must_use]
    pub const fn new(scope: Scope, failure: VerificationFailure) -> Self {
        Self { scope, failure }
    }
}

#[async_trait]
pub trait CaptchaVerifier: Send + Sync + fmt::Debug {
    /// `Ok(())` only when the provider explicitly confirmed the token.
    async fn verify(&self, token: &str, scope: Scope) -> Result<(), VerificationError>;
}

/// Used when no provider secret is configured: every token is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCaptcha;

#[async_trait]
impl CaptchaVerifier for DisabledCaptcha {
    async fn verify(&self, _token: &str, scope: Scope) -> Result<(), VerificationError> {
        Err(VerificationError::new(
            scope,
            VerificationFailure::NotConfigured,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: Option<bool>,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

/// `siteverify` client with a shared secret.
#[derive(Clone)]
pub struct SiteVerifyCaptcha {
    client: Client,
    verify_url: Url,
    secret: SecretString,
}

impl fmt::Debug for SiteVerifyCaptcha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteVerifyCaptcha")
            .field("verify_url", &self.verify_url.as_str())
            .field("secret", &"***")
            .finish_non_exhaustive()
    }
}

impl SiteVerifyCaptcha {
    /// Build a verifier whose provider call is bounded by `timeout`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(secret: SecretString, verify_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build captcha HTTP client")?;

        Ok(Self {
            client,
            verify_url,
            secret,
        })
    }

    async fn site_verify(&self, token: &str) -> Result<(), VerificationFailure> {
        let params = [
            ("secret", self.secret.expose_secret()),
            ("response", token),
        ];

        let response = self
            .client
            .post(self.verify_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerificationFailure::Status(status.as_u16()));
        }

        let body: SiteVerifyResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                VerificationFailure::Timeout
            } else {
                VerificationFailure::Malformed(err.to_string())
            }
        })?;

        match body.success {
            Some(true) => Ok(()),
            Some(false) => Err(VerificationFailure::Rejected(body.error_codes)),
            None => Err(VerificationFailure::Malformed(
                "missing success field".to_string(),
            )),
        }
    }
}

fn transport_failure(err: reqwest::Error) -> VerificationFailure {
    if err.is_timeout() {
        VerificationFailure::Timeout
    } else {
        VerificationFailure::Transport(err.to_string())
    }
}

#[async_trait]
impl CaptchaVerifier for SiteVerifyCaptcha {
    #[instrument(skip(self, token))]
    async fn verify(&self, token: &str, scope: Scope) -> Result<(), VerificationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(VerificationError::new(scope, VerificationFailure::EmptyToken));
        }

        self.site_verify(token)
            .await
            .map_err(|failure| VerificationError::new(scope, failure))?;

        debug!("captcha verified");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Form, Json, Router, http::StatusCode, response::IntoResponse, routing::post};
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    const SECRET: &str = "s3cret";

    async fn siteverify(Form(form): Form<HashMap<String, String>>) -> axum::response::Response {
        if form.get("secret").map(String::as_str) != Some(SECRET) {
            return Json(json!({"success": false, "error-codes": ["invalid-input-secret"]}))
                .into_response();
        }

        match form.get("response").map(String::as_str) {
            Some("good") => Json(json!({"success": true})).into_response(),
            Some("bad") => Json(json!({
                "success": false,
                "error-codes": ["invalid-input-response"]
            }))
            .into_response(),
            Some("no-success") => Json(json!({"hostname": "example.com"})).into_response(),
            Some("garbage") => "<html>oops</html>".into_response(),
            Some("slow") => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({"success": true})).into_response()
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }

    async fn provider() -> Result<Url> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = Router::new().route("/siteverify", post(siteverify));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Url::parse(&format!("http://{addr}/siteverify"))?)
    }

    async fn verifier(secret: &str) -> Result<SiteVerifyCaptcha> {
        SiteVerifyCaptcha::new(
            SecretString::from(secret.to_string()),
            provider().await?,
            Duration::from_millis(500),
        )
    }

    async fn failure_for(token: &str) -> Result<Option<VerificationFailure>> {
        let verifier = verifier(SECRET).await?;
        Ok(verifier
            .verify(token, Scope::UserLogin)
            .await
            .err()
            .map(|err| err.failure))
    }

    #[tokio::test]
    async fn accepts_explicit_success() -> Result<()> {
        assert_eq!(failure_for("good").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_token_carries_error_codes() -> Result<()> {
        assert_eq!(
            failure_for("bad").await?,
            Some(VerificationFailure::Rejected(vec![
                "invalid-input-response".to_string()
            ]))
        );
        Ok(())
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() -> Result<()> {
        let verifier = verifier("not-the-secret").await?;
        let err = verifier.verify("good", Scope::UserEmail).await.err();
        assert!(matches!(
            err,
            Some(VerificationError {
                scope: Scope::UserEmail,
                failure: VerificationFailure::Rejected(_)
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn fails_closed_on_bad_responses() -> Result<()> {
        assert!(matches!(
            failure_for("no-success").await?,
            Some(VerificationFailure::Malformed(_))
        ));
        assert!(matches!(
            failure_for("garbage").await?,
            Some(VerificationFailure::Malformed(_))
        ));
        assert_eq!(
            failure_for("boom").await?,
            Some(VerificationFailure::Status(500))
        );
        assert_eq!(failure_for("slow").await?, Some(VerificationFailure::Timeout));
        assert_eq!(failure_for("   ").await?, Some(VerificationFailure::EmptyToken));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_transport_failure() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);

        let verifier = SiteVerifyCaptcha::new(
            SecretString::from(SECRET.to_string()),
            Url::parse(&format!("http://{addr}/siteverify"))?,
            Duration::from_millis(500),
        )?;
        let err = verifier.verify("good", Scope::UserLogin).await.err();
        assert!(matches!(
            err.map(|err| err.failure),
            Some(VerificationFailure::Transport(_) | VerificationFailure::Timeout)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn disabled_captcha_never_verifies() {
        let err = DisabledCaptcha.verify("good", Scope::GlobalLogin).await.err();
        assert_eq!(
            err,
            Some(VerificationError::new(
                Scope::GlobalLogin,
                VerificationFailure::NotConfigured
            ))
        );
    }

    #[test]
    fn debug_hides_secret() -> Result<()> {
        let verifier = SiteVerifyCaptcha::new(
            SecretString::from(SECRET.to_string()),
            Url::parse(DEFAULT_VERIFY_URL)?,
            Duration::from_secs(5),
        )?;
        assert!(!format!("{verifier:?}").contains(SECRET));
        Ok(())
    }
}
