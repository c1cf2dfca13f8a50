//! Login and email security checks with CAPTCHA bypass.
//!
//! The two flows consult the CAPTCHA at different points:
//!
//! - **Login:** the guard always runs first. A CAPTCHA token is only looked at
//!   when the guard signals, and a verified token lifts that signal.
//! - **Email:** a supplied token is verified before anything else. A verified
//!   token skips the email guard entirely; otherwise the guard runs as usual.
//!
//! A failed or unavailable verification never makes the outcome more
//! permissive than sending no token at all.

use super::captcha::CaptchaVerifier;
use super::clock::Clock;
use super::email::EmailAbuseGuard;
use super::login::LoginAbuseGuard;
use super::settings::SecuritySettings;
use super::signal::{AbuseSignal, Scope};
use super::store::{RequestEventStore, StoreError};
use std::{net::IpAddr, sync::Arc};
use tracing::{error, info, instrument, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allowed {
    Unthrottled,
    CaptchaVerified,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Abuse(#[from] AbuseSignal),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SecurityCheck {
    login: LoginAbuseGuard,
    email: EmailAbuseGuard,
    captcha: Arc<dyn CaptchaVerifier>,
}

impl SecurityCheck {
    #[must_use]
    pub fn new(
        settings: Arc<SecuritySettings>,
        store: Arc<dyn RequestEventStore>,
        captcha: Arc<dyn CaptchaVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            login: LoginAbuseGuard::new(settings.clone(), store.clone(), clock.clone()),
            email: EmailAbuseGuard::new(settings, store, clock),
            captcha,
        }
    }

    /// Gate a login attempt.
    ///
    /// # Errors
    /// Returns `CheckError::Abuse` when the attempt must wait or solve a
    /// CAPTCHA, `CheckError::Store` when the event store is unavailable.
    #[instrument(skip(self, captcha_token))]
    pub async fn check_login_allowed(
        &self,
        identity: &str,
        network_address: IpAddr,
        captcha_token: Option<&str>,
    ) -> Result<Allowed, CheckError> {
        let signal = self
            .login
            .check_login(identity, network_address)
            .await
            .inspect_err(|err| error!("Failed to check login throttle: {err}"))?;

        let Some(signal) = signal else {
            return Ok(Allowed::Unthrottled);
        };

        let Some(token) = captcha_token else {
            return Err(signal.into());
        };

        match self.captcha.verify(token, signal.scope()).await {
            Ok(()) => {
                info!(scope = %signal.scope(), "login throttle lifted by captcha");
                Ok(Allowed::CaptchaVerified)
            }
            Err(err) => {
                warn!("Captcha bypass unavailable for login: {err}");
                Err(signal.into())
            }
        }
    }

    /// Gate an outgoing verification or recovery email.
    ///
    /// # Errors
    /// Returns `CheckError::Abuse` when the email must wait or a CAPTCHA is
    /// required, `CheckError::Store` when the event store is unavailable.
    #[instrument(skip(self, captcha_token))]
    pub async fn check_email_allowed(
        &self,
        identity: &str,
        network_address: IpAddr,
        captcha_token: Option<&str>,
    ) -> Result<Allowed, CheckError> {
        if let Some(token) = captcha_token {
            match self.captcha.verify(token, Scope::UserEmail).await {
                Ok(()) => {
                    info!("email guard skipped after captcha");
                    return Ok(Allowed::CaptchaVerified);
                }
                Err(err) => warn!("Captcha verification failed for email: {err}"),
            }
        }

        let signal = self
            .email
            .check_email(identity, network_address)
            .await
            .inspect_err(|err| error!("Failed to check email throttle: {err}"))?;

        match signal {
            Some(signal) => Err(signal.into()),
            None => Ok(Allowed::Unthrottled),
        }
    }
}
