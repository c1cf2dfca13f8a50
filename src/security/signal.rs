//! Abuse signals returned by the guards.

use serde::Serialize;
use std::fmt;
use utoipa::ToSchema;

/// Which check produced a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    UserLogin,
    UserEmail,
    GlobalLogin,
    GlobalEmail,
}

impl Scope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserLogin => "user_login",
            Self::UserEmail => "user_email",
            Self::GlobalLogin => "global_login",
            Self::GlobalEmail => "global_email",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller has to do before the request is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Remedy {
    WaitSeconds(u64),
    SolveCaptcha,
}

impl Remedy {
    /// Seconds to put in a `Retry-After` header, if any.
    #[must_use]
    pub const fn retry_after(self) -> Option<u64> {
        match self {
            Self::WaitSeconds(seconds) => Some(seconds),
            Self::SolveCaptcha => None,
        }
    }
}

impl fmt::Display for Remedy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitSeconds(seconds) => write!(f, "try again in {seconds} seconds"),
            Self::SolveCaptcha => f.write_str("complete the captcha challenge and resubmit"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AbuseSignal {
    scope: Scope,
    remedy: Remedy,
    message: String,
}

impl AbuseSignal {
    #[must_use]
    pub fn new(scope: Scope, remedy: Remedy, message: impl Into<String>) -> Self {
        Self {
            scope,
            remedy,
            message: message.into(),
        }
    }

    /// Per-identity or per-address cooldown.
    #[must_use]
    pub fn wait(scope: Scope, seconds: u64) -> Self {
        let remedy = Remedy::WaitSeconds(seconds);
        let message = match scope {
            Scope::UserEmail | Scope::GlobalEmail => {
                format!("Too many emails sent, {remedy}")
            }
            Scope::UserLogin | Scope::GlobalLogin => {
                format!("Too many failed logins, {remedy}")
            }
        };
        Self::new(scope, remedy, message)
    }

    #[must_use]
    pub fn captcha(scope: Scope) -> Self {
        let message = match scope {
            Scope::UserLogin => "Too many failed logins, please solve the captcha",
            Scope::UserEmail => "Too many emails sent, please solve the captcha",
            Scope::GlobalLogin => "Unusual number of failed logins, please solve the captcha",
            Scope::GlobalEmail => "Unusual number of emails sent, please solve the captcha",
        };
        Self::new(scope, Remedy::SolveCaptcha, message)
    }

    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    #[must_use]
    pub const fn remedy(&self) -> Remedy {
        self.remedy
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
