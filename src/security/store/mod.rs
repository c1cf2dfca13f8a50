//! Append-only log of login and email events.
//!
//! The guards only read from the store. Workflows append an event after the
//! login attempt or email send has actually happened, and the store assigns
//! the timestamp so ordering never depends on the caller's clock.

mod memory;
mod postgres;

pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, net::IpAddr, str::FromStr};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LoginSuccess,
    LoginFailure,
    EmailSent,
}

impl EventKind {
    pub const LOGIN: [Self; 2] = [Self::LoginSuccess, Self::LoginFailure];
    pub const EMAIL: [Self; 1] = [Self::EmailSent];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFailure => "login_failure",
            Self::EmailSent => "email_sent",
        }
    }
}

impl FromStr for EventKind {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "login_success" => Ok(Self::LoginSuccess),
            "login_failure" => Ok(Self::LoginFailure),
            "email_sent" => Ok(Self::EmailSent),
            other => Err(StoreError::InvalidData(format!("unknown event kind: {other}"))),
        }
    }
}

/// Event as submitted by a workflow, before the store timestamps it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRequestEvent {
    pub identity: String,
    pub network_address: IpAddr,
    pub kind: EventKind,
}

impl NewRequestEvent {
    /// The identity is stored in its [`normalize_identity`] form.
    #[must_use]
    pub fn new(identity: impl AsRef<str>, network_address: IpAddr, kind: EventKind) -> Self {
        Self {
            identity: normalize_identity(identity.as_ref()).unwrap_or_default(),
            network_address,
            kind,
        }
    }
}

/// Trimmed, lowercased identity, or `None` when nothing is left.
///
/// Events are written and queried with this form, so `Alice@Example.com` and
/// `alice@example.com` share one count.
#[must_use]
pub fn normalize_identity(identity: &str) -> Option<String> {
    let identity = identity.trim();
    if identity.is_empty() {
        None
    } else {
        Some(identity.to_lowercase())
    }
}

/// Event as recorded by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestEvent {
    pub identity: String,
    pub network_address: IpAddr,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoginTotals {
    pub total: u64,
    pub failures: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("event store query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("event store returned invalid data: {0}")]
    InvalidData(String),
}

#[async_trait]
pub trait RequestEventStore: Send + Sync + Debug {
    /// Count `kind` events newer than `since_seconds` ago. `None` filters
    /// match everything; when both are given an event must match both.
    async fn count_events(
        &self,
        identity: Option<&str>,
        network_address: Option<IpAddr>,
        kind: EventKind,
        since_seconds: u64,
    ) -> Result<u64, StoreError>;

    /// Timestamp of the latest event of any of `kinds` matching the identity
    /// or the address.
    async fn most_recent_event_timestamp(
        &self,
        identity: Option<&str>,
        network_address: Option<IpAddr>,
        kinds: &[EventKind],
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn append_event(&self, event: NewRequestEvent) -> Result<(), StoreError>;

    /// Site-wide count of `kind` events in the last `since_days` days.
    async fn global_count(&self, kind: EventKind, since_days: u32) -> Result<u64, StoreError>;

    /// Site-wide login attempts and failures in the last `since_days` days.
    async fn global_login_totals(&self, since_days: u32) -> Result<LoginTotals, StoreError>;

    /// Cheap liveness probe for health checks.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
