//! Login throttling.
//!
//! Flow Overview:
//! 1) Count failed and successful logins for the identity and for the
//!    address within the configured timespan.
//! 2) Run the login tier table against the failure counts only.
//! 3) When no tier signals, fall through to the global failure ratio check.

use super::clock::Clock;
use super::global::GlobalAbuseGuard;
use super::settings::SecuritySettings;
use super::signal::{AbuseSignal, Scope};
use super::store::{EventKind, RequestEventStore, StoreError, normalize_identity};
use super::tiers;
use std::{net::IpAddr, sync::Arc};
use tracing::{debug, instrument};

/// Login counts for one identity and one address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoginStats {
    pub identity_failures: u64,
    pub identity_successes: u64,
    pub ip_failures: u64,
    pub ip_successes: u64,
}

#[derive(Debug, Clone)]
pub struct LoginAbuseGuard {
    settings: Arc<SecuritySettings>,
    store: Arc<dyn RequestEventStore>,
    clock: Arc<dyn Clock>,
    global: GlobalAbuseGuard,
}

impl LoginAbuseGuard {
    #[must_use]
    pub fn new(
        settings: Arc<SecuritySettings>,
        store: Arc<dyn RequestEventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let global = GlobalAbuseGuard::new(settings.clone(), store.clone());
        Self {
            settings,
            store,
            clock,
            global,
        }
    }

    /// Decide whether a login attempt for `identity` from `network_address`
    /// has to wait or solve a CAPTCHA. `None` means the attempt may proceed.
    ///
    /// # Errors
    /// Returns `StoreError` if the event store can't be read.
    #[instrument(skip(self))]
    pub async fn check_login(
        &self,
        identity: &str,
        network_address: IpAddr,
    ) -> Result<Option<AbuseSignal>, StoreError> {
        if !self.settings.throttle_login_enabled() {
            return Ok(None);
        }

        let identity = normalize_identity(identity);
        let identity = identity.as_deref();
        let stats = self.login_stats(identity, network_address).await?;

        debug!(
            identity_failures = stats.identity_failures,
            identity_successes = stats.identity_successes,
            ip_failures = stats.ip_failures,
            ip_successes = stats.ip_successes,
            "login stats"
        );

        // Successes are deliberately not compared against the tiers here.
        let signal = tiers::evaluate(
            self.settings.login_throttle_table(),
            &[stats.ip_failures, stats.identity_failures],
            Scope::UserLogin,
            self.clock.as_ref(),
            self.store
                .most_recent_event_timestamp(identity, Some(network_address), &EventKind::LOGIN),
        )
        .await?;

        if signal.is_some() {
            return Ok(signal);
        }

        self.global.check_global_login_ratio().await
    }

    /// # Errors
    /// Returns `StoreError` if a count can't be read.
    pub async fn login_stats(
        &self,
        identity: Option<&str>,
        network_address: IpAddr,
    ) -> Result<LoginStats, StoreError> {
        let window = self.settings.timespan_seconds();

        let (identity_failures, identity_successes) = match identity {
            Some(identity) => (
                self.store
                    .count_events(Some(identity), None, EventKind::LoginFailure, window)
                    .await?,
                self.store
                    .count_events(Some(identity), None, EventKind::LoginSuccess, window)
                    .await?,
            ),
            None => (0, 0),
        };

        let ip_failures = self
            .store
            .count_events(None, Some(network_address), EventKind::LoginFailure, window)
            .await?;
        let ip_successes = self
            .store
            .count_events(None, Some(network_address), EventKind::LoginSuccess, window)
            .await?;

        Ok(LoginStats {
            identity_failures,
            identity_successes,
            ip_failures,
            ip_successes,
        })
    }
}
