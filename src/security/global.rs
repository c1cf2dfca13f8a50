//! Site-wide circuit breakers.
//!
//! These trip on aggregate behaviour rather than on any single identity or
//! address, and always ask for a CAPTCHA instead of a delay.

use super::settings::SecuritySettings;
use super::signal::{AbuseSignal, Remedy, Scope};
use super::store::{EventKind, RequestEventStore, StoreError};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Below this many tolerated failures the ratio breaker never trips.
pub const MIN_GLOBAL_FAILURE_THRESHOLD: u64 = 20;

const DAILY_WINDOW_DAYS: u32 = 1;
const MONTHLY_WINDOW_DAYS: u32 = 30;

/// `floor(total / 100 * percentage)`.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn login_failure_threshold(total_logins: u64, failure_percentage: f64) -> u64 {
    let threshold = (total_logins as f64 / 100.0 * failure_percentage).floor();
    if threshold.is_finite() && threshold > 0.0 {
        threshold as u64
    } else {
        0
    }
}

/// Equality trips the breaker; small thresholds never do.
#[must_use]
pub const fn login_ratio_tripped(failures: u64, failure_threshold: u64) -> bool {
    failures >= failure_threshold && failure_threshold > MIN_GLOBAL_FAILURE_THRESHOLD
}

#[derive(Debug, Clone)]
pub struct GlobalAbuseGuard {
    settings: Arc<SecuritySettings>,
    store: Arc<dyn RequestEventStore>,
}

impl GlobalAbuseGuard {
    #[must_use]
    pub fn new(settings: Arc<SecuritySettings>, store: Arc<dyn RequestEventStore>) -> Self {
        Self { settings, store }
    }

    /// Ask everyone for a CAPTCHA once failures reach the configured share of
    /// all logins in the lookback window.
    ///
    /// # Errors
    /// Returns `StoreError` if the totals can't be read.
    #[instrument(skip(self))]
    pub async fn check_global_login_ratio(&self) -> Result<Option<AbuseSignal>, StoreError> {
        let totals = self
            .store
            .global_login_totals(self.settings.global_login_lookback_days())
            .await?;

        let failure_threshold =
            login_failure_threshold(totals.total, self.settings.login_failure_percentage());

        debug!(
            total = totals.total,
            failures = totals.failures,
            failure_threshold,
            "global login ratio"
        );

        if login_ratio_tripped(totals.failures, failure_threshold) {
            info!(
                failures = totals.failures,
                failure_threshold, "global login ratio breaker tripped"
            );
            return Ok(Some(AbuseSignal::captcha(Scope::GlobalLogin)));
        }

        Ok(None)
    }

    /// Daily volume is checked before monthly; the monthly count is only
    /// queried when the daily check passes.
    ///
    /// # Errors
    /// Returns `StoreError` if a count can't be read.
    #[instrument(skip(self))]
    pub async fn check_global_email_volume(&self) -> Result<Option<AbuseSignal>, StoreError> {
        if let Some(threshold) = self.settings.global_daily_email_threshold() {
            let sent = self
                .store
                .global_count(EventKind::EmailSent, DAILY_WINDOW_DAYS)
                .await?;
            debug!(sent, threshold, "global daily email volume");
            if sent >= threshold {
                info!(sent, threshold, "global daily email breaker tripped");
                return Ok(Some(AbuseSignal::new(
                    Scope::GlobalEmail,
                    Remedy::SolveCaptcha,
                    "Daily email limit reached, please solve the captcha",
                )));
            }
        }

        if let Some(threshold) = self.settings.global_monthly_email_threshold() {
            let sent = self
                .store
                .global_count(EventKind::EmailSent, MONTHLY_WINDOW_DAYS)
                .await?;
            debug!(sent, threshold, "global monthly email volume");
            if sent >= threshold {
                info!(sent, threshold, "global monthly email breaker tripped");
                return Ok(Some(AbuseSignal::new(
                    Scope::GlobalEmail,
                    Remedy::SolveCaptcha,
                    "Monthly email limit reached, please solve the captcha",
                )));
            }
        }

        Ok(None)
    }
}
