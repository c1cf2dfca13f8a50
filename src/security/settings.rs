//! Process-wide throttling configuration.

use super::tiers::ThrottleTable;

const DEFAULT_TIMESPAN_SECONDS: u64 = 60 * 60;
const DEFAULT_LOGIN_FAILURE_PERCENTAGE: f64 = 5.0;
const DEFAULT_GLOBAL_LOGIN_LOOKBACK_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("login failure percentage must be within 0..=100, got {0}")]
    FailurePercentage(f64),
    #[error("timespan must be greater than zero")]
    ZeroTimespan,
    #[error("global login lookback must be at least one day")]
    ZeroLookback,
    #[error("global {0} email threshold must be greater than zero")]
    ZeroEmailThreshold(&'static str),
}

/// Read-only settings shared by every guard.
#[derive(Clone, Debug, PartialEq)]
pub struct SecuritySettings {
    timespan_seconds: u64,
    login_throttle_table: ThrottleTable,
    email_throttle_table: ThrottleTable,
    global_daily_email_threshold: Option<u64>,
    global_monthly_email_threshold: Option<u64>,
    login_failure_percentage: f64,
    global_login_lookback_days: u32,
    throttle_login_enabled: bool,
    throttle_email_enabled: bool,
}

impl SecuritySettings {
    #[must_use]
    pub fn new(login_throttle_table: ThrottleTable, email_throttle_table: ThrottleTable) -> Self {
        Self {
            timespan_seconds: DEFAULT_TIMESPAN_SECONDS,
            login_throttle_table,
            email_throttle_table,
            global_daily_email_threshold: None,
            global_monthly_email_threshold: None,
            login_failure_percentage: DEFAULT_LOGIN_FAILURE_PERCENTAGE,
            global_login_lookback_days: DEFAULT_GLOBAL_LOGIN_LOOKBACK_DAYS,
            throttle_login_enabled: true,
            throttle_email_enabled: true,
        }
    }

    #[must_use]
    pub fn with_timespan_seconds(mut self, seconds: u64) -> Self {
        self.timespan_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_global_daily_email_threshold(mut self, threshold: Option<u64>) -> Self {
        self.global_daily_email_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_global_monthly_email_threshold(mut self, threshold: Option<u64>) -> Self {
        self.global_monthly_email_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_login_failure_percentage(mut self, percentage: f64) -> Self {
        self.login_failure_percentage = percentage;
        self
    }

    #[must_use]
    pub fn with_global_login_lookback_days(mut self, days: u32) -> Self {
        self.global_login_lookback_days = days;
        self
    }

    #[must_use]
    pub fn with_throttle_login(mut self, enabled: bool) -> Self {
        self.throttle_login_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_throttle_email(mut self, enabled: bool) -> Self {
        self.throttle_email_enabled = enabled;
        self
    }

    /// Check the values the throttle tables can't check themselves.
    ///
    /// # Errors
    /// Returns `SettingsError` for out of range values.
    pub fn validate(self) -> Result<Self, SettingsError> {
        if self.timespan_seconds == 0 {
            return Err(SettingsError::ZeroTimespan);
        }
        if !(0.0..=100.0).contains(&self.login_failure_percentage) {
            return Err(SettingsError::FailurePercentage(
                self.login_failure_percentage,
            ));
        }
        if self.global_login_lookback_days == 0 {
            return Err(SettingsError::ZeroLookback);
        }
        if self.global_daily_email_threshold == Some(0) {
            return Err(SettingsError::ZeroEmailThreshold("daily"));
        }
        if self.global_monthly_email_threshold == Some(0) {
            return Err(SettingsError::ZeroEmailThreshold("monthly"));
        }
        Ok(self)
    }

    #[must_use]
    pub const fn timespan_seconds(&self) -> u64 {
        self.timespan_seconds
    }

    #[must_use]
    pub const fn login_throttle_table(&self) -> &ThrottleTable {
        &self.login_throttle_table
    }

    #[must_use]
    pub const fn email_throttle_table(&self) -> &ThrottleTable {
        &self.email_throttle_table
    }

    #[must_use]
    pub const fn global_daily_email_threshold(&self) -> Option<u64> {
        self.global_daily_email_threshold
    }

    #[must_use]
    pub const fn global_monthly_email_threshold(&self) -> Option<u64> {
        self.global_monthly_email_threshold
    }

    #[must_use]
    pub const fn login_failure_percentage(&self) -> f64 {
        self.login_failure_percentage
    }

    #[must_use]
    pub const fn global_login_lookback_days(&self) -> u32 {
        self.global_login_lookback_days
    }

    #[must_use]
    pub const fn throttle_login_enabled(&self) -> bool {
        self.throttle_login_enabled
    }

    #[must_use]
    pub const fn throttle_email_enabled(&self) -> bool {
        self.throttle_email_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::tiers::ThrottleTier;

    fn settings() -> SecuritySettings {
        let login = ThrottleTable::new([ThrottleTier::delay(4, 10), ThrottleTier::captcha(12)]);
        let email = ThrottleTable::new([ThrottleTier::delay(5, 2)]);
        match (login, email) {
            (Ok(login), Ok(email)) => SecuritySettings::new(login, email),
            _ => panic!("valid tables"),
        }
    }

    #[test]
    fn defaults() {
        let settings = settings();
        assert_eq!(settings.timespan_seconds(), 3600);
        assert_eq!(settings.global_login_lookback_days(), 30);
        assert!(settings.throttle_login_enabled());
        assert!(settings.throttle_email_enabled());
        assert_eq!(settings.global_daily_email_threshold(), None);
        assert_eq!(settings.global_monthly_email_threshold(), None);
    }

    #[test]
    fn validate_rejects_out_of_range() {
        assert_eq!(
            settings().with_login_failure_percentage(101.0).validate(),
            Err(SettingsError::FailurePercentage(101.0))
        );
        assert_eq!(
            settings().with_timespan_seconds(0).validate(),
            Err(SettingsError::ZeroTimespan)
        );
        assert_eq!(
            settings().with_global_login_lookback_days(0).validate(),
            Err(SettingsError::ZeroLookback)
        );
        assert_eq!(
            settings()
                .with_global_monthly_email_threshold(Some(0))
                .validate(),
            Err(SettingsError::ZeroEmailThreshold("monthly"))
        );
    }

    #[test]
    fn validate_accepts_configured_values() {
        let validated = settings()
            .with_global_daily_email_threshold(Some(300))
            .with_login_failure_percentage(12.5)
            .validate();
        assert!(validated.is_ok());
    }
}
