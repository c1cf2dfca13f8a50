use crate::security::{SecuritySettings, SettingsError, ThrottleTable};
use anyhow::Context;
use clap::{Arg, ArgMatches, Command, builder::ValueParser};

pub const ARG_TIMESPAN_SECONDS: &str = "timespan-seconds";
pub const ARG_LOGIN_THROTTLE: &str = "login-throttle";
pub const ARG_EMAIL_THROTTLE: &str = "email-throttle";
pub const ARG_GLOBAL_DAILY_EMAIL_THRESHOLD: &str = "global-daily-email-threshold";
pub const ARG_GLOBAL_MONTHLY_EMAIL_THRESHOLD: &str = "global-monthly-email-threshold";
pub const ARG_LOGIN_FAILURE_PERCENTAGE: &str = "login-failure-percentage";
pub const ARG_GLOBAL_LOGIN_LOOKBACK_DAYS: &str = "global-login-lookback-days";
pub const ARG_THROTTLE_LOGIN: &str = "throttle-login";
pub const ARG_THROTTLE_EMAIL: &str = "throttle-email";

#[derive(Debug, Clone)]
pub struct Options {
    pub timespan_seconds: u64,
    pub login_throttle: ThrottleTable,
    pub email_throttle: ThrottleTable,
    pub global_daily_email_threshold: Option<u64>,
    pub global_monthly_email_threshold: Option<u64>,
    pub login_failure_percentage: f64,
    pub global_login_lookback_days: u32,
    pub throttle_login: bool,
    pub throttle_email: bool,
}

impl Options {
    /// Parse throttle arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a table or numeric value is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let table = |id: &str| -> anyhow::Result<ThrottleTable> {
            matches
                .get_one::<ThrottleTable>(id)
                .cloned()
                .with_context(|| format!("missing required argument: --{id}"))
        };

        Ok(Self {
            timespan_seconds: matches
                .get_one::<u64>(ARG_TIMESPAN_SECONDS)
                .copied()
                .with_context(|| format!("missing required argument: --{ARG_TIMESPAN_SECONDS}"))?,
            login_throttle: table(ARG_LOGIN_THROTTLE)?,
            email_throttle: table(ARG_EMAIL_THROTTLE)?,
            global_daily_email_threshold: matches
                .get_one::<u64>(ARG_GLOBAL_DAILY_EMAIL_THRESHOLD)
                .copied(),
            global_monthly_email_threshold: matches
                .get_one::<u64>(ARG_GLOBAL_MONTHLY_EMAIL_THRESHOLD)
                .copied(),
            login_failure_percentage: matches
                .get_one::<f64>(ARG_LOGIN_FAILURE_PERCENTAGE)
                .copied()
                .with_context(|| {
                    format!("missing required argument: --{ARG_LOGIN_FAILURE_PERCENTAGE}")
                })?,
            global_login_lookback_days: matches
                .get_one::<u32>(ARG_GLOBAL_LOGIN_LOOKBACK_DAYS)
                .copied()
                .with_context(|| {
                    format!("missing required argument: --{ARG_GLOBAL_LOGIN_LOOKBACK_DAYS}")
                })?,
            throttle_login: matches
                .get_one::<bool>(ARG_THROTTLE_LOGIN)
                .copied()
                .unwrap_or(true),
            throttle_email: matches
                .get_one::<bool>(ARG_THROTTLE_EMAIL)
                .copied()
                .unwrap_or(true),
        })
    }

    /// Build the validated settings shared by the guards.
    ///
    /// # Errors
    /// Returns `SettingsError` if a value is out of range.
    pub fn into_settings(self) -> Result<SecuritySettings, SettingsError> {
        SecuritySettings::new(self.login_throttle, self.email_throttle)
            .with_timespan_seconds(self.timespan_seconds)
            .with_global_daily_email_threshold(self.global_daily_email_threshold)
            .with_global_monthly_email_threshold(self.global_monthly_email_threshold)
            .with_login_failure_percentage(self.login_failure_percentage)
            .with_global_login_lookback_days(self.global_login_lookback_days)
            .with_throttle_login(self.throttle_login)
            .with_throttle_email(self.throttle_email)
            .validate()
    }
}

#[must_use]
pub fn validator_throttle_table() -> ValueParser {
    ValueParser::from(move |value: &str| -> std::result::Result<ThrottleTable, String> {
        value.parse::<ThrottleTable>().map_err(|err| err.to_string())
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_table_args(command);
    with_global_args(command)
}

fn with_table_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TIMESPAN_SECONDS)
                .long(ARG_TIMESPAN_SECONDS)
                .help("Rolling window, in seconds, used to count events per identity and address")
                .env("VIGIL_TIMESPAN_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_THROTTLE)
                .long(ARG_LOGIN_THROTTLE)
                .help("Login throttle tiers as threshold:seconds or threshold:captcha pairs")
                .env("VIGIL_LOGIN_THROTTLE")
                .default_value("4:10,9:120,12:captcha")
                .value_parser(validator_throttle_table()),
        )
        .arg(
            Arg::new(ARG_EMAIL_THROTTLE)
                .long(ARG_EMAIL_THROTTLE)
                .help("Email throttle tiers as threshold:seconds or threshold:captcha pairs")
                .env("VIGIL_EMAIL_THROTTLE")
                .default_value("5:60,10:300,20:captcha")
                .value_parser(validator_throttle_table()),
        )
        .arg(
            Arg::new(ARG_THROTTLE_LOGIN)
                .long(ARG_THROTTLE_LOGIN)
                .help("Enable login throttling")
                .env("VIGIL_THROTTLE_LOGIN")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_THROTTLE_EMAIL)
                .long(ARG_THROTTLE_EMAIL)
                .help("Enable email throttling")
                .env("VIGIL_THROTTLE_EMAIL")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
}

fn with_global_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GLOBAL_DAILY_EMAIL_THRESHOLD)
                .long(ARG_GLOBAL_DAILY_EMAIL_THRESHOLD)
                .help("Emails per day, across all users, after which a captcha is required")
                .env("VIGIL_GLOBAL_DAILY_EMAIL_THRESHOLD")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_GLOBAL_MONTHLY_EMAIL_THRESHOLD)
                .long(ARG_GLOBAL_MONTHLY_EMAIL_THRESHOLD)
                .help("Emails per 30 days, across all users, after which a captcha is required")
                .env("VIGIL_GLOBAL_MONTHLY_EMAIL_THRESHOLD")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_FAILURE_PERCENTAGE)
                .long(ARG_LOGIN_FAILURE_PERCENTAGE)
                .help("Share of failed logins, in percent, that requires a captcha from everyone")
                .env("VIGIL_LOGIN_FAILURE_PERCENTAGE")
                .default_value("5")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new(ARG_GLOBAL_LOGIN_LOOKBACK_DAYS)
                .long(ARG_GLOBAL_LOGIN_LOOKBACK_DAYS)
                .help("Days of login history used for the failure percentage")
                .env("VIGIL_GLOBAL_LOGIN_LOOKBACK_DAYS")
                .default_value("30")
                .value_parser(clap::value_parser!(u32)),
        )
}
