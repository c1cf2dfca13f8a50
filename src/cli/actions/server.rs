use crate::{
    api,
    cli::commands::captcha,
    security::{
        CaptchaVerifier, DisabledCaptcha, PgEventStore, RequestEventStore, SecurityCheck,
        SecuritySettings, SiteVerifyCaptcha, SystemClock,
    },
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub settings: SecuritySettings,
    pub captcha: captcha::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the schema can't be
/// applied, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let store = PgEventStore::connect(&args.dsn).await?;
    store.ensure_schema().await?;
    let store: Arc<dyn RequestEventStore> = Arc::new(store);

    let verifier: Arc<dyn CaptchaVerifier> = match args.captcha.secret {
        Some(secret) => Arc::new(
            SiteVerifyCaptcha::new(secret, args.captcha.verify_url, args.captcha.timeout)
                .context("Could not build captcha verifier")?,
        ),
        None => {
            warn!("No captcha secret configured, captcha tokens will be rejected");
            Arc::new(DisabledCaptcha)
        }
    };

    let check = Arc::new(SecurityCheck::new(
        Arc::new(args.settings),
        store.clone(),
        verifier,
        Arc::new(SystemClock),
    ));

    api::new(args.port, store, check).await
}

fn log_startup_args(args: &Args) {
    let settings = &args.settings;
    let optional = |value: Option<u64>| value.map_or_else(|| "off".to_string(), |v| v.to_string());

    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("timespan_seconds", settings.timespan_seconds().to_string()),
        (
            "login_throttle",
            if settings.throttle_login_enabled() {
                settings.login_throttle_table().to_string()
            } else {
                "off".to_string()
            },
        ),
        (
            "email_throttle",
            if settings.throttle_email_enabled() {
                settings.email_throttle_table().to_string()
            } else {
                "off".to_string()
            },
        ),
        (
            "login_failure_percentage",
            settings.login_failure_percentage().to_string(),
        ),
        (
            "global_login_lookback_days",
            settings.global_login_lookback_days().to_string(),
        ),
        (
            "global_daily_email_threshold",
            optional(settings.global_daily_email_threshold()),
        ),
        (
            "global_monthly_email_threshold",
            optional(settings.global_monthly_email_threshold()),
        ),
        ("captcha_verify_url", args.captcha.verify_url.to_string()),
        ("captcha_secret_set", args.captcha.secret.is_some().to_string()),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} - {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
