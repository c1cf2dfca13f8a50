use crate::cli::{
    actions::{Action, server::Args},
    commands::{ARG_DSN, ARG_PORT, captcha, throttle},
};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .filter(|v| !v.trim().is_empty())
        .context("missing required argument: --dsn")?;

    let settings = throttle::Options::parse(matches)?
        .into_settings()
        .context("invalid throttle configuration")?;
    let captcha = captcha::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        settings,
        captcha,
    }))
}
