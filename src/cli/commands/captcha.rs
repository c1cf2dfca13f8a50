use crate::security::captcha::DEFAULT_VERIFY_URL;
use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;
use url::Url;

pub const ARG_CAPTCHA_SECRET: &str = "captcha-secret";
pub const ARG_CAPTCHA_VERIFY_URL: &str = "captcha-verify-url";
pub const ARG_CAPTCHA_TIMEOUT_SECONDS: &str = "captcha-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub secret: Option<SecretString>,
    pub verify_url: Url,
    pub timeout: Duration,
}

impl Options {
    /// Parse CAPTCHA provider arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the verify URL is invalid.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // An empty env var disables the provider just like an unset one
        let secret = matches
            .get_one::<String>(ARG_CAPTCHA_SECRET)
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.clone()));

        let verify_url = matches
            .get_one::<String>(ARG_CAPTCHA_VERIFY_URL)
            .map_or(DEFAULT_VERIFY_URL, String::as_str);
        let verify_url = Url::parse(verify_url)
            .with_context(|| format!("invalid --{ARG_CAPTCHA_VERIFY_URL}: {verify_url}"))?;

        let timeout = matches
            .get_one::<u64>(ARG_CAPTCHA_TIMEOUT_SECONDS)
            .copied()
            .unwrap_or(5);

        Ok(Self {
            secret,
            verify_url,
            timeout: Duration::from_secs(timeout),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CAPTCHA_SECRET)
                .long(ARG_CAPTCHA_SECRET)
                .help("CAPTCHA provider secret; without it every captcha token is rejected")
                .env("VIGIL_CAPTCHA_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_CAPTCHA_VERIFY_URL)
                .long(ARG_CAPTCHA_VERIFY_URL)
                .help("CAPTCHA provider siteverify endpoint")
                .env("VIGIL_CAPTCHA_VERIFY_URL")
                .default_value(DEFAULT_VERIFY_URL),
        )
        .arg(
            Arg::new(ARG_CAPTCHA_TIMEOUT_SECONDS)
                .long(ARG_CAPTCHA_TIMEOUT_SECONDS)
                .help("Timeout for the CAPTCHA provider call in seconds")
                .env("VIGIL_CAPTCHA_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn command() -> Command {
        with_args(Command::new("vigil"))
    }

    #[test]
    fn defaults_disable_provider() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("VIGIL_CAPTCHA_SECRET", None::<&str>),
                ("VIGIL_CAPTCHA_VERIFY_URL", None),
                ("VIGIL_CAPTCHA_TIMEOUT_SECONDS", None),
            ],
            || {
                let matches = command().try_get_matches_from(vec!["vigil"])?;
                let options = Options::parse(&matches)?;
                assert!(options.secret.is_none());
                assert_eq!(options.verify_url.as_str(), DEFAULT_VERIFY_URL);
                assert_eq!(options.timeout, Duration::from_secs(5));
                Ok(())
            },
        )
    }

    #[test]
    fn empty_secret_is_unset() -> anyhow::Result<()> {
        temp_env::with_vars([("VIGIL_CAPTCHA_SECRET", Some("  "))], || {
            let matches = command().try_get_matches_from(vec!["vigil"])?;
            assert!(Options::parse(&matches)?.secret.is_none());
            Ok(())
        })
    }

    #[test]
    fn env_configures_provider() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("VIGIL_CAPTCHA_SECRET", Some("s3cr3t")),
                (
                    "VIGIL_CAPTCHA_VERIFY_URL",
                    Some("https://challenges.cloudflare.com/turnstile/v0/siteverify"),
                ),
                ("VIGIL_CAPTCHA_TIMEOUT_SECONDS", Some("2")),
            ],
            || {
                let matches = command().try_get_matches_from(vec!["vigil"])?;
                let options = Options::parse(&matches)?;
                assert_eq!(
                    options.secret.as_ref().map(|s| s.expose_secret().to_string()),
                    Some("s3cr3t".to_string())
                );
                assert_eq!(
                    options.verify_url.host_str(),
                    Some("challenges.cloudflare.com")
                );
                assert_eq!(options.timeout, Duration::from_secs(2));
                Ok(())
            },
        )
    }

    #[test]
    fn invalid_url_is_an_error() -> anyhow::Result<()> {
        temp_env::with_vars([("VIGIL_CAPTCHA_VERIFY_URL", None::<&str>)], || {
            let matches = command().try_get_matches_from(vec![
                "vigil",
                "--captcha-verify-url",
                "not a url",
            ])?;
            assert!(Options::parse(&matches).is_err());
            Ok(())
        })
    }
}
