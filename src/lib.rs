//! # Vigil (Login & Email Abuse Throttling)
//!
//! `vigil` decides whether a login attempt or an outgoing verification email
//! should be allowed right now. It keeps an append-only log of request events
//! (`login_success`, `login_failure`, `email_sent`) and reacts to abuse with
//! escalating throttle tiers.
//!
//! ## Throttle Tiers
//!
//! Each flow has a table such as `4:10,9:120,12:captcha`. Counts are taken per
//! identity and per network address over a rolling window. The highest tier
//! reached by either count wins:
//!
//! - **Delay tiers** ask the client to wait until the cooldown, measured from
//!   the most recent event, has elapsed.
//! - **CAPTCHA tiers** ask for a solved challenge.
//!
//! ## Global Breakers
//!
//! When no local tier applies, site-wide checks still run:
//!
//! - **Login ratio:** failures reaching a percentage of all logins over the
//!   lookback window require a CAPTCHA from everyone.
//! - **Email volume:** optional daily and monthly caps on sent emails.
//!
//! ## CAPTCHA Bypass
//!
//! A solved CAPTCHA lifts a login signal after the guard has run. For emails
//! the CAPTCHA is checked first and a valid token skips the guard.

pub mod api;
pub mod cli;
pub mod security;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
