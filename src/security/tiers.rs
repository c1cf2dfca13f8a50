//! Escalating throttle tiers.
//!
//! A table is written as comma separated `threshold:action` pairs, where the
//! action is either a delay in seconds or the literal `captcha`:
//!
//! ```text
//! 4:10,9:120,12:captcha
//! ```
//!
//! Tiers are kept sorted by threshold, highest first, so evaluation always
//! starts with the most severe tier.

use super::clock::Clock;
use super::signal::{AbuseSignal, Scope};
use super::store::StoreError;
use chrono::{DateTime, Utc};
use std::{collections::HashSet, fmt, future::Future, str::FromStr};
use tracing::{debug, info};

const CAPTCHA_MARKER: &str = "captcha";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TierAction {
    Delay { seconds: u64 },
    CaptchaRequired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleTier {
    pub threshold: u64,
    pub action: TierAction,
}

impl ThrottleTier {
    #[must_use]
    pub const fn delay(threshold: u64, seconds: u64) -> Self {
        Self {
            threshold,
            action: TierAction::Delay { seconds },
        }
    }

    #[must_use]
    pub const fn captcha(threshold: u64) -> Self {
        Self {
            threshold,
            action: TierAction::CaptchaRequired,
        }
    }

    /// A zero count never trips a tier.
    fn is_met_by(&self, count: u64) -> bool {
        count != 0 && count >= self.threshold
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TierError {
    #[error("throttle table is empty")]
    Empty,
    #[error("invalid tier '{0}', expected threshold:seconds or threshold:captcha")]
    Malformed(String),
    #[error("tier threshold must be greater than zero")]
    ZeroThreshold,
    #[error("tier delay must be greater than zero (threshold {0})")]
    ZeroDelay(u64),
    #[error("duplicate tier threshold {0}")]
    DuplicateThreshold(u64),
}

/// Ordered, immutable set of tiers with unique thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThrottleTable {
    tiers: Vec<ThrottleTier>,
}

impl ThrottleTable {
    /// Build a table, sorting the tiers highest threshold first.
    ///
    /// # Errors
    /// Returns `TierError` if the table is empty, a threshold repeats, or a
    /// threshold or delay is zero.
    pub fn new(tiers: impl IntoIterator<Item = ThrottleTier>) -> Result<Self, TierError> {
        let mut tiers: Vec<ThrottleTier> = tiers.into_iter().collect();
        if tiers.is_empty() {
            return Err(TierError::Empty);
        }

        let mut seen = HashSet::with_capacity(tiers.len());
        for tier in &tiers {
            if tier.threshold == 0 {
                return Err(TierError::ZeroThreshold);
            }
            if tier.action == (TierAction::Delay { seconds: 0 }) {
                return Err(TierError::ZeroDelay(tier.threshold));
            }
            if !seen.insert(tier.threshold) {
                return Err(TierError::DuplicateThreshold(tier.threshold));
            }
        }

        tiers.sort_by(|a, b| b.threshold.cmp(&a.threshold));

        Ok(Self { tiers })
    }

    #[must_use]
    pub fn tiers(&self) -> &[ThrottleTier] {
        &self.tiers
    }

    /// First tier, highest threshold first, met by any of the given counts.
    #[must_use]
    pub fn first_met(&self, counts: &[u64]) -> Option<&ThrottleTier> {
        self.tiers
            .iter()
            .find(|tier| counts.iter().any(|&count| tier.is_met_by(count)))
    }
}

impl FromStr for ThrottleTable {
    type Err = TierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let tiers = value
            .split(',')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(parse_tier)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(tiers)
    }
}

impl fmt::Display for ThrottleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Written lowest threshold first, the way operators usually configure it.
        let pairs: Vec<String> = self
            .tiers
            .iter()
            .rev()
            .map(|tier| match tier.action {
                TierAction::Delay { seconds } => format!("{}:{seconds}", tier.threshold),
                TierAction::CaptchaRequired => format!("{}:{CAPTCHA_MARKER}", tier.threshold),
            })
            .collect();
        f.write_str(&pairs.join(","))
    }
}

fn parse_tier(pair: &str) -> Result<ThrottleTier, TierError> {
    let malformed = || TierError::Malformed(pair.to_string());

    let (threshold, action) = pair.split_once(':').ok_or_else(malformed)?;
    let threshold = threshold.trim().parse::<u64>().map_err(|_| malformed())?;
    let action = action.trim();

    if action.eq_ignore_ascii_case(CAPTCHA_MARKER) {
        return Ok(ThrottleTier::captcha(threshold));
    }

    let seconds = action.parse::<u64>().map_err(|_| malformed())?;
    Ok(ThrottleTier::delay(threshold, seconds))
}

/// Seconds left on a delay tier, or `None` once the cooldown has elapsed.
///
/// The result never exceeds `delay_seconds`, even if `last_event` lies in the
/// future relative to `now`.
#[must_use]
pub fn remaining_cooldown(
    delay_seconds: u64,
    last_event: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<u64> {
    let delay = i64::try_from(delay_seconds).unwrap_or(i64::MAX);
    let elapsed = now.signed_duration_since(last_event).num_seconds().max(0);

    if elapsed < delay {
        u64::try_from(delay - elapsed).ok()
    } else {
        None
    }
}

/// Run the tier table against the observed counts.
///
/// `last_event` is only awaited when a delay tier is met. A met delay tier
/// whose cooldown has elapsed ends the evaluation without a signal, lower
/// tiers are not consulted.
pub(crate) async fn evaluate<F>(
    table: &ThrottleTable,
    counts: &[u64],
    scope: Scope,
    clock: &dyn Clock,
    last_event: F,
) -> Result<Option<AbuseSignal>, StoreError>
where
    F: Future<Output = Result<Option<DateTime<Utc>>, StoreError>>,
{
    let Some(tier) = table.first_met(counts) else {
        return Ok(None);
    };

    match tier.action {
        TierAction::CaptchaRequired => {
            info!(%scope, threshold = tier.threshold, "captcha tier reached");
            Ok(Some(AbuseSignal::captcha(scope)))
        }
        TierAction::Delay { seconds } => {
            let Some(last) = last_event.await? else {
                debug!(%scope, threshold = tier.threshold, "no previous event, cooldown skipped");
                return Ok(None);
            };

            match remaining_cooldown(seconds, last, clock.now()) {
                Some(remaining) => {
                    info!(
                        %scope,
                        threshold = tier.threshold,
                        remaining,
                        "delay tier reached"
                    );
                    Ok(Some(AbuseSignal::wait(scope, remaining)))
                }
                None => {
                    debug!(%scope, threshold = tier.threshold, "cooldown elapsed");
                    Ok(None)
                }
            }
        }
    }
}
