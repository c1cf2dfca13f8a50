//! `-v` / `VIGIL_LOG_LEVEL`.

use clap::{Arg, ArgAction, ArgMatches, Command, builder::ValueParser};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

/// Indexed by verbosity count.
const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accepts a level name (any case) or a verbosity count.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|raw: &str| -> Result<u8, String> {
        let raw = raw.trim();
        let index = match raw.parse::<usize>() {
            Ok(count) => Some(count).filter(|count| *count < LEVEL_NAMES.len()),
            Err(_) => LEVEL_NAMES
                .iter()
                .position(|name| name.eq_ignore_ascii_case(raw)),
        };

        index
            .and_then(|index| u8::try_from(index).ok())
            .ok_or_else(|| {
                format!(
                    "invalid log level `{raw}`, expected 0-4 or one of: {}",
                    LEVEL_NAMES.join(", ")
                )
            })
    })
}

/// Tracing level for a verbosity count. `None` leaves the subscriber's
/// default `error` filter in place.
#[must_use]
pub const fn level(verbosity: u8) -> Option<Level> {
    match verbosity {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

#[must_use]
pub fn verbosity(matches: &ArgMatches) -> Option<Level> {
    level(matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Log level: repeat -v, or set error, warn, info, debug or trace")
            .env("VIGIL_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}
