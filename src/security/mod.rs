//! Request abuse throttling.
//!
//! Guards read the recent history of login attempts and outgoing emails from a
//! [`RequestEventStore`] and answer with an optional [`AbuseSignal`]. The
//! [`SecurityCheck`] facade combines those guards with a [`CaptchaVerifier`]
//! so callers get a single allow/deny answer.

pub mod captcha;
pub mod check;
pub mod clock;
pub mod email;
pub mod global;
pub mod login;
pub mod settings;
pub mod signal;
pub mod store;
pub mod tiers;

pub use self::captcha::{CaptchaVerifier, DisabledCaptcha, SiteVerifyCaptcha};
pub use self::check::{Allowed, CheckError, SecurityCheck};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::email::EmailAbuseGuard;
pub use self::global::GlobalAbuseGuard;
pub use self::login::LoginAbuseGuard;
pub use self::settings::{SecuritySettings, SettingsError};
pub use self::signal::{AbuseSignal, Remedy, Scope};
pub use self::store::{
    EventKind, MemoryEventStore, NewRequestEvent, PgEventStore, RequestEventStore, StoreError,
};
pub use self::tiers::{ThrottleTable, ThrottleTier, TierAction, TierError};
