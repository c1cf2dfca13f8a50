//! Outgoing email throttling (verification and recovery mails).

use super::clock::Clock;
use super::global::GlobalAbuseGuard;
use super::settings::SecuritySettings;
use super::signal::{AbuseSignal, Scope};
use super::store::{EventKind, RequestEventStore, StoreError, normalize_identity};
use super::tiers;
use std::{net::IpAddr, sync::Arc};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct EmailAbuseGuard {
    settings: Arc<SecuritySettings>,
    store: Arc<dyn RequestEventStore>,
    clock: Arc<dyn Clock>,
    global: GlobalAbuseGuard,
}

impl EmailAbuseGuard {
    #[must_use]
    pub fn new(
        settings: Arc<SecuritySettings>,
        store: Arc<dyn RequestEventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let global = GlobalAbuseGuard::new(settings.clone(), store.clone());
        Self {
            settings,
            store,
            clock,
            global,
        }
    }

    /// Decide whether another email may be sent to `identity` on behalf of
    /// `network_address`. Unknown (empty) identities are never throttled.
    ///
    /// # Errors
    /// Returns `StoreError` if the event store can't be read.
    #[instrument(skip(self))]
    pub async fn check_email(
        &self,
        identity: &str,
        network_address: IpAddr,
    ) -> Result<Option<AbuseSignal>, StoreError> {
        if !self.settings.throttle_email_enabled() {
            return Ok(None);
        }
        let Some(identity) = normalize_identity(identity) else {
            return Ok(None);
        };
        let identity = identity.as_str();

        let window = self.settings.timespan_seconds();
        let identity_sent = self
            .store
            .count_events(Some(identity), None, EventKind::EmailSent, window)
            .await?;
        let ip_sent = self
            .store
            .count_events(None, Some(network_address), EventKind::EmailSent, window)
            .await?;

        debug!(identity_sent, ip_sent, "email stats");

        let signal = tiers::evaluate(
            self.settings.email_throttle_table(),
            &[ip_sent, identity_sent],
            Scope::UserEmail,
            self.clock.as_ref(),
            self.store.most_recent_event_timestamp(
                Some(identity),
                Some(network_address),
                &EventKind::EMAIL,
            ),
        )
        .await?;

        if signal.is_some() {
            return Ok(signal);
        }

        self.global.check_global_email_volume().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;
    use crate::security::signal::Remedy;
    use crate::security::store::{MemoryEventStore, NewRequestEvent};
    use crate::security::tiers::ThrottleTable;
    use chrono::{Duration, Utc};
    use std::net::Ipv6Addr;

    const ALICE: &str = "alice@example.com";
    const IP: IpAddr = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));

    struct Fixture {
        clock: ManualClock,
        store: Arc<MemoryEventStore>,
        guard: EmailAbuseGuard,
    }

    fn fixture_with(configure: impl FnOnce(SecuritySettings) -> SecuritySettings) -> Fixture {
        let clock = ManualClock::new(Utc::now());
        let store = Arc::new(MemoryEventStore::new(Arc::new(clock.clone())));
        let login = "4:10,9:120,12:captcha".parse::<ThrottleTable>();
        let email = "5:2,10:4,20:captcha".parse::<ThrottleTable>();
        let settings = match (login, email) {
            (Ok(login), Ok(email)) => configure(SecuritySettings::new(login, email)),
            _ => panic!("valid tables"),
        };
        let guard =
            EmailAbuseGuard::new(Arc::new(settings), store.clone(), Arc::new(clock.clone()));
        Fixture {
            clock,
            store,
            guard,
        }
    }

    async fn sent(store: &MemoryEventStore, identity: &str, n: usize) -> Result<(), StoreError> {
        for _ in 0..n {
            store
                .append_event(NewRequestEvent::new(identity, IP, EventKind::EmailSent))
                .await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn twenty_emails_require_captcha_immediately() -> Result<(), StoreError> {
        let f = fixture_with(|settings| settings);
        sent(&f.store, ALICE, 20).await?;

        let signal = f.guard.check_email(ALICE, IP).await?;
        assert_eq!(signal.as_ref().map(AbuseSignal::scope), Some(Scope::UserEmail));
        assert_eq!(signal.map(|s| s.remedy()), Some(Remedy::SolveCaptcha));
        Ok(())
    }

    #[tokio::test]
    async fn delay_tiers_count_from_last_email() -> Result<(), StoreError> {
        let f = fixture_with(|settings| settings);
        sent(&f.store, ALICE, 5).await?;
        f.clock.advance(Duration::seconds(1));
        assert_eq!(
            f.guard.check_email(ALICE, IP).await?.map(|s| s.remedy()),
            Some(Remedy::WaitSeconds(1))
        );

        f.clock.advance(Duration::seconds(1));
        assert_eq!(f.guard.check_email(ALICE, IP).await?, None);

        sent(&f.store, ALICE, 5).await?;
        assert_eq!(
            f.guard.check_email(ALICE, IP).await?.map(|s| s.remedy()),
            Some(Remedy::WaitSeconds(4))
        );
        Ok(())
    }

    #[tokio::test]
    async fn login_events_are_not_counted() -> Result<(), StoreError> {
        let f = fixture_with(|settings| settings);
        for _ in 0..30 {
            f.store
                .append_event(NewRequestEvent::new(ALICE, IP, EventKind::LoginFailure))
                .await?;
        }
        assert_eq!(f.guard.check_email(ALICE, IP).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn empty_identity_or_disabled_is_never_throttled() -> Result<(), StoreError> {
        let f = fixture_with(|settings| settings);
        sent(&f.store, ALICE, 25).await?;
        assert_eq!(f.guard.check_email("", IP).await?, None);

        let disabled = fixture_with(|settings| settings.with_throttle_email(false));
        sent(&disabled.store, ALICE, 25).await?;
        assert_eq!(disabled.guard.check_email(ALICE, IP).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn falls_through_to_global_volume() -> Result<(), StoreError> {
        let f = fixture_with(|settings| settings.with_global_daily_email_threshold(Some(4)));
        for i in 0..4 {
            f.store
                .append_event(NewRequestEvent::new(
                    format!("user{i}@example.com"),
                    IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 1, i)),
                    EventKind::EmailSent,
                ))
                .await?;
        }

        let signal = f.guard.check_email(ALICE, IP).await?;
        assert_eq!(
            signal.as_ref().map(AbuseSignal::scope),
            Some(Scope::GlobalEmail)
        );
        assert_eq!(
            signal.as_ref().map(AbuseSignal::message),
            Some("Daily email limit reached, please solve the captcha")
        );
        Ok(())
    }

    #[tokio::test]
    async fn identity_case_variants_share_one_count() -> Result<(), StoreError> {
        let f = fixture_with(|settings| settings);
        for i in 0..20_u16 {
            let identity = if i % 2 == 0 {
                "Alice@Example.com"
            } else {
                "ALICE@example.com"
            };
            let ip = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, i));
            f.store
                .append_event(NewRequestEvent::new(identity, ip, EventKind::EmailSent))
                .await?;
        }

        let signal = f.guard.check_email("alice@example.com", IP).await?;
        assert_eq!(signal.map(|s| s.remedy()), Some(Remedy::SolveCaptcha));
        Ok(())
    }
}
