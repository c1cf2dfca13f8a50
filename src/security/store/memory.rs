//! In-process event store, timestamped by an injected clock.

use super::{EventKind, LoginTotals, NewRequestEvent, RequestEvent, RequestEventStore, StoreError};
use crate::security::clock::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
pub struct MemoryEventStore {
    clock: Arc<dyn Clock>,
    events: RwLock<Vec<RequestEvent>>,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryEventStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            events: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count_since<F>(&self, cutoff: DateTime<Utc>, predicate: F) -> u64
    where
        F: Fn(&RequestEvent) -> bool,
    {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        let count = events
            .iter()
            .filter(|event| event.occurred_at > cutoff && predicate(event))
            .count();
        u64::try_from(count).unwrap_or(u64::MAX)
    }

    fn cutoff(&self, window: Duration) -> DateTime<Utc> {
        self.clock
            .now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn cutoff_seconds(&self, seconds: u64) -> DateTime<Utc> {
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        self.cutoff(Duration::try_seconds(seconds).unwrap_or(Duration::MAX))
    }

    fn cutoff_days(&self, days: u32) -> DateTime<Utc> {
        self.cutoff(Duration::days(i64::from(days)))
    }
}

#[async_trait]
impl RequestEventStore for MemoryEventStore {
    async fn count_events(
        &self,
        identity: Option<&str>,
        network_address: Option<IpAddr>,
        kind: EventKind,
        since_seconds: u64,
    ) -> Result<u64, StoreError> {
        let cutoff = self.cutoff_seconds(since_seconds);
        Ok(self.count_since(cutoff, |event| {
            event.kind == kind
                && identity.is_none_or(|identity| event.identity == identity)
                && network_address.is_none_or(|address| event.network_address == address)
        }))
    }

    async fn most_recent_event_timestamp(
        &self,
        identity: Option<&str>,
        network_address: Option<IpAddr>,
        kinds: &[EventKind],
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        Ok(events
            .iter()
            .filter(|event| kinds.contains(&event.kind))
            .filter(|event| {
                identity.is_some_and(|identity| event.identity == identity)
                    || network_address.is_some_and(|address| event.network_address == address)
            })
            .map(|event| event.occurred_at)
            .max())
    }

    async fn append_event(&self, event: NewRequestEvent) -> Result<(), StoreError> {
        let recorded = RequestEvent {
            identity: event.identity,
            network_address: event.network_address,
            kind: event.kind,
            occurred_at: self.clock.now(),
        };
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(recorded);
        Ok(())
    }

    async fn global_count(&self, kind: EventKind, since_days: u32) -> Result<u64, StoreError> {
        let cutoff = self.cutoff_days(since_days);
        Ok(self.count_since(cutoff, |event| event.kind == kind))
    }

    async fn global_login_totals(&self, since_days: u32) -> Result<LoginTotals, StoreError> {
        let cutoff = self.cutoff_days(since_days);
        let total = self.count_since(cutoff, |event| EventKind::LOGIN.contains(&event.kind));
        let failures = self.count_since(cutoff, |event| event.kind == EventKind::LoginFailure);
        Ok(LoginTotals { total, failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;
    use std::net::Ipv4Addr;

    const ALICE: &str = "alice@example.com";
    const BOB: &str = "bob@example.com";
    const IP_A: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
    const IP_B: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2));

    fn store() -> (ManualClock, MemoryEventStore) {
        let clock = ManualClock::new(Utc::now());
        let store = MemoryEventStore::new(Arc::new(clock.clone()));
        (clock, store)
    }

    #[tokio::test]
    async fn counts_respect_filters_and_window() -> Result<(), StoreError> {
        let (clock, store) = store();
        store
            .append_event(NewRequestEvent::new(ALICE, IP_A, EventKind::LoginFailure))
            .await?;
        clock.advance(Duration::seconds(100));
        store
            .append_event(NewRequestEvent::new(ALICE, IP_B, EventKind::LoginFailure))
            .await?;
        store
            .append_event(NewRequestEvent::new(BOB, IP_A, EventKind::LoginSuccess))
            .await?;

        let failure = EventKind::LoginFailure;
        assert_eq!(store.count_events(Some(ALICE), None, failure, 3600).await?, 2);
        assert_eq!(store.count_events(None, Some(IP_A), failure, 3600).await?, 1);
        assert_eq!(
            store.count_events(Some(ALICE), Some(IP_B), failure, 3600).await?,
            1
        );
        assert_eq!(store.count_events(Some(BOB), None, failure, 3600).await?, 0);
        // the first failure is exactly 100s old and falls out of a 100s window
        assert_eq!(store.count_events(Some(ALICE), None, failure, 100).await?, 1);
        assert_eq!(store.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn most_recent_matches_identity_or_address() -> Result<(), StoreError> {
        let (clock, store) = store();
        store
            .append_event(NewRequestEvent::new(ALICE, IP_A, EventKind::LoginFailure))
            .await?;
        let first = clock.now();
        clock.advance(Duration::seconds(5));
        store
            .append_event(NewRequestEvent::new(BOB, IP_A, EventKind::EmailSent))
            .await?;
        let second = clock.now();

        let login = store
            .most_recent_event_timestamp(Some(BOB), Some(IP_A), &EventKind::LOGIN)
            .await?;
        assert_eq!(login, Some(first));

        let email = store
            .most_recent_event_timestamp(Some(BOB), None, &EventKind::EMAIL)
            .await?;
        assert_eq!(email, Some(second));

        let none = store
            .most_recent_event_timestamp(Some(BOB), Some(IP_B), &EventKind::LOGIN)
            .await?;
        assert_eq!(none, None);
        Ok(())
    }

    #[tokio::test]
    async fn global_totals_use_day_window() -> Result<(), StoreError> {
        let (clock, store) = store();
        store
            .append_event(NewRequestEvent::new(ALICE, IP_A, EventKind::LoginFailure))
            .await?;
        clock.advance(Duration::days(2));
        store
            .append_event(NewRequestEvent::new(ALICE, IP_A, EventKind::LoginFailure))
            .await?;
        store
            .append_event(NewRequestEvent::new(BOB, IP_B, EventKind::LoginSuccess))
            .await?;
        store
            .append_event(NewRequestEvent::new(BOB, IP_B, EventKind::EmailSent))
            .await?;

        assert_eq!(
            store.global_login_totals(30).await?,
            LoginTotals {
                total: 3,
                failures: 2
            }
        );
        assert_eq!(
            store.global_login_totals(1).await?,
            LoginTotals {
                total: 2,
                failures: 1
            }
        );
        assert_eq!(store.global_count(EventKind::EmailSent, 1).await?, 1);
        Ok(())
    }
}
