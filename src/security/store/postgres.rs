//! `PostgreSQL` event store.
//!
//! Timestamps come from the database (`DEFAULT NOW()`) and windows are
//! computed against `NOW()`, so every instance shares one clock.

use super::{EventKind, LoginTotals, NewRequestEvent, RequestEventStore, StoreError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgPool, Row, postgres::PgPoolOptions};
use std::{net::IpAddr, time::Duration};
use tracing::{Instrument, Span, info_span, instrument};
use uuid::Uuid;

pub const SCHEMA_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/db/sql/01_request_events.sql"
));

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a small pool to `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    /// Create the events table and its indexes if missing.
    ///
    /// # Errors
    /// Returns an error if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::Executor::execute(&self.pool, SCHEMA_SQL)
            .instrument(query_span("CREATE"))
            .await
            .context("failed to apply request_events schema")?;
        Ok(())
    }
}

fn query_span(operation: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation
    )
}

fn interval_seconds(seconds: u64) -> String {
    format!("{seconds} seconds")
}

fn interval_days(days: u32) -> String {
    format!("{days} days")
}

fn to_count(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::InvalidData(format!("negative count {value}")))
}

#[async_trait]
impl RequestEventStore for PgEventStore {
    #[instrument(skip(self))]
    async fn count_events(
        &self,
        identity: Option<&str>,
        network_address: Option<IpAddr>,
        kind: EventKind,
        since_seconds: u64,
    ) -> Result<u64, StoreError> {
        let query = r"
            SELECT COUNT(*) FROM request_events
            WHERE kind = $1
              AND occurred_at > NOW() - $2::interval
              AND ($3::text IS NULL OR identity = $3)
              AND ($4::inet IS NULL OR ip_address = $4::inet)
        ";
        let count: i64 = sqlx::query_scalar(query)
            .bind(kind.as_str())
            .bind(interval_seconds(since_seconds))
            .bind(identity)
            .bind(network_address.map(|address| address.to_string()))
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT"))
            .await?;

        to_count(count)
    }

    #[instrument(skip(self))]
    async fn most_recent_event_timestamp(
        &self,
        identity: Option<&str>,
        network_address: Option<IpAddr>,
        kinds: &[EventKind],
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let query = r"
            SELECT MAX(occurred_at) FROM request_events
            WHERE kind = ANY($1::text[])
              AND (
                ($2::text IS NOT NULL AND identity = $2)
                OR ($3::inet IS NOT NULL AND ip_address = $3::inet)
              )
        ";
        let kinds: Vec<String> = kinds.iter().map(|kind| kind.as_str().to_string()).collect();
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(query)
            .bind(kinds)
            .bind(identity)
            .bind(network_address.map(|address| address.to_string()))
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT"))
            .await?;

        Ok(last)
    }

    #[instrument(skip(self))]
    async fn append_event(&self, event: NewRequestEvent) -> Result<(), StoreError> {
        let query = "INSERT INTO request_events (id, identity, ip_address, kind) \
                     VALUES ($1, $2, $3::inet, $4)";
        sqlx::query(query)
            .bind(Uuid::now_v7())
            .bind(&event.identity)
            .bind(event.network_address.to_string())
            .bind(event.kind.as_str())
            .execute(&self.pool)
            .instrument(query_span("INSERT"))
            .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn global_count(&self, kind: EventKind, since_days: u32) -> Result<u64, StoreError> {
        let query = "SELECT COUNT(*) FROM request_events \
                     WHERE kind = $1 AND occurred_at > NOW() - $2::interval";
        let count: i64 = sqlx::query_scalar(query)
            .bind(kind.as_str())
            .bind(interval_days(since_days))
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT"))
            .await?;

        to_count(count)
    }

    #[instrument(skip(self))]
    async fn global_login_totals(&self, since_days: u32) -> Result<LoginTotals, StoreError> {
        let query = r"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE kind = 'login_failure') AS failures
            FROM request_events
            WHERE kind IN ('login_success', 'login_failure')
              AND occurred_at > NOW() - $1::interval
        ";
        let row = sqlx::query(query)
            .bind(interval_days(since_days))
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT"))
            .await?;

        Ok(LoginTotals {
            total: to_count(row.try_get("total")?)?,
            failures: to_count(row.try_get("failures")?)?,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self.pool.acquire().instrument(acquire_span).await?;

        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await?;

        Ok(())
    }
}
