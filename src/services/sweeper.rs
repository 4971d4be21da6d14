//! Background expiry sweeps.
//!
//! Two periodic corrections keep advisory state from pinning inventory
//! forever: pending purchases whose provider never answered move to
//! expired, and reservations past their TTL are cancelled. Both sweeps
//! are plain guarded updates, safe to run concurrently with live
//! traffic.

use sea_query::{Expr, Query, SqliteQueryBuilder};
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::config::{Limits, SweeperConfig};
use crate::error::Result;
use crate::model::{PaymentStatus, ReservationStatus};
use crate::storage::schema::{Purchases, TicketReservations};

use super::now_string;

/// Move purchases stuck pending past the TTL to expired.
///
/// Only pending rows transition; terminal states are never touched.
pub async fn expire_pending_purchases(pool: &SqlitePool, ttl_secs: i64) -> Result<u64> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(ttl_secs)).to_rfc3339();

    let query = Query::update()
        .table(Purchases::Table)
        .value(Purchases::PaymentStatus, PaymentStatus::Expired.as_str())
        .and_where(Expr::col(Purchases::PaymentStatus).eq(PaymentStatus::Pending.as_str()))
        .and_where(Expr::col(Purchases::CreatedAt).lt(cutoff))
        .to_string(SqliteQueryBuilder);

    let result = sqlx::query(&query).execute(pool).await?;
    Ok(result.rows_affected())
}

/// Cancel reservations whose hold window has lapsed.
pub async fn purge_expired_reservations(pool: &SqlitePool) -> Result<u64> {
    let query = Query::update()
        .table(TicketReservations::Table)
        .value(
            TicketReservations::Status,
            ReservationStatus::Cancelled.as_str(),
        )
        .and_where(Expr::col(TicketReservations::Status).eq(ReservationStatus::Reserved.as_str()))
        .and_where(Expr::col(TicketReservations::ExpiresAt).lt(now_string()))
        .to_string(SqliteQueryBuilder);

    let result = sqlx::query(&query).execute(pool).await?;
    Ok(result.rows_affected())
}

/// Periodic driver for the expiry sweeps.
pub struct Sweeper {
    pool: SqlitePool,
    config: SweeperConfig,
    limits: Limits,
}

impl Sweeper {
    pub fn new(pool: SqlitePool, config: SweeperConfig, limits: Limits) -> Self {
        Self {
            pool,
            config,
            limits,
        }
    }

    /// Run one sweep pass and report (expired purchases, purged holds).
    pub async fn sweep_once(&self) -> Result<(u64, u64)> {
        let purchases =
            expire_pending_purchases(&self.pool, self.limits.pending_purchase_ttl_secs).await?;
        let reservations = purge_expired_reservations(&self.pool).await?;

        if purchases > 0 || reservations > 0 {
            info!(purchases, reservations, "expiry sweep applied");
        }
        Ok((purchases, reservations))
    }

    /// Sweep forever at the configured interval. A failed pass is
    /// logged and the next tick retries.
    pub async fn run(&self) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));
        loop {
            interval.tick().await;
            if let Err(err) = self.sweep_once().await {
                error!(error = %err, "expiry sweep failed");
            }
        }
    }
}
