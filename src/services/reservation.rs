//! Ticket number reservations.
//!
//! Advisory, time-limited holds that keep the checkout UX honest
//! without blocking anyone. Final correctness is enforced by the
//! allocator's unique constraint, so reservation/allocation races are
//! tolerated by design.

use std::collections::HashSet;

use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::model::{format_ticket_number, Campaign, ReservationStatus};
use crate::storage::schema::{TicketReservations, Tickets};

use super::{fetch_campaign, now_string, sweeper};

/// One free number, raw and formatted.
#[derive(Debug, Clone)]
pub struct AvailableNumber {
    pub number: i64,
    pub display: String,
}

/// Availability snapshot for a campaign.
#[derive(Debug)]
pub struct Availability {
    /// Up to `limit` free numbers in ascending order.
    pub numbers: Vec<AvailableNumber>,
    pub total_tickets: i64,
    pub sold_count: i64,
    /// Active reservations held by other users.
    pub reserved_count: i64,
    /// Free numbers after removing sold and others' reservations.
    pub actual_available: i64,
    pub low_stock: bool,
    /// True when the listing was cut off at `limit`.
    pub truncated: bool,
}

pub struct ReservationManager {
    pool: SqlitePool,
    limits: Limits,
}

impl ReservationManager {
    pub fn new(pool: SqlitePool, limits: Limits) -> Self {
        Self { pool, limits }
    }

    /// Hold specific numbers for a user.
    ///
    /// Cancels the caller's previous holds for the campaign first, so a
    /// retry with the same numbers is idempotent. Numbers already sold
    /// or held by someone else are rejected with the full conflict
    /// list.
    pub async fn reserve(
        &self,
        campaign_id: i64,
        user_id: i64,
        numbers: &[i64],
    ) -> Result<Vec<String>> {
        if numbers.is_empty() || numbers.len() > self.limits.max_reserved_numbers {
            return Err(Error::Validation(format!(
                "between 1 and {} numbers may be reserved",
                self.limits.max_reserved_numbers
            )));
        }

        let mut conn = self.pool.acquire().await?;
        let campaign = fetch_campaign(&mut conn, campaign_id).await?;
        drop(conn);

        if let Some(&bad) = numbers
            .iter()
            .find(|&&n| n < 1 || n > campaign.total_tickets)
        {
            return Err(Error::Validation(format!(
                "number {bad} is outside 1..={}",
                campaign.total_tickets
            )));
        }

        sweeper::purge_expired_reservations(&self.pool).await?;
        self.cancel_user_reservations(campaign_id, user_id, None)
            .await?;

        let taken = self.taken_numbers(&campaign, user_id).await?;

        let requested: Vec<String> = numbers
            .iter()
            .map(|&n| format_ticket_number(&campaign.ticket_prefix, n, campaign.total_tickets))
            .collect();

        let conflicts: Vec<String> = requested
            .iter()
            .filter(|n| taken.contains(n.as_str()))
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            return Err(Error::Conflict { taken: conflicts });
        }

        let now = now_string();
        let expires_at = (chrono::Utc::now()
            + chrono::Duration::seconds(self.limits.reservation_ttl_secs))
        .to_rfc3339();

        for number in &requested {
            let query = Query::insert()
                .into_table(TicketReservations::Table)
                .columns([
                    TicketReservations::CampaignId,
                    TicketReservations::UserId,
                    TicketReservations::TicketNumber,
                    TicketReservations::Status,
                    TicketReservations::ExpiresAt,
                    TicketReservations::CreatedAt,
                ])
                .values_panic([
                    campaign_id.into(),
                    user_id.into(),
                    number.clone().into(),
                    ReservationStatus::Reserved.as_str().into(),
                    expires_at.clone().into(),
                    now.clone().into(),
                ])
                .on_conflict(
                    OnConflict::columns([
                        TicketReservations::CampaignId,
                        TicketReservations::TicketNumber,
                    ])
                    .update_columns([
                        TicketReservations::UserId,
                        TicketReservations::Status,
                        TicketReservations::ExpiresAt,
                    ])
                    .to_owned(),
                )
                .to_string(SqliteQueryBuilder);

            sqlx::query(&query).execute(&self.pool).await?;
        }

        debug!(
            campaign_id,
            user_id,
            count = requested.len(),
            "numbers reserved"
        );
        Ok(requested)
    }

    /// Release some or all of a user's holds for a campaign.
    ///
    /// `None` cancels every active reservation the user has there.
    pub async fn release(
        &self,
        campaign_id: i64,
        user_id: i64,
        numbers: Option<&[i64]>,
    ) -> Result<u64> {
        let formatted = match numbers {
            Some(numbers) => {
                let mut conn = self.pool.acquire().await?;
                let campaign = fetch_campaign(&mut conn, campaign_id).await?;
                Some(
                    numbers
                        .iter()
                        .map(|&n| {
                            format_ticket_number(&campaign.ticket_prefix, n, campaign.total_tickets)
                        })
                        .collect::<Vec<_>>(),
                )
            }
            None => None,
        };

        self.cancel_user_reservations(campaign_id, user_id, formatted.as_deref())
            .await
    }

    /// List free numbers, excluding sold tickets and other users'
    /// active reservations.
    pub async fn available_numbers(
        &self,
        campaign_id: i64,
        user_id: i64,
        limit: usize,
    ) -> Result<Availability> {
        let mut conn = self.pool.acquire().await?;
        let campaign = fetch_campaign(&mut conn, campaign_id).await?;
        drop(conn);

        let sold = self.sold_numbers(campaign_id).await?;
        let reserved = self.other_reservations(campaign_id, user_id).await?;

        let mut numbers = Vec::new();
        let mut actual_available = 0i64;
        for n in 1..=campaign.total_tickets {
            let display = format_ticket_number(&campaign.ticket_prefix, n, campaign.total_tickets);
            if sold.contains(&display) || reserved.contains(&display) {
                continue;
            }
            actual_available += 1;
            if numbers.len() < limit {
                numbers.push(AvailableNumber { number: n, display });
            }
        }

        let truncated = actual_available > numbers.len() as i64;
        Ok(Availability {
            total_tickets: campaign.total_tickets,
            sold_count: campaign.sold_tickets,
            reserved_count: reserved.len() as i64,
            low_stock: actual_available <= self.limits.low_stock_threshold,
            actual_available,
            numbers,
            truncated,
        })
    }

    async fn cancel_user_reservations(
        &self,
        campaign_id: i64,
        user_id: i64,
        numbers: Option<&[String]>,
    ) -> Result<u64> {
        let mut query = Query::update()
            .table(TicketReservations::Table)
            .value(
                TicketReservations::Status,
                ReservationStatus::Cancelled.as_str(),
            )
            .and_where(Expr::col(TicketReservations::CampaignId).eq(campaign_id))
            .and_where(Expr::col(TicketReservations::UserId).eq(user_id))
            .and_where(
                Expr::col(TicketReservations::Status).eq(ReservationStatus::Reserved.as_str()),
            )
            .to_owned();

        if let Some(numbers) = numbers {
            query.and_where(
                Expr::col(TicketReservations::TicketNumber).is_in(numbers.iter().cloned()),
            );
        }

        let sql = query.to_string(SqliteQueryBuilder);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn sold_numbers(&self, campaign_id: i64) -> Result<HashSet<String>> {
        let query = Query::select()
            .column(Tickets::TicketNumber)
            .from(Tickets::Table)
            .and_where(Expr::col(Tickets::CampaignId).eq(campaign_id))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("ticket_number"))
            .collect())
    }

    async fn other_reservations(&self, campaign_id: i64, user_id: i64) -> Result<HashSet<String>> {
        let query = Query::select()
            .column(TicketReservations::TicketNumber)
            .from(TicketReservations::Table)
            .and_where(Expr::col(TicketReservations::CampaignId).eq(campaign_id))
            .and_where(
                Expr::col(TicketReservations::Status).eq(ReservationStatus::Reserved.as_str()),
            )
            .and_where(Expr::col(TicketReservations::ExpiresAt).gt(now_string()))
            .and_where(Expr::col(TicketReservations::UserId).ne(user_id))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("ticket_number"))
            .collect())
    }

    /// Taken set at reservation time: sold tickets plus other users'
    /// live holds.
    async fn taken_numbers(&self, campaign: &Campaign, user_id: i64) -> Result<HashSet<String>> {
        let mut taken = self.sold_numbers(campaign.id).await?;
        taken.extend(self.other_reservations(campaign.id, user_id).await?);
        Ok(taken)
    }
}
