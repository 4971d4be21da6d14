//! Ticket allocation.
//!
//! Converts a completed purchase into exactly `ticket_count` uniquely
//! numbered tickets inside the caller's transaction. Numbering is a
//! deterministic ascending scan over 1..=total_tickets that skips
//! issued numbers and other users' live reservations; the campaign row
//! lock is the single serialization point that keeps two concurrent
//! allocations from ever both succeeding on overlapping number windows.

use std::collections::HashSet;

use sea_query::{Asterisk, Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqliteConnection};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::model::{
    format_ticket_number, new_invoice_number, CampaignStatus, Purchase, ReservationStatus, Ticket,
    TicketStatus,
};
use crate::storage::schema::{Campaigns, Invoices, TicketReservations, Tickets};

use super::{fetch_campaign, insert_notification, lock_campaign_row, now_string};

pub struct TicketAllocator;

impl TicketAllocator {
    /// Allocate tickets for a purchase inside the caller's transaction.
    ///
    /// Idempotent: a second call for the same purchase returns the
    /// existing tickets untouched (payment providers redeliver
    /// confirmations). On any shortfall the error propagates and the
    /// caller rolls the whole transaction back; partial issuance is
    /// never committed.
    pub async fn allocate(conn: &mut SqliteConnection, purchase: &Purchase) -> Result<Vec<Ticket>> {
        let existing = Self::tickets_for_purchase(conn, purchase.id).await?;
        if !existing.is_empty() {
            info!(
                purchase_id = purchase.id,
                count = existing.len(),
                "tickets already allocated, returning existing set"
            );
            return Ok(existing);
        }

        lock_campaign_row(conn, purchase.campaign_id).await?;
        let campaign = fetch_campaign(conn, purchase.campaign_id).await?;

        let remaining = campaign.remaining_tickets();
        if purchase.ticket_count > remaining {
            return Err(Error::Capacity {
                requested: purchase.ticket_count as u32,
                available: remaining.max(0) as u32,
            });
        }

        // Taken set: issued tickets plus other users' live holds. The
        // buyer's own reservations stay allocatable.
        let mut taken = Self::issued_numbers(conn, purchase.campaign_id).await?;
        taken.extend(Self::held_numbers(conn, purchase.campaign_id, purchase.user_id).await?);

        let free = campaign.total_tickets - taken.len() as i64;
        if purchase.ticket_count > free {
            return Err(Error::Capacity {
                requested: purchase.ticket_count as u32,
                available: free.max(0) as u32,
            });
        }

        let mut created = Vec::with_capacity(purchase.ticket_count as usize);
        let now = now_string();
        for n in 1..=campaign.total_tickets {
            if created.len() as i64 >= purchase.ticket_count {
                break;
            }
            let number = format_ticket_number(&campaign.ticket_prefix, n, campaign.total_tickets);
            if taken.contains(&number) {
                continue;
            }

            // Conflict-ignore is defensive even under the lock; a row
            // that lost the race is simply skipped.
            let query = Query::insert()
                .into_table(Tickets::Table)
                .columns([
                    Tickets::TicketNumber,
                    Tickets::CampaignId,
                    Tickets::UserId,
                    Tickets::PurchaseId,
                    Tickets::Status,
                    Tickets::CreatedAt,
                ])
                .values_panic([
                    number.clone().into(),
                    purchase.campaign_id.into(),
                    purchase.user_id.into(),
                    purchase.id.into(),
                    TicketStatus::Active.as_str().into(),
                    now.clone().into(),
                ])
                .on_conflict(
                    OnConflict::columns([Tickets::CampaignId, Tickets::TicketNumber])
                        .do_nothing()
                        .to_owned(),
                )
                .returning_col(Tickets::Id)
                .to_string(SqliteQueryBuilder);

            if let Some(row) = sqlx::query(&query).fetch_optional(&mut *conn).await? {
                created.push(Ticket {
                    id: row.get(0),
                    ticket_number: number,
                    campaign_id: purchase.campaign_id,
                    user_id: purchase.user_id,
                    purchase_id: purchase.id,
                    status: TicketStatus::Active,
                    is_winner: false,
                    prize_category: None,
                });
            }
        }

        if (created.len() as i64) < purchase.ticket_count {
            error!(
                purchase_id = purchase.id,
                campaign_id = purchase.campaign_id,
                created = created.len(),
                requested = purchase.ticket_count,
                "could not fill ticket allocation under campaign lock"
            );
            return Err(Error::Integrity(format!(
                "allocated {} of {} tickets for purchase {}",
                created.len(),
                purchase.ticket_count,
                purchase.id
            )));
        }

        Self::bump_sold_and_maybe_close(conn, &campaign, purchase.ticket_count).await?;
        Self::write_invoice(conn, purchase).await?;

        let numbers: Vec<&str> = created.iter().map(|t| t.ticket_number.as_str()).collect();
        insert_notification(
            conn,
            purchase.user_id,
            "purchase_confirmation",
            "Purchase confirmed",
            &format!("Your {} ticket(s) have been issued.", purchase.ticket_count),
            serde_json::json!({
                "purchase_id": purchase.id,
                "ticket_numbers": numbers,
            }),
        )
        .await?;

        info!(
            purchase_id = purchase.id,
            campaign_id = purchase.campaign_id,
            count = created.len(),
            "tickets allocated"
        );

        Ok(created)
    }

    /// Load the tickets already issued for a purchase.
    pub async fn tickets_for_purchase(
        conn: &mut SqliteConnection,
        purchase_id: i64,
    ) -> Result<Vec<Ticket>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Tickets::Table)
            .and_where(Expr::col(Tickets::PurchaseId).eq(purchase_id))
            .order_by(Tickets::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
        rows.iter().map(Ticket::from_row).collect()
    }

    async fn issued_numbers(
        conn: &mut SqliteConnection,
        campaign_id: i64,
    ) -> Result<HashSet<String>> {
        let query = Query::select()
            .column(Tickets::TicketNumber)
            .from(Tickets::Table)
            .and_where(Expr::col(Tickets::CampaignId).eq(campaign_id))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("ticket_number"))
            .collect())
    }

    /// Numbers other users are actively holding mid-checkout.
    async fn held_numbers(
        conn: &mut SqliteConnection,
        campaign_id: i64,
        user_id: i64,
    ) -> Result<HashSet<String>> {
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

        let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("ticket_number"))
            .collect())
    }

    async fn bump_sold_and_maybe_close(
        conn: &mut SqliteConnection,
        campaign: &crate::model::Campaign,
        count: i64,
    ) -> Result<()> {
        let query = Query::update()
            .table(Campaigns::Table)
            .value(
                Campaigns::SoldTickets,
                Expr::col(Campaigns::SoldTickets).add(count),
            )
            .value(Campaigns::UpdatedAt, now_string())
            .and_where(Expr::col(Campaigns::Id).eq(campaign.id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *conn).await?;

        let sold = campaign.sold_tickets + count;
        if sold >= campaign.total_tickets && campaign.status == CampaignStatus::Open {
            let query = Query::update()
                .table(Campaigns::Table)
                .value(Campaigns::Status, CampaignStatus::Closed.as_str())
                .value(Campaigns::UpdatedAt, now_string())
                .and_where(Expr::col(Campaigns::Id).eq(campaign.id))
                .to_string(SqliteQueryBuilder);
            sqlx::query(&query).execute(&mut *conn).await?;
            info!(campaign_id = campaign.id, "campaign sold out, auto-closed");
        }
        Ok(())
    }

    async fn write_invoice(conn: &mut SqliteConnection, purchase: &Purchase) -> Result<()> {
        let query = Query::insert()
            .into_table(Invoices::Table)
            .columns([
                Invoices::PurchaseId,
                Invoices::UserId,
                Invoices::InvoiceNumber,
                Invoices::Amount,
                Invoices::CreatedAt,
            ])
            .values_panic([
                purchase.id.into(),
                purchase.user_id.into(),
                new_invoice_number().into(),
                purchase.total_amount.into(),
                now_string().into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }
}
