//! Winner selection.
//!
//! One draw per campaign, executed in a single transaction under the
//! campaign row lock. The main winner comes from a uniform pick over
//! active tickets (or a manual override); bonus winners are sampled by
//! distinct user so a bulk buyer cannot sweep the bonus pool.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::{IndexedRandom, SliceRandom};
use sea_query::{Asterisk, Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqliteConnection};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::interfaces::Notifier;
use crate::model::{CampaignStatus, DrawMethod, PrizeCategory, Ticket, TicketStatus};
use crate::storage::schema::{AdminLogs, BonusWinners, Campaigns, DrawResults, Settings, Tickets};

use super::{fetch_campaign, insert_notification, lock_campaign_row, now_string};

const LAST_DRAW_KEY: &str = "last_draw_at";

/// Parameters for one draw.
#[derive(Debug, Clone)]
pub struct DrawRequest {
    pub campaign_id: i64,
    pub bonus_winners_count: usize,
    pub method: DrawMethod,
    /// Required for [`DrawMethod::Manual`], ignored otherwise.
    pub manual_ticket_number: Option<String>,
    pub admin_id: Option<i64>,
}

/// The committed result of a draw.
#[derive(Debug)]
pub struct DrawOutcome {
    pub draw_result_id: i64,
    pub main_winner: Ticket,
    /// At most one ticket per user; may be shorter than requested when
    /// too few distinct users hold tickets.
    pub bonus_winners: Vec<Ticket>,
    pub method: DrawMethod,
}

pub struct DrawEngine {
    pool: SqlitePool,
    limits: Limits,
    notifier: Arc<dyn Notifier>,
}

impl DrawEngine {
    pub fn new(pool: SqlitePool, limits: Limits, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pool,
            limits,
            notifier,
        }
    }

    /// Run the draw and settle every ticket's final state.
    ///
    /// Winner flips, loser flips, the result record, the campaign
    /// completion and the cooldown stamp commit atomically; any failure
    /// rolls the whole draw back.
    pub async fn perform(&self, req: &DrawRequest) -> Result<DrawOutcome> {
        if req.bonus_winners_count > self.limits.max_bonus_winners {
            return Err(Error::Validation(format!(
                "at most {} bonus winners may be drawn",
                self.limits.max_bonus_winners
            )));
        }
        if req.method == DrawMethod::Manual && req.manual_ticket_number.is_none() {
            return Err(Error::Validation(
                "manual draw requires a ticket number".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        lock_campaign_row(&mut *tx, req.campaign_id).await?;
        let campaign = fetch_campaign(&mut *tx, req.campaign_id).await?;
        if campaign.status == CampaignStatus::Completed {
            return Err(Error::Validation(
                "campaign draw has already been performed".to_string(),
            ));
        }

        Self::check_cooldown(&mut *tx, self.limits.draw_cooldown_secs).await?;

        let pool_tickets = Self::active_tickets(&mut *tx, req.campaign_id).await?;
        if pool_tickets.is_empty() {
            return Err(Error::Validation(
                "no tickets available for draw".to_string(),
            ));
        }

        let (main_winner, bonus_winners) = Self::select_winners(
            &pool_tickets,
            req.method,
            req.manual_ticket_number.as_deref(),
            req.bonus_winners_count,
        )?;

        if bonus_winners.len() < req.bonus_winners_count {
            info!(
                campaign_id = req.campaign_id,
                requested = req.bonus_winners_count,
                selected = bonus_winners.len(),
                "bonus pool under-filled, too few distinct ticket holders"
            );
        }

        Self::mark_ticket(&mut *tx, main_winner.id, PrizeCategory::Main).await?;
        for ticket in &bonus_winners {
            Self::mark_ticket(&mut *tx, ticket.id, PrizeCategory::Bonus).await?;
        }
        Self::mark_losers(&mut *tx, req.campaign_id).await?;

        let draw_date = now_string();
        let query = Query::insert()
            .into_table(DrawResults::Table)
            .columns([
                DrawResults::CampaignId,
                DrawResults::MainWinnerTicketId,
                DrawResults::DrawMethod,
                DrawResults::DrawDate,
            ])
            .values_panic([
                req.campaign_id.into(),
                main_winner.id.into(),
                req.method.as_str().into(),
                draw_date.clone().into(),
            ])
            .returning_col(DrawResults::Id)
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_one(&mut *tx).await?;
        let draw_result_id: i64 = row.get(0);

        for ticket in &bonus_winners {
            let query = Query::insert()
                .into_table(BonusWinners::Table)
                .columns([BonusWinners::DrawResultId, BonusWinners::TicketId])
                .values_panic([draw_result_id.into(), ticket.id.into()])
                .to_string(SqliteQueryBuilder);
            sqlx::query(&query).execute(&mut *tx).await?;
        }

        let query = Query::update()
            .table(Campaigns::Table)
            .value(Campaigns::Status, CampaignStatus::Completed.as_str())
            .value(Campaigns::DrawDate, draw_date.clone())
            .value(Campaigns::UpdatedAt, draw_date.clone())
            .and_where(Expr::col(Campaigns::Id).eq(req.campaign_id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *tx).await?;

        Self::stamp_cooldown(&mut *tx, &draw_date).await?;

        insert_notification(
            &mut *tx,
            main_winner.user_id,
            "draw_winner",
            "You won the draw!",
            &format!("Ticket {} is the main winner.", main_winner.ticket_number),
            serde_json::json!({
                "campaign_id": req.campaign_id,
                "ticket_number": main_winner.ticket_number,
                "prize_category": PrizeCategory::Main.as_str(),
            }),
        )
        .await?;
        for ticket in &bonus_winners {
            insert_notification(
                &mut *tx,
                ticket.user_id,
                "draw_winner",
                "You won a bonus prize!",
                &format!("Ticket {} won a bonus prize.", ticket.ticket_number),
                serde_json::json!({
                    "campaign_id": req.campaign_id,
                    "ticket_number": ticket.ticket_number,
                    "prize_category": PrizeCategory::Bonus.as_str(),
                }),
            )
            .await?;
        }

        Self::log_admin_action(&mut *tx, req, draw_result_id, &main_winner, &bonus_winners)
            .await?;

        tx.commit().await?;

        info!(
            campaign_id = req.campaign_id,
            draw_result_id,
            main_winner_ticket = %main_winner.ticket_number,
            bonus_winners = bonus_winners.len(),
            method = req.method.as_str(),
            "draw completed"
        );

        for ticket in std::iter::once(&main_winner).chain(bonus_winners.iter()) {
            let category = if ticket.id == main_winner.id {
                PrizeCategory::Main
            } else {
                PrizeCategory::Bonus
            };
            if let Err(err) = self
                .notifier
                .notify(
                    ticket.user_id,
                    "draw_winner",
                    "Draw results are in",
                    &format!("Ticket {} won a {} prize.", ticket.ticket_number, category.as_str()),
                    serde_json::json!({
                        "campaign_id": req.campaign_id,
                        "ticket_number": ticket.ticket_number,
                        "prize_category": category.as_str(),
                    }),
                )
                .await
            {
                warn!(
                    user_id = ticket.user_id,
                    error = %err,
                    "winner notification delivery failed"
                );
            }
        }

        // Broadcast the result to everyone who held a ticket.
        for user_id in self.participants(req.campaign_id).await? {
            if let Err(err) = self
                .notifier
                .notify(
                    user_id,
                    "draw_completed",
                    "Draw completed",
                    &format!("The winning ticket is {}.", main_winner.ticket_number),
                    serde_json::json!({
                        "campaign_id": req.campaign_id,
                        "main_winner": main_winner.ticket_number,
                    }),
                )
                .await
            {
                warn!(user_id, error = %err, "draw broadcast delivery failed");
            }
        }

        Ok(DrawOutcome {
            draw_result_id,
            main_winner,
            bonus_winners,
            method: req.method,
        })
    }

    /// Distinct users holding tickets in the campaign.
    async fn participants(&self, campaign_id: i64) -> Result<Vec<i64>> {
        let query = Query::select()
            .distinct()
            .column(Tickets::UserId)
            .from(Tickets::Table)
            .and_where(Expr::col(Tickets::CampaignId).eq(campaign_id))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }

    /// Pick the main winner and the bonus set. Pure selection, no I/O.
    ///
    /// Bonus sampling is per distinct user: tickets are grouped by
    /// holder, the holders are shuffled, and one random ticket is taken
    /// from each of the first `bonus_count`. The main winner's tickets
    /// and user are excluded entirely.
    fn select_winners(
        pool_tickets: &[Ticket],
        method: DrawMethod,
        manual_number: Option<&str>,
        bonus_count: usize,
    ) -> Result<(Ticket, Vec<Ticket>)> {
        let mut rng = rand::rng();

        let main_winner = match method {
            DrawMethod::Manual => {
                let number = manual_number.unwrap_or_default();
                pool_tickets
                    .iter()
                    .find(|t| t.ticket_number == number)
                    .cloned()
                    .ok_or_else(|| Error::NotFound {
                        entity: "ticket",
                        id: number.to_string(),
                    })?
            }
            DrawMethod::Automatic => pool_tickets
                .choose(&mut rng)
                .cloned()
                .ok_or_else(|| Error::Validation("no tickets available for draw".to_string()))?,
        };

        let mut by_user: HashMap<i64, Vec<&Ticket>> = HashMap::new();
        for ticket in pool_tickets {
            if ticket.id == main_winner.id || ticket.user_id == main_winner.user_id {
                continue;
            }
            by_user.entry(ticket.user_id).or_default().push(ticket);
        }

        let mut users: Vec<i64> = by_user.keys().copied().collect();
        users.sort_unstable();
        users.shuffle(&mut rng);

        let bonus_winners: Vec<Ticket> = users
            .into_iter()
            .take(bonus_count)
            .filter_map(|user| by_user[&user].choose(&mut rng).map(|t| (*t).clone()))
            .collect();

        Ok((main_winner, bonus_winners))
    }

    /// Reject the draw while a previous one is still inside the
    /// cooldown window. The stamp is shared across campaigns.
    async fn check_cooldown(conn: &mut SqliteConnection, cooldown_secs: i64) -> Result<()> {
        let query = Query::select()
            .column(Settings::Value)
            .from(Settings::Table)
            .and_where(Expr::col(Settings::Key).eq(LAST_DRAW_KEY))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        let Some(row) = row else {
            return Ok(());
        };

        let stamp: String = row.get("value");
        let last = chrono::DateTime::parse_from_rfc3339(&stamp)
            .map_err(|err| Error::Integrity(format!("bad {LAST_DRAW_KEY} stamp: {err}")))?;

        let elapsed = chrono::Utc::now().signed_duration_since(last).num_seconds();
        if elapsed < cooldown_secs {
            return Err(Error::CooldownActive {
                remaining_secs: cooldown_secs - elapsed,
            });
        }
        Ok(())
    }

    async fn stamp_cooldown(conn: &mut SqliteConnection, draw_date: &str) -> Result<()> {
        let query = Query::insert()
            .into_table(Settings::Table)
            .columns([Settings::Key, Settings::Value])
            .values_panic([LAST_DRAW_KEY.into(), draw_date.into()])
            .on_conflict(
                OnConflict::column(Settings::Key)
                    .update_column(Settings::Value)
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    async fn active_tickets(
        conn: &mut SqliteConnection,
        campaign_id: i64,
    ) -> Result<Vec<Ticket>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Tickets::Table)
            .and_where(Expr::col(Tickets::CampaignId).eq(campaign_id))
            .and_where(Expr::col(Tickets::Status).eq(TicketStatus::Active.as_str()))
            .order_by(Tickets::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
        rows.iter().map(Ticket::from_row).collect()
    }

    async fn mark_ticket(
        conn: &mut SqliteConnection,
        ticket_id: i64,
        category: PrizeCategory,
    ) -> Result<()> {
        let query = Query::update()
            .table(Tickets::Table)
            .value(Tickets::Status, TicketStatus::Winner.as_str())
            .value(Tickets::IsWinner, 1)
            .value(Tickets::PrizeCategory, category.as_str())
            .and_where(Expr::col(Tickets::Id).eq(ticket_id))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    async fn mark_losers(conn: &mut SqliteConnection, campaign_id: i64) -> Result<()> {
        let query = Query::update()
            .table(Tickets::Table)
            .value(Tickets::Status, TicketStatus::Lost.as_str())
            .and_where(Expr::col(Tickets::CampaignId).eq(campaign_id))
            .and_where(Expr::col(Tickets::Status).eq(TicketStatus::Active.as_str()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    async fn log_admin_action(
        conn: &mut SqliteConnection,
        req: &DrawRequest,
        draw_result_id: i64,
        main_winner: &Ticket,
        bonus_winners: &[Ticket],
    ) -> Result<()> {
        let bonus_numbers: Vec<&str> =
            bonus_winners.iter().map(|t| t.ticket_number.as_str()).collect();
        let details = serde_json::json!({
            "draw_result_id": draw_result_id,
            "method": req.method.as_str(),
            "main_winner": main_winner.ticket_number,
            "bonus_winners": bonus_numbers,
        });

        let query = Query::insert()
            .into_table(AdminLogs::Table)
            .columns([
                AdminLogs::AdminId,
                AdminLogs::Action,
                AdminLogs::EntityType,
                AdminLogs::EntityId,
                AdminLogs::Details,
                AdminLogs::CreatedAt,
            ])
            .values_panic([
                req.admin_id.into(),
                "PERFORM_DRAW".into(),
                "campaign".into(),
                req.campaign_id.into(),
                details.to_string().into(),
                now_string().into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }
}
