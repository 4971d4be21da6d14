//! Payment settlement.
//!
//! The single choke point converting an external payment signal into a
//! terminal purchase state exactly once. States: pending leads to
//! completed, failed or expired; all terminal states are sinks.
//! Providers redeliver signals and dev tooling double-fires
//! confirmations, so settling an already-terminal purchase must be a
//! successful no-op.

use std::sync::Arc;

use sea_query::{Asterisk, Expr, Query, SqliteQueryBuilder};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::interfaces::Notifier;
use crate::model::{new_transaction_id, PaymentStatus, Purchase, Ticket};
use crate::storage::schema::Purchases;

use super::allocator::TicketAllocator;
use super::{fetch_campaign, now_string, sweeper};

/// Outcome of a payment confirmation signal.
#[derive(Debug)]
pub enum SettlementOutcome {
    /// The purchase transitioned to completed and tickets were issued.
    Settled {
        purchase: Purchase,
        tickets: Vec<Ticket>,
    },
    /// The purchase transitioned to failed; no tickets exist for it.
    MarkedFailed,
    /// The purchase was already in a terminal state; nothing changed.
    AlreadyProcessed { status: PaymentStatus },
}

/// Normalized payment signal from a provider webhook or simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentSignal {
    Success,
    Failure,
}

impl PaymentSignal {
    /// Map a provider status string onto a signal.
    pub fn from_provider_status(status: &str) -> Self {
        match status {
            "Success" | "success" | "completed" => Self::Success,
            _ => Self::Failure,
        }
    }
}

/// Purchase initiation request.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub campaign_id: i64,
    pub ticket_count: i64,
    /// Present for external mobile-money payments, absent for wallet.
    pub phone_number: Option<String>,
}

/// A created pending purchase, ready for the provider round-trip.
#[derive(Debug, Clone)]
pub struct InitiatedPurchase {
    pub purchase_id: i64,
    pub transaction_id: String,
    pub ticket_count: i64,
    pub total_amount: i64,
    pub provider: Option<String>,
}

pub struct PaymentSettlement {
    pool: SqlitePool,
    limits: Limits,
    notifier: Arc<dyn Notifier>,
}

impl PaymentSettlement {
    pub fn new(pool: SqlitePool, limits: Limits, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pool,
            limits,
            notifier,
        }
    }

    /// Create a pending purchase and hand back the provider reference.
    ///
    /// Validation happens before any mutation: the campaign must be
    /// open and have capacity for the requested count. The capacity
    /// check here is advisory; the allocator re-checks under lock.
    pub async fn initiate(&self, user_id: i64, req: &PurchaseRequest) -> Result<InitiatedPurchase> {
        if req.ticket_count < 1 || req.ticket_count > self.limits.max_tickets_per_purchase {
            return Err(Error::Validation(format!(
                "ticket_count must be between 1 and {}",
                self.limits.max_tickets_per_purchase
            )));
        }

        let mut conn = self.pool.acquire().await?;
        let campaign = fetch_campaign(&mut conn, req.campaign_id).await?;

        if campaign.status != crate::model::CampaignStatus::Open {
            return Err(Error::Validation(
                "campaign is not open for purchases".to_string(),
            ));
        }
        if campaign.sold_tickets + req.ticket_count > campaign.total_tickets {
            return Err(Error::Capacity {
                requested: req.ticket_count as u32,
                available: campaign.remaining_tickets().max(0) as u32,
            });
        }

        let total_amount = campaign.ticket_price * req.ticket_count;
        let transaction_id = new_transaction_id();

        let (phone, provider) = match &req.phone_number {
            Some(raw) => {
                let normalized = normalize_phone(raw);
                let provider = detect_provider(&normalized);
                (Some(normalized), Some(provider.to_string()))
            }
            None => (None, None),
        };

        let query = Query::insert()
            .into_table(Purchases::Table)
            .columns([
                Purchases::UserId,
                Purchases::CampaignId,
                Purchases::TicketCount,
                Purchases::TotalAmount,
                Purchases::PaymentStatus,
                Purchases::TransactionId,
                Purchases::PaymentProvider,
                Purchases::PhoneNumber,
                Purchases::CreatedAt,
            ])
            .values_panic([
                user_id.into(),
                req.campaign_id.into(),
                req.ticket_count.into(),
                total_amount.into(),
                PaymentStatus::Pending.as_str().into(),
                transaction_id.clone().into(),
                provider.clone().into(),
                phone.into(),
                now_string().into(),
            ])
            .returning_col(Purchases::Id)
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&mut *conn).await?;
        let purchase_id: i64 = sqlx::Row::get(&row, 0);

        info!(
            purchase_id,
            user_id,
            campaign_id = req.campaign_id,
            ticket_count = req.ticket_count,
            total_amount,
            "purchase initiated"
        );

        Ok(InitiatedPurchase {
            purchase_id,
            transaction_id,
            ticket_count: req.ticket_count,
            total_amount,
            provider,
        })
    }

    /// Apply a payment confirmation signal.
    ///
    /// Unknown transaction ids are rejected; terminal purchases report
    /// [`SettlementOutcome::AlreadyProcessed`]. On success the status
    /// flip and ticket allocation commit in one transaction, then
    /// downstream delivery runs best-effort.
    pub async fn confirm(
        &self,
        transaction_id: &str,
        signal: PaymentSignal,
    ) -> Result<SettlementOutcome> {
        let mut conn = self.pool.acquire().await?;
        let purchase = Self::fetch_by_transaction(&mut conn, transaction_id).await?;

        if purchase.payment_status.is_terminal() {
            info!(
                purchase_id = purchase.id,
                status = purchase.payment_status.as_str(),
                "duplicate settlement signal ignored"
            );
            return Ok(SettlementOutcome::AlreadyProcessed {
                status: purchase.payment_status,
            });
        }
        drop(conn);

        match signal {
            PaymentSignal::Failure => self.mark_failed(&purchase).await,
            PaymentSignal::Success => self.settle(purchase).await,
        }
    }

    async fn mark_failed(&self, purchase: &Purchase) -> Result<SettlementOutcome> {
        // Guard on pending so a concurrent settlement cannot be undone.
        let query = Query::update()
            .table(Purchases::Table)
            .value(Purchases::PaymentStatus, PaymentStatus::Failed.as_str())
            .and_where(Expr::col(Purchases::Id).eq(purchase.id))
            .and_where(Expr::col(Purchases::PaymentStatus).eq(PaymentStatus::Pending.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            let mut conn = self.pool.acquire().await?;
            let current = Self::fetch_by_transaction(&mut conn, &purchase.transaction_id).await?;
            return Ok(SettlementOutcome::AlreadyProcessed {
                status: current.payment_status,
            });
        }

        info!(purchase_id = purchase.id, "purchase marked failed");
        Ok(SettlementOutcome::MarkedFailed)
    }

    async fn settle(&self, purchase: Purchase) -> Result<SettlementOutcome> {
        let mut tx = self.pool.begin().await?;

        // The guarded status flip is the first statement of the
        // transaction, so the write lock is taken before anything is
        // read. A concurrent duplicate that lost the race changes zero
        // rows instead of deadlocking on a shared-lock upgrade.
        let completed_at = now_string();
        let query = Query::update()
            .table(Purchases::Table)
            .value(Purchases::PaymentStatus, PaymentStatus::Completed.as_str())
            .value(Purchases::CompletedAt, completed_at.clone())
            .and_where(Expr::col(Purchases::Id).eq(purchase.id))
            .and_where(Expr::col(Purchases::PaymentStatus).eq(PaymentStatus::Pending.as_str()))
            .to_string(SqliteQueryBuilder);
        let result = sqlx::query(&query).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            drop(tx);
            let mut conn = self.pool.acquire().await?;
            let current = Self::fetch_by_transaction(&mut conn, &purchase.transaction_id).await?;
            return Ok(SettlementOutcome::AlreadyProcessed {
                status: current.payment_status,
            });
        }

        let mut settled = purchase;
        settled.payment_status = PaymentStatus::Completed;
        settled.completed_at = Some(completed_at);

        let tickets = TicketAllocator::allocate(&mut *tx, &settled).await?;
        tx.commit().await?;

        info!(
            purchase_id = settled.id,
            transaction_id = %settled.transaction_id,
            tickets = tickets.len(),
            "payment settled"
        );

        let numbers: Vec<String> = tickets.iter().map(|t| t.ticket_number.clone()).collect();
        if let Err(err) = self
            .notifier
            .notify(
                settled.user_id,
                "purchase_confirmation",
                "Purchase confirmed",
                &format!("Your {} ticket(s) have been issued.", settled.ticket_count),
                serde_json::json!({
                    "purchase_id": settled.id,
                    "ticket_numbers": numbers,
                }),
            )
            .await
        {
            warn!(
                purchase_id = settled.id,
                error = %err,
                "purchase confirmation delivery failed"
            );
        }

        Ok(SettlementOutcome::Settled {
            purchase: settled,
            tickets,
        })
    }

    /// Sweep purchases stuck pending past the TTL to expired.
    pub async fn expire_stale(&self) -> Result<u64> {
        sweeper::expire_pending_purchases(&self.pool, self.limits.pending_purchase_ttl_secs).await
    }

    async fn fetch_by_transaction(
        conn: &mut sqlx::SqliteConnection,
        transaction_id: &str,
    ) -> Result<Purchase> {
        let query = Query::select()
            .column(Asterisk)
            .from(Purchases::Table)
            .and_where(Expr::col(Purchases::TransactionId).eq(transaction_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        match row {
            Some(row) => Purchase::from_row(&row),
            None => Err(Error::NotFound {
                entity: "purchase",
                id: transaction_id.to_string(),
            }),
        }
    }
}

/// Normalize a DRC phone number to +243 form.
pub fn normalize_phone(phone: &str) -> String {
    let cleaned: String = phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if let Some(rest) = cleaned.strip_prefix('0') {
        format!("+243{rest}")
    } else if cleaned.starts_with('+') {
        cleaned
    } else {
        format!("+243{cleaned}")
    }
}

/// Guess the mobile-money provider from the subscriber prefix.
pub fn detect_provider(phone: &str) -> &'static str {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let local = digits.strip_prefix("243").unwrap_or(&digits);

    match local.get(0..2) {
        Some("81") | Some("82") => "Vodacom M-Pesa",
        Some("84") | Some("85") => "Orange Money",
        Some("89") | Some("90") | Some("97") | Some("99") => "Airtel Money",
        _ => "Mobile Money",
    }
}
