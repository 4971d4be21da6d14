//! Wallet ledger.
//!
//! Per-user balance with a complete, replayable audit trail. Every
//! mutation writes one ledger row whose balance_before/balance_after
//! are captured atomically with the balance update; the cached balance
//! and the ledger must never diverge.

use std::sync::Arc;

use sea_query::{Asterisk, Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::interfaces::Notifier;
use crate::model::{
    new_deposit_reference, new_purchase_reference, new_wallet_reference, CampaignStatus,
    PaymentStatus, Purchase, Ticket, Wallet, WalletTransaction, WalletTxKind, WalletTxStatus,
};
use crate::storage::schema::{Purchases, Wallets, WalletTransactions};

use super::allocator::TicketAllocator;
use super::{fetch_campaign, insert_notification, now_string};

/// Outcome of a deposit completion signal.
#[derive(Debug)]
pub enum DepositOutcome {
    Credited {
        transaction: WalletTransaction,
        new_balance: i64,
    },
    /// The deposit reference was already settled; nothing changed.
    AlreadyProcessed { status: WalletTxStatus },
}

/// A completed balance-funded purchase.
#[derive(Debug)]
pub struct WalletPurchase {
    pub purchase: Purchase,
    pub tickets: Vec<Ticket>,
    pub ledger_reference: String,
    pub new_balance: i64,
}

pub struct WalletLedger {
    pool: SqlitePool,
    currency: String,
    limits: Limits,
    notifier: Arc<dyn Notifier>,
}

impl WalletLedger {
    pub fn new(
        pool: SqlitePool,
        currency: String,
        limits: Limits,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            pool,
            currency,
            limits,
            notifier,
        }
    }

    /// Fetch a user's wallet, creating an empty one on first touch.
    ///
    /// Creation races resolve through the conflict-ignore insert; the
    /// loser simply reads the winner's row.
    pub async fn get_or_create(&self, user_id: i64) -> Result<Wallet> {
        let now = now_string();
        let query = Query::insert()
            .into_table(Wallets::Table)
            .columns([
                Wallets::UserId,
                Wallets::Balance,
                Wallets::Currency,
                Wallets::CreatedAt,
                Wallets::UpdatedAt,
            ])
            .values_panic([
                user_id.into(),
                0i64.into(),
                self.currency.clone().into(),
                now.clone().into(),
                now.into(),
            ])
            .on_conflict(OnConflict::column(Wallets::UserId).do_nothing().to_owned())
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;

        self.find_by_user(user_id).await?.ok_or(Error::NotFound {
            entity: "wallet",
            id: user_id.to_string(),
        })
    }

    /// Record a pending deposit and return its reference.
    ///
    /// The balance snapshot is deliberately not taken here; completion
    /// re-reads the live balance so out-of-order settlements still sum
    /// correctly.
    pub async fn initiate_deposit(
        &self,
        user_id: i64,
        amount: i64,
    ) -> Result<WalletTransaction> {
        if amount <= 0 {
            return Err(Error::Validation(
                "deposit amount must be positive".to_string(),
            ));
        }

        let wallet = self.get_or_create(user_id).await?;
        let reference = new_deposit_reference();
        let query = Query::insert()
            .into_table(WalletTransactions::Table)
            .columns([
                WalletTransactions::WalletId,
                WalletTransactions::TxType,
                WalletTransactions::Amount,
                WalletTransactions::Reference,
                WalletTransactions::Status,
                WalletTransactions::Description,
                WalletTransactions::CreatedAt,
            ])
            .values_panic([
                wallet.id.into(),
                WalletTxKind::Deposit.as_str().into(),
                amount.into(),
                reference.clone().into(),
                WalletTxStatus::Pending.as_str().into(),
                format!("Deposit of {} {}", amount, self.currency).into(),
                now_string().into(),
            ])
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await?;

        info!(user_id, amount, reference = %reference, "deposit initiated");
        self.find_transaction(&reference).await
    }

    /// Credit a settled deposit.
    ///
    /// Idempotent on the reference: a duplicate provider signal finds
    /// the transaction already terminal and changes nothing.
    pub async fn complete_deposit(&self, reference: &str) -> Result<DepositOutcome> {
        let mut tx = self.pool.begin().await?;

        // Guarded status flip as the first statement of the
        // transaction: the write lock is taken before any read, and a
        // duplicate signal changes zero rows.
        let query = Query::update()
            .table(WalletTransactions::Table)
            .value(WalletTransactions::Status, WalletTxStatus::Completed.as_str())
            .and_where(Expr::col(WalletTransactions::Reference).eq(reference))
            .and_where(Expr::col(WalletTransactions::Status).eq(WalletTxStatus::Pending.as_str()))
            .to_string(SqliteQueryBuilder);
        let result = sqlx::query(&query).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            drop(tx);
            let current = self.find_transaction(reference).await?;
            return Ok(DepositOutcome::AlreadyProcessed {
                status: current.status,
            });
        }

        let credited = Self::fetch_transaction(&mut *tx, reference).await?;

        // Read the *current* balance; the balance at initiation time
        // may be stale by now.
        let balance = Self::fetch_balance(&mut *tx, credited.wallet_id).await?;
        let new_balance = balance + credited.amount;

        Self::write_balance(&mut *tx, credited.wallet_id, new_balance).await?;

        let query = Query::update()
            .table(WalletTransactions::Table)
            .value(WalletTransactions::BalanceBefore, balance)
            .value(WalletTransactions::BalanceAfter, new_balance)
            .and_where(Expr::col(WalletTransactions::Id).eq(credited.id))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *tx).await?;

        let wallet_user = Self::fetch_wallet_user(&mut *tx, credited.wallet_id).await?;
        insert_notification(
            &mut *tx,
            wallet_user,
            "wallet_deposit",
            "Deposit received",
            &format!("{} {} credited to your wallet.", credited.amount, self.currency),
            serde_json::json!({ "reference": reference, "amount": credited.amount }),
        )
        .await?;

        tx.commit().await?;

        info!(reference, amount = credited.amount, new_balance, "deposit credited");

        let mut transaction = credited;
        transaction.balance_before = Some(balance);
        transaction.balance_after = Some(new_balance);
        Ok(DepositOutcome::Credited {
            transaction,
            new_balance,
        })
    }

    /// Admin credit: bonus or refund.
    pub async fn credit(
        &self,
        user_id: i64,
        amount: i64,
        kind: WalletTxKind,
        description: &str,
    ) -> Result<WalletTransaction> {
        if amount <= 0 {
            return Err(Error::Validation(
                "credit amount must be positive".to_string(),
            ));
        }
        if !matches!(kind, WalletTxKind::Bonus | WalletTxKind::Refund) {
            return Err(Error::Validation(
                "credit type must be bonus or refund".to_string(),
            ));
        }

        let wallet = self.get_or_create(user_id).await?;
        let reference = new_wallet_reference();

        let mut tx = self.pool.begin().await?;
        Self::lock_wallet_row(&mut *tx, wallet.id).await?;
        let balance = Self::fetch_balance(&mut *tx, wallet.id).await?;
        let new_balance = balance + amount;

        Self::write_balance(&mut *tx, wallet.id, new_balance).await?;
        Self::insert_completed_transaction(
            &mut *tx,
            wallet.id,
            kind,
            amount,
            balance,
            new_balance,
            &reference,
            description,
        )
        .await?;
        tx.commit().await?;

        info!(user_id, amount, kind = kind.as_str(), "wallet credited");
        self.find_transaction(&reference).await
    }

    /// Balance-funded purchase: debit, ledger row, completed purchase
    /// and ticket allocation commit in one transaction. There is no
    /// pending state; an insufficient balance rejects before anything
    /// is written.
    pub async fn purchase(
        &self,
        user_id: i64,
        campaign_id: i64,
        ticket_count: i64,
    ) -> Result<WalletPurchase> {
        if ticket_count < 1 || ticket_count > self.limits.max_tickets_per_purchase {
            return Err(Error::Validation(format!(
                "ticket_count must be between 1 and {}",
                self.limits.max_tickets_per_purchase
            )));
        }

        let wallet = self.get_or_create(user_id).await?;

        let mut tx = self.pool.begin().await?;

        // Wallet row lock first, before any read in this transaction;
        // a later lock upgrade from a shared read would deadlock under
        // concurrent callers.
        Self::lock_wallet_row(&mut *tx, wallet.id).await?;

        let campaign = fetch_campaign(&mut *tx, campaign_id).await?;
        if campaign.status != CampaignStatus::Open {
            return Err(Error::Validation(
                "campaign is not open for purchases".to_string(),
            ));
        }
        if campaign.sold_tickets + ticket_count > campaign.total_tickets {
            return Err(Error::Capacity {
                requested: ticket_count as u32,
                available: campaign.remaining_tickets().max(0) as u32,
            });
        }

        let total = campaign.ticket_price * ticket_count;

        // Sufficiency is checked against the live, locked balance; two
        // concurrent purchases cannot both spend the same funds.
        let balance = Self::fetch_balance(&mut *tx, wallet.id).await?;
        if balance < total {
            return Err(Error::InsufficientFunds {
                balance,
                required: total,
            });
        }

        let new_balance = balance - total;
        let ledger_reference = new_wallet_reference();
        let transaction_id = new_purchase_reference();

        Self::write_balance(&mut *tx, wallet.id, new_balance).await?;
        Self::insert_completed_transaction(
            &mut *tx,
            wallet.id,
            WalletTxKind::Purchase,
            total,
            balance,
            new_balance,
            &ledger_reference,
            &format!("Purchase of {ticket_count} ticket(s)"),
        )
        .await?;

        let completed_at = now_string();
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
                Purchases::CreatedAt,
                Purchases::CompletedAt,
            ])
            .values_panic([
                user_id.into(),
                campaign_id.into(),
                ticket_count.into(),
                total.into(),
                PaymentStatus::Completed.as_str().into(),
                transaction_id.clone().into(),
                "wallet".into(),
                completed_at.clone().into(),
                completed_at.clone().into(),
            ])
            .returning_col(Purchases::Id)
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_one(&mut *tx).await?;
        let purchase_id: i64 = row.get(0);

        let purchase = Purchase {
            id: purchase_id,
            user_id,
            campaign_id,
            ticket_count,
            total_amount: total,
            payment_status: PaymentStatus::Completed,
            transaction_id,
            payment_provider: Some("wallet".to_string()),
            phone_number: None,
            completed_at: Some(completed_at),
        };

        let tickets = TicketAllocator::allocate(&mut *tx, &purchase).await?;
        tx.commit().await?;

        info!(
            purchase_id,
            user_id,
            campaign_id,
            total,
            new_balance,
            "wallet purchase settled"
        );

        let numbers: Vec<String> = tickets.iter().map(|t| t.ticket_number.clone()).collect();
        if let Err(err) = self
            .notifier
            .notify(
                user_id,
                "purchase_confirmation",
                "Purchase confirmed",
                &format!("Your {ticket_count} ticket(s) were bought from your wallet."),
                serde_json::json!({
                    "purchase_id": purchase_id,
                    "ticket_numbers": numbers,
                    "payment_method": "wallet",
                }),
            )
            .await
        {
            warn!(purchase_id, error = %err, "purchase confirmation delivery failed");
        }

        Ok(WalletPurchase {
            purchase,
            tickets,
            ledger_reference,
            new_balance,
        })
    }

    /// Look up one ledger entry by reference.
    pub async fn find_transaction(&self, reference: &str) -> Result<WalletTransaction> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_transaction(&mut conn, reference).await
    }

    async fn find_by_user(&self, user_id: i64) -> Result<Option<Wallet>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Wallets::Table)
            .and_where(Expr::col(Wallets::UserId).eq(user_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(Wallet::from_row))
    }

    async fn fetch_transaction(
        conn: &mut SqliteConnection,
        reference: &str,
    ) -> Result<WalletTransaction> {
        let query = Query::select()
            .column(Asterisk)
            .from(WalletTransactions::Table)
            .and_where(Expr::col(WalletTransactions::Reference).eq(reference))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        match row {
            Some(row) => WalletTransaction::from_row(&row),
            None => Err(Error::NotFound {
                entity: "wallet transaction",
                id: reference.to_string(),
            }),
        }
    }

    /// SQLite analog of `SELECT ... FOR UPDATE` on the wallet row.
    async fn lock_wallet_row(conn: &mut SqliteConnection, wallet_id: i64) -> Result<()> {
        let query = Query::update()
            .table(Wallets::Table)
            .value(Wallets::UpdatedAt, now_string())
            .and_where(Expr::col(Wallets::Id).eq(wallet_id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *conn).await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                entity: "wallet",
                id: wallet_id.to_string(),
            });
        }
        Ok(())
    }

    async fn fetch_balance(conn: &mut SqliteConnection, wallet_id: i64) -> Result<i64> {
        let query = Query::select()
            .column(Wallets::Balance)
            .from(Wallets::Table)
            .and_where(Expr::col(Wallets::Id).eq(wallet_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&mut *conn).await?;
        Ok(row.get("balance"))
    }

    async fn write_balance(
        conn: &mut SqliteConnection,
        wallet_id: i64,
        balance: i64,
    ) -> Result<()> {
        let query = Query::update()
            .table(Wallets::Table)
            .value(Wallets::Balance, balance)
            .value(Wallets::UpdatedAt, now_string())
            .and_where(Expr::col(Wallets::Id).eq(wallet_id))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_completed_transaction(
        conn: &mut SqliteConnection,
        wallet_id: i64,
        kind: WalletTxKind,
        amount: i64,
        balance_before: i64,
        balance_after: i64,
        reference: &str,
        description: &str,
    ) -> Result<()> {
        let query = Query::insert()
            .into_table(WalletTransactions::Table)
            .columns([
                WalletTransactions::WalletId,
                WalletTransactions::TxType,
                WalletTransactions::Amount,
                WalletTransactions::BalanceBefore,
                WalletTransactions::BalanceAfter,
                WalletTransactions::Reference,
                WalletTransactions::Status,
                WalletTransactions::Description,
                WalletTransactions::CreatedAt,
            ])
            .values_panic([
                wallet_id.into(),
                kind.as_str().into(),
                amount.into(),
                balance_before.into(),
                balance_after.into(),
                reference.into(),
                WalletTxStatus::Completed.as_str().into(),
                description.into(),
                now_string().into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    async fn fetch_wallet_user(conn: &mut SqliteConnection, wallet_id: i64) -> Result<i64> {
        let query = Query::select()
            .column(Wallets::UserId)
            .from(Wallets::Table)
            .and_where(Expr::col(Wallets::Id).eq(wallet_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_one(&mut *conn).await?;
        Ok(row.get("user_id"))
    }
}
