//! Service layer: one module per component.

pub mod allocator;
pub mod draw;
pub mod reservation;
pub mod settlement;
pub mod sweeper;
pub mod wallet;

pub use allocator::TicketAllocator;
pub use draw::{DrawEngine, DrawOutcome, DrawRequest};
pub use reservation::{Availability, ReservationManager};
pub use settlement::{
    InitiatedPurchase, PaymentSettlement, PaymentSignal, PurchaseRequest, SettlementOutcome,
};
pub use sweeper::Sweeper;
pub use wallet::{DepositOutcome, WalletLedger, WalletPurchase};

use sea_query::{Expr, Query, SqliteQueryBuilder};
use sqlx::SqliteConnection;

use crate::error::{Error, Result};
use crate::model::Campaign;
use crate::storage::schema::{Campaigns, Notifications};

/// Current UTC time in the persisted format.
pub(crate) fn now_string() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Take the campaign row write lock for the rest of the transaction.
///
/// SQLite has no `SELECT ... FOR UPDATE`; writing the row acquires the
/// write lock, which serializes concurrent allocations per campaign.
pub(crate) async fn lock_campaign_row(conn: &mut SqliteConnection, campaign_id: i64) -> Result<()> {
    let query = Query::update()
        .table(Campaigns::Table)
        .value(Campaigns::UpdatedAt, now_string())
        .and_where(Expr::col(Campaigns::Id).eq(campaign_id))
        .to_string(SqliteQueryBuilder);

    let result = sqlx::query(&query).execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound {
            entity: "campaign",
            id: campaign_id.to_string(),
        });
    }
    Ok(())
}

/// Load one campaign.
pub(crate) async fn fetch_campaign(
    conn: &mut SqliteConnection,
    campaign_id: i64,
) -> Result<Campaign> {
    let query = Query::select()
        .column(sea_query::Asterisk)
        .from(Campaigns::Table)
        .and_where(Expr::col(Campaigns::Id).eq(campaign_id))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    match row {
        Some(row) => Campaign::from_row(&row),
        None => Err(Error::NotFound {
            entity: "campaign",
            id: campaign_id.to_string(),
        }),
    }
}

/// Insert a notification row inside the caller's transaction.
pub(crate) async fn insert_notification(
    conn: &mut SqliteConnection,
    user_id: i64,
    kind: &str,
    title: &str,
    message: &str,
    data: serde_json::Value,
) -> Result<()> {
    let query = Query::insert()
        .into_table(Notifications::Table)
        .columns([
            Notifications::UserId,
            Notifications::Kind,
            Notifications::Title,
            Notifications::Message,
            Notifications::Data,
            Notifications::CreatedAt,
        ])
        .values_panic([
            user_id.into(),
            kind.into(),
            title.into(),
            message.into(),
            data.to_string().into(),
            now_string().into(),
        ])
        .to_string(SqliteQueryBuilder);

    sqlx::query(&query).execute(&mut *conn).await?;
    Ok(())
}
