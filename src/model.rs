//! Domain types and persisted formats.
//!
//! Status enums are stored as their `as_str` form; timestamps are stored
//! as RFC 3339 strings in UTC.

use rand::Rng;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{Error, Result};

/// Charset for references and transaction ids.
const REF_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    Draft,
    Open,
    Closed,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Terminal states are sinks; settling them again is a no-op.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Active,
    Winner,
    Lost,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Winner => "winner",
            Self::Lost => "lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "winner" => Some(Self::Winner),
            "lost" => Some(Self::Lost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrizeCategory {
    Main,
    Bonus,
}

impl PrizeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Bonus => "bonus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "main" => Some(Self::Main),
            "bonus" => Some(Self::Bonus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Reserved,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(Self::Reserved),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletTxKind {
    Deposit,
    Purchase,
    Refund,
    Bonus,
    Withdrawal,
}

impl WalletTxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Purchase => "purchase",
            Self::Refund => "refund",
            Self::Bonus => "bonus",
            Self::Withdrawal => "withdrawal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(Self::Deposit),
            "purchase" => Some(Self::Purchase),
            "refund" => Some(Self::Refund),
            "bonus" => Some(Self::Bonus),
            "withdrawal" => Some(Self::Withdrawal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletTxStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl WalletTxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// How the main winner was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMethod {
    Automatic,
    Manual,
}

impl DrawMethod {
    /// Stored form, kept compatible with the draw_results audit trail.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "random_selection",
            Self::Manual => "manual_selection",
        }
    }
}

/// A time-boxed lottery round with fixed capacity and price.
#[derive(Debug, Clone)]
pub struct Campaign {
    pub id: i64,
    pub title: String,
    /// 1-2 uppercase letters, globally unique.
    pub ticket_prefix: String,
    pub total_tickets: i64,
    pub sold_tickets: i64,
    pub status: CampaignStatus,
    /// Price per ticket in minor currency units.
    pub ticket_price: i64,
    pub draw_date: Option<String>,
}

impl Campaign {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.get("status");
        Ok(Self {
            id: row.get("id"),
            title: row.get("title"),
            ticket_prefix: row.get("ticket_prefix"),
            total_tickets: row.get("total_tickets"),
            sold_tickets: row.get("sold_tickets"),
            status: CampaignStatus::parse(&status)
                .ok_or_else(|| Error::Integrity(format!("unknown campaign status: {status}")))?,
            ticket_price: row.get("ticket_price"),
            draw_date: row.get("draw_date"),
        })
    }

    pub fn remaining_tickets(&self) -> i64 {
        self.total_tickets - self.sold_tickets
    }
}

/// A sold, uniquely numbered campaign entry eligible for the draw.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: i64,
    pub ticket_number: String,
    pub campaign_id: i64,
    pub user_id: i64,
    pub purchase_id: i64,
    pub status: TicketStatus,
    pub is_winner: bool,
    pub prize_category: Option<PrizeCategory>,
}

impl Ticket {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.get("status");
        let category: Option<String> = row.get("prize_category");
        let is_winner: i64 = row.get("is_winner");
        Ok(Self {
            id: row.get("id"),
            ticket_number: row.get("ticket_number"),
            campaign_id: row.get("campaign_id"),
            user_id: row.get("user_id"),
            purchase_id: row.get("purchase_id"),
            status: TicketStatus::parse(&status)
                .ok_or_else(|| Error::Integrity(format!("unknown ticket status: {status}")))?,
            is_winner: is_winner != 0,
            prize_category: category.as_deref().and_then(PrizeCategory::parse),
        })
    }
}

/// The commercial transaction record; source of truth for tickets owed.
#[derive(Debug, Clone)]
pub struct Purchase {
    pub id: i64,
    pub user_id: i64,
    pub campaign_id: i64,
    pub ticket_count: i64,
    pub total_amount: i64,
    pub payment_status: PaymentStatus,
    pub transaction_id: String,
    pub payment_provider: Option<String>,
    pub phone_number: Option<String>,
    pub completed_at: Option<String>,
}

impl Purchase {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.get("payment_status");
        Ok(Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            campaign_id: row.get("campaign_id"),
            ticket_count: row.get("ticket_count"),
            total_amount: row.get("total_amount"),
            payment_status: PaymentStatus::parse(&status)
                .ok_or_else(|| Error::Integrity(format!("unknown payment status: {status}")))?,
            transaction_id: row.get("transaction_id"),
            payment_provider: row.get("payment_provider"),
            phone_number: row.get("phone_number"),
            completed_at: row.get("completed_at"),
        })
    }
}

/// Per-user prepaid balance.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    /// Balance in minor currency units, never negative.
    pub balance: i64,
    pub currency: String,
}

impl Wallet {
    pub fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            balance: row.get("balance"),
            currency: row.get("currency"),
        }
    }
}

/// One ledger entry; balance_before/after are captured atomically with
/// the balance update for completed entries, NULL while pending.
#[derive(Debug, Clone)]
pub struct WalletTransaction {
    pub id: i64,
    pub wallet_id: i64,
    pub kind: WalletTxKind,
    pub amount: i64,
    pub balance_before: Option<i64>,
    pub balance_after: Option<i64>,
    pub reference: String,
    pub status: WalletTxStatus,
    pub description: Option<String>,
}

impl WalletTransaction {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let kind: String = row.get("tx_type");
        let status: String = row.get("status");
        Ok(Self {
            id: row.get("id"),
            wallet_id: row.get("wallet_id"),
            kind: WalletTxKind::parse(&kind)
                .ok_or_else(|| Error::Integrity(format!("unknown transaction type: {kind}")))?,
            amount: row.get("amount"),
            balance_before: row.get("balance_before"),
            balance_after: row.get("balance_after"),
            reference: row.get("reference"),
            status: WalletTxStatus::parse(&status)
                .ok_or_else(|| Error::Integrity(format!("unknown transaction status: {status}")))?,
            description: row.get("description"),
        })
    }
}

/// Width of the numeric part of a ticket number.
pub fn pad_length(total_tickets: i64) -> usize {
    let digits = total_tickets.max(1).to_string().len();
    digits.max(2)
}

/// Format a ticket number: `K{prefix}-{n padded to max(2, digits(total))}`.
pub fn format_ticket_number(prefix: &str, n: i64, total_tickets: i64) -> String {
    format!("K{}-{:0width$}", prefix, n, width = pad_length(total_tickets))
}

fn random_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| REF_CHARS[rng.random_range(0..REF_CHARS.len())] as char)
        .collect()
}

/// 16-character transaction id for external payment purchases.
pub fn new_transaction_id() -> String {
    random_suffix(16)
}

/// Wallet ledger reference, e.g. `WLT-4F8A0B2C91DE`.
pub fn new_wallet_reference() -> String {
    format!("WLT-{}", random_suffix(12))
}

/// Deposit reference, e.g. `WDEP-7K2M9QX0B4ZT`.
pub fn new_deposit_reference() -> String {
    format!("WDEP-{}", random_suffix(12))
}

/// Transaction id for wallet-funded purchases.
pub fn new_purchase_reference() -> String {
    format!("PUR-{}", random_suffix(12))
}

/// Invoice number: a time fragment plus random tail.
pub fn new_invoice_number() -> String {
    let millis = chrono::Utc::now().timestamp_millis().to_string();
    let fragment = &millis[millis.len().saturating_sub(8)..];
    format!("INV-{}-{}", fragment, random_suffix(4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_length_minimum_two() {
        assert_eq!(pad_length(5), 2);
        assert_eq!(pad_length(10), 2);
        assert_eq!(pad_length(99), 2);
        assert_eq!(pad_length(100), 3);
        assert_eq!(pad_length(1000), 4);
    }

    #[test]
    fn test_format_ticket_number() {
        assert_eq!(format_ticket_number("A", 1, 10), "KA-01");
        assert_eq!(format_ticket_number("A", 10, 10), "KA-10");
        assert_eq!(format_ticket_number("ZK", 7, 5000), "KZK-0007");
    }

    #[test]
    fn test_references_have_prefix_and_length() {
        let tx = new_transaction_id();
        assert_eq!(tx.len(), 16);
        assert!(tx.chars().all(|c| c.is_ascii_alphanumeric()));

        let wlt = new_wallet_reference();
        assert!(wlt.starts_with("WLT-"));
        assert_eq!(wlt.len(), 16);

        let dep = new_deposit_reference();
        assert!(dep.starts_with("WDEP-"));
        assert_eq!(dep.len(), 17);

        let inv = new_invoice_number();
        assert!(inv.starts_with("INV-"));
    }

    #[test]
    fn test_payment_status_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Expired.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in ["draft", "open", "closed", "completed"] {
            let parsed = CampaignStatus::parse(status).unwrap();
            assert_eq!(parsed.as_str(), status);
        }
        assert!(CampaignStatus::parse("bogus").is_none());
    }
}
