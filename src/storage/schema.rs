//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query
//! building, next to the DDL that creates them. The unique indexes on
//! (campaign_id, ticket_number) and on transaction references are the
//! last-resort guards behind the row-level locking.

use sea_query::Iden;

/// Campaigns table schema.
#[derive(Iden)]
pub enum Campaigns {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "title"]
    Title,
    #[iden = "ticket_prefix"]
    TicketPrefix,
    #[iden = "total_tickets"]
    TotalTickets,
    #[iden = "sold_tickets"]
    SoldTickets,
    #[iden = "status"]
    Status,
    #[iden = "ticket_price"]
    TicketPrice,
    #[iden = "draw_date"]
    DrawDate,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Ticket reservations table schema.
#[derive(Iden)]
pub enum TicketReservations {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "campaign_id"]
    CampaignId,
    #[iden = "user_id"]
    UserId,
    #[iden = "ticket_number"]
    TicketNumber,
    #[iden = "status"]
    Status,
    #[iden = "expires_at"]
    ExpiresAt,
    #[iden = "created_at"]
    CreatedAt,
}

/// Tickets table schema.
#[derive(Iden)]
pub enum Tickets {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "ticket_number"]
    TicketNumber,
    #[iden = "campaign_id"]
    CampaignId,
    #[iden = "user_id"]
    UserId,
    #[iden = "purchase_id"]
    PurchaseId,
    #[iden = "status"]
    Status,
    #[iden = "is_winner"]
    IsWinner,
    #[iden = "prize_category"]
    PrizeCategory,
    #[iden = "created_at"]
    CreatedAt,
}

/// Purchases table schema.
#[derive(Iden)]
pub enum Purchases {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "campaign_id"]
    CampaignId,
    #[iden = "ticket_count"]
    TicketCount,
    #[iden = "total_amount"]
    TotalAmount,
    #[iden = "payment_status"]
    PaymentStatus,
    #[iden = "transaction_id"]
    TransactionId,
    #[iden = "payment_provider"]
    PaymentProvider,
    #[iden = "phone_number"]
    PhoneNumber,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "completed_at"]
    CompletedAt,
}

/// Wallets table schema.
#[derive(Iden)]
pub enum Wallets {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "balance"]
    Balance,
    #[iden = "currency"]
    Currency,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Wallet transactions (ledger) table schema.
#[derive(Iden)]
pub enum WalletTransactions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "wallet_id"]
    WalletId,
    #[iden = "tx_type"]
    TxType,
    #[iden = "amount"]
    Amount,
    #[iden = "balance_before"]
    BalanceBefore,
    #[iden = "balance_after"]
    BalanceAfter,
    #[iden = "reference"]
    Reference,
    #[iden = "status"]
    Status,
    #[iden = "description"]
    Description,
    #[iden = "created_at"]
    CreatedAt,
}

/// Draw results table schema.
#[derive(Iden)]
pub enum DrawResults {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "campaign_id"]
    CampaignId,
    #[iden = "main_winner_ticket_id"]
    MainWinnerTicketId,
    #[iden = "draw_method"]
    DrawMethod,
    #[iden = "draw_date"]
    DrawDate,
}

/// Bonus winners table schema.
#[derive(Iden)]
pub enum BonusWinners {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "draw_result_id"]
    DrawResultId,
    #[iden = "ticket_id"]
    TicketId,
}

/// Invoices table schema.
#[derive(Iden)]
pub enum Invoices {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "purchase_id"]
    PurchaseId,
    #[iden = "user_id"]
    UserId,
    #[iden = "invoice_number"]
    InvoiceNumber,
    #[iden = "amount"]
    Amount,
    #[iden = "created_at"]
    CreatedAt,
}

/// Notifications table schema.
#[derive(Iden)]
pub enum Notifications {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "kind"]
    Kind,
    #[iden = "title"]
    Title,
    #[iden = "message"]
    Message,
    #[iden = "data"]
    Data,
    #[iden = "created_at"]
    CreatedAt,
}

/// Admin audit log table schema.
#[derive(Iden)]
pub enum AdminLogs {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "admin_id"]
    AdminId,
    #[iden = "action"]
    Action,
    #[iden = "entity_type"]
    EntityType,
    #[iden = "entity_id"]
    EntityId,
    #[iden = "details"]
    Details,
    #[iden = "created_at"]
    CreatedAt,
}

/// Key/value settings table schema (draw cooldown timestamp lives here).
#[derive(Iden)]
pub enum Settings {
    Table,
    #[iden = "key"]
    Key,
    #[iden = "value"]
    Value,
}

/// SQL for creating the campaigns table.
pub const CREATE_CAMPAIGNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS campaigns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    ticket_prefix TEXT NOT NULL UNIQUE,
    total_tickets INTEGER NOT NULL,
    sold_tickets INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'draft',
    ticket_price INTEGER NOT NULL,
    draw_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (sold_tickets <= total_tickets)
);
"#;

/// SQL for creating the ticket reservations table.
pub const CREATE_TICKET_RESERVATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ticket_reservations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
    user_id INTEGER NOT NULL,
    ticket_number TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'reserved',
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_reservations_campaign_number
    ON ticket_reservations(campaign_id, ticket_number);
CREATE INDEX IF NOT EXISTS idx_reservations_user
    ON ticket_reservations(campaign_id, user_id);
"#;

/// SQL for creating the tickets table.
pub const CREATE_TICKETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tickets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_number TEXT NOT NULL,
    campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
    user_id INTEGER NOT NULL,
    purchase_id INTEGER NOT NULL REFERENCES purchases(id),
    status TEXT NOT NULL DEFAULT 'active',
    is_winner INTEGER NOT NULL DEFAULT 0,
    prize_category TEXT,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_campaign_number
    ON tickets(campaign_id, ticket_number);
CREATE INDEX IF NOT EXISTS idx_tickets_purchase ON tickets(purchase_id);
CREATE INDEX IF NOT EXISTS idx_tickets_user ON tickets(user_id);
"#;

/// SQL for creating the purchases table.
pub const CREATE_PURCHASES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS purchases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
    ticket_count INTEGER NOT NULL,
    total_amount INTEGER NOT NULL,
    payment_status TEXT NOT NULL DEFAULT 'pending',
    transaction_id TEXT NOT NULL UNIQUE,
    payment_provider TEXT,
    phone_number TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_purchases_status ON purchases(payment_status);
CREATE INDEX IF NOT EXISTS idx_purchases_user ON purchases(user_id);
"#;

/// SQL for creating the wallets table.
pub const CREATE_WALLETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL UNIQUE,
    balance INTEGER NOT NULL DEFAULT 0,
    currency TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (balance >= 0)
);
"#;

/// SQL for creating the wallet transactions table.
pub const CREATE_WALLET_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallet_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    wallet_id INTEGER NOT NULL REFERENCES wallets(id),
    tx_type TEXT NOT NULL,
    amount INTEGER NOT NULL,
    balance_before INTEGER,
    balance_after INTEGER,
    reference TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'pending',
    description TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_wallet_tx_wallet ON wallet_transactions(wallet_id);
"#;

/// SQL for creating the draw results table.
pub const CREATE_DRAW_RESULTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS draw_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER NOT NULL UNIQUE REFERENCES campaigns(id),
    main_winner_ticket_id INTEGER NOT NULL REFERENCES tickets(id),
    draw_method TEXT NOT NULL,
    draw_date TEXT NOT NULL
);
"#;

/// SQL for creating the bonus winners table.
pub const CREATE_BONUS_WINNERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bonus_winners (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    draw_result_id INTEGER NOT NULL REFERENCES draw_results(id),
    ticket_id INTEGER NOT NULL REFERENCES tickets(id)
);
"#;

/// SQL for creating the invoices table.
pub const CREATE_INVOICES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    purchase_id INTEGER NOT NULL REFERENCES purchases(id),
    user_id INTEGER NOT NULL,
    invoice_number TEXT NOT NULL,
    amount INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// SQL for creating the notifications table.
pub const CREATE_NOTIFICATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    data TEXT,
    created_at TEXT NOT NULL
);
"#;

/// SQL for creating the admin logs table.
pub const CREATE_ADMIN_LOGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS admin_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    admin_id INTEGER,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id INTEGER,
    details TEXT,
    created_at TEXT NOT NULL
);
"#;

/// SQL for creating the settings table.
pub const CREATE_SETTINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// All DDL statements in dependency order.
pub const ALL_TABLES: &[&str] = &[
    CREATE_CAMPAIGNS_TABLE,
    CREATE_PURCHASES_TABLE,
    CREATE_TICKETS_TABLE,
    CREATE_TICKET_RESERVATIONS_TABLE,
    CREATE_WALLETS_TABLE,
    CREATE_WALLET_TRANSACTIONS_TABLE,
    CREATE_DRAW_RESULTS_TABLE,
    CREATE_BONUS_WINNERS_TABLE,
    CREATE_INVOICES_TABLE,
    CREATE_NOTIFICATIONS_TABLE,
    CREATE_ADMIN_LOGS_TABLE,
    CREATE_SETTINGS_TABLE,
];
