//! Error taxonomy shared by all services.

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the ticketing core.
///
/// Validation, capacity and conflict errors are detected before any
/// mutation and returned directly. Anything that fails inside a
/// settlement, allocation or draw transaction rolls the whole
/// transaction back; partial ticket issuance or partial winner marking
/// is never observable.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Requested ticket numbers are no longer free.
    #[error("numbers no longer available: {taken:?}")]
    Conflict { taken: Vec<String> },

    /// Honoring the request would oversell the campaign.
    #[error("not enough tickets available: requested {requested}, available {available}")]
    Capacity { requested: u32, available: u32 },

    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    /// The allocator could not fill the requested count under the
    /// campaign lock. This is a bug signal; the transaction is rolled
    /// back and the failure logged loudly.
    #[error("allocation integrity failure: {0}")]
    Integrity(String),

    /// The draw throttle has not elapsed yet.
    #[error("draw cooldown active, retry in {remaining_secs}s")]
    CooldownActive { remaining_secs: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
