//! Tombola core - the correctness-critical subsystem of a lottery
//! ticketing platform.
//!
//! Covers collision-free ticket numbering with short-lived reservations,
//! the idempotent payment-settlement state machine, the constrained random
//! draw, and the wallet ledger backing balance-funded purchases. Page
//! rendering, delivery channels, auth and reporting are collaborators of
//! the interfaces exposed here, not part of this crate.

pub mod config;
pub mod error;
pub mod interfaces;
pub mod model;
pub mod services;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};

/// Install the global tracing subscriber.
///
/// The filter comes from `TOMBOLA_LOG` and defaults to `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(config::LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
