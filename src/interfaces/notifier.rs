//! Delivery-channel seam.
//!
//! Push, email and SMS delivery are external glue. Services call the
//! [`Notifier`] after their transaction commits; a failed delivery is
//! logged and never rolls back settlement or draw results.

use async_trait::async_trait;
use tracing::info;

/// Result type for delivery attempts.
pub type DeliveryResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Fire-and-forget delivery to a user.
///
/// Implementations wrap whatever channels the platform has wired up.
/// They must not assume the caller retries: a returned error is logged
/// and dropped.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message to one user.
    async fn notify(
        &self,
        user_id: i64,
        kind: &str,
        title: &str,
        message: &str,
        data: serde_json::Value,
    ) -> DeliveryResult;
}

/// Default sink that records deliveries in the log stream.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        user_id: i64,
        kind: &str,
        title: &str,
        _message: &str,
        _data: serde_json::Value,
    ) -> DeliveryResult {
        info!(user_id, kind, title, "notification dispatched");
        Ok(())
    }
}
