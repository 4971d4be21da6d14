//! Seams for external collaborators.

pub mod notifier;

pub use notifier::{Notifier, TracingNotifier};
