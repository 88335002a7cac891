//! Outbound notification channel.
//!
//! The orchestrator only sees the `Notifier` trait. `TelegramNotifier` talks
//! to the bot API, `ConsoleNotifier` logs instead of sending (dry runs).

mod telegram;

pub use telegram::{TelegramNotifier, DEFAULT_API_BASE};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Photo and text delivery. Implementations must be usable from the
/// orchestrator thread and must not panic on delivery failure.
pub trait Notifier: Send + Sync {
    fn send_photo(&self, jpeg: &[u8], caption: &str) -> Result<(), NotifyError>;

    fn send_message(&self, text: &str) -> Result<(), NotifyError>;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn send_photo(&self, jpeg: &[u8], caption: &str) -> Result<(), NotifyError> {
        log::info!("ConsoleNotifier: photo ({} bytes): {}", jpeg.len(), caption);
        Ok(())
    }

    fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        log::info!("ConsoleNotifier: {}", text);
        Ok(())
    }
}
