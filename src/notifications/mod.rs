//! Outbound notifications
//!
//! The engine hands events to a [`Notifier`] and moves on; the collaborator
//! decides where they go. The log-backed notifier is always available and
//! is the fallback when no Telegram credentials are configured.

pub mod types;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use types::Notification;

use crate::logger::{self, LogTag};
use async_trait::async_trait;

/// Fire-and-forget event sink
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Delivers notifications to the process log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        match &notification {
            Notification::ExitProtectionLost { .. } => {
                logger::error(LogTag::Notify, &notification.summary())
            }
            Notification::TrailingManualAction { .. } => {
                logger::warning(LogTag::Notify, &notification.summary())
            }
            _ => logger::info(LogTag::Notify, &notification.summary()),
        }
    }
}

#[cfg(test)]
pub mod capture {
    //! Test notifier that records everything it was handed

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct CaptureNotifier {
        events: Mutex<Vec<Notification>>,
    }

    impl CaptureNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<Notification> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for CaptureNotifier {
        async fn notify(&self, notification: Notification) {
            self.events.lock().unwrap().push(notification);
        }
    }
}
