//! Notification sink boundary.
//!
//! The presentation widget (toasts in the real client) is an external
//! collaborator; the channel only knows about three severity-leveled
//! "display message" operations. Hosts implement [`NotificationSink`] and
//! inject it when constructing the channel.

/// Severity-leveled display operations, implemented by the host UI.
pub trait NotificationSink: Send + Sync {
    /// Display a success message.
    fn success(&self, message: &str);

    /// Display an informational message.
    fn info(&self, message: &str);

    /// Display an error message.
    fn error(&self, message: &str);
}

/// Sink that routes messages to the log instead of a UI.
///
/// Useful for headless hosts and tests.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn success(&self, message: &str) {
        log::info!("[Notification] success: {}", message);
    }

    fn info(&self, message: &str) {
        log::info!("[Notification] {}", message);
    }

    fn error(&self, message: &str) {
        log::error!("[Notification] {}", message);
    }
}
