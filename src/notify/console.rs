use async_trait::async_trait;
use tracing::info;

use super::{NotificationError, Notifier};

/// Logs mail instead of sending it. Used when no SMTP relay is configured.
#[derive(Debug, Clone, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), NotificationError> {
        info!(to, subject, bytes = html_body.len(), "Mail (console transport)");
        Ok(())
    }
}
