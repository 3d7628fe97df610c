//! Built-in notification channels

use crate::core::error::{DistributionError, Result};
use crate::notification::{Notification, NotificationChannel, NotificationKind};
use async_trait::async_trait;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Writes notifications as structured tracing events
///
/// Success maps to `info`, failure to `error` and progress to `debug`.
pub struct LogChannel {
    enabled: bool,
}

impl LogChannel {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let id = notification.id.to_string();
        match notification.kind {
            NotificationKind::Success => info!(
                notification_id = %id,
                publisher = %notification.publisher,
                version = %notification.version,
                "{}",
                notification.message
            ),
            NotificationKind::Failure => error!(
                notification_id = %id,
                publisher = %notification.publisher,
                version = %notification.version,
                error = notification.error.as_deref().unwrap_or_default(),
                "{}",
                notification.message
            ),
            NotificationKind::Progress => debug!(
                notification_id = %id,
                publisher = %notification.publisher,
                "{}",
                notification.message
            ),
        }
        Ok(())
    }
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Prints one line per notification, optionally coloured by kind
pub struct ConsoleChannel {
    writer: SharedWriter,
    colored: bool,
    enabled: bool,
}

impl ConsoleChannel {
    pub fn stdout(colored: bool, enabled: bool) -> Self {
        Self::with_writer(std::io::stdout(), colored, enabled)
    }

    pub fn with_writer<W: Write + Send + 'static>(writer: W, colored: bool, enabled: bool) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            colored,
            enabled,
        }
    }

    fn format(&self, notification: &Notification) -> String {
        let (symbol, color) = match notification.kind {
            NotificationKind::Success => ("✓", GREEN),
            NotificationKind::Failure => ("✗", RED),
            NotificationKind::Progress => ("→", CYAN),
        };

        let line = format!("{} {}: {}", symbol, notification.title, notification.message);
        if self.colored {
            format!("{}{}{}\n", color, line, RESET)
        } else {
            format!("{}\n", line)
        }
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let line = self.format(notification);
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| DistributionError::NotificationFailed {
                channel: "console".to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::release::Release;
    use crate::core::retry::RetryPolicy;
    use crate::notification::NotificationService;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    async fn service_with(channel: ConsoleChannel) -> NotificationService {
        let service = NotificationService::new(true, RetryPolicy::none());
        service.register_channel(Arc::new(channel)).await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_console_plain_output() {
        let buffer = Buffer::default();
        let service = service_with(ConsoleChannel::with_writer(buffer.clone(), false, true)).await;

        service
            .notify_success("github", &Release::new("2.0.0", "v2.0.0"))
            .await
            .unwrap();

        assert_eq!(
            buffer.text(),
            "✓ Published v2.0.0 to github: Release 2.0.0 was published successfully to github\n"
        );
    }

    #[tokio::test]
    async fn test_console_colours_by_kind() {
        let buffer = Buffer::default();
        let service = service_with(ConsoleChannel::with_writer(buffer.clone(), true, true)).await;
        let release = Release::new("2.0.0", "v2.0.0");

        service
            .notify_failure("go", &release, &DistributionError::publish("go", "proxy down"))
            .await
            .unwrap();

        let text = buffer.text();
        assert!(text.starts_with(RED));
        assert!(text.ends_with(&format!("{}\n", RESET)));
        assert!(text.contains("proxy down"));
    }

    #[tokio::test]
    async fn test_disabled_console_is_skipped() {
        let buffer = Buffer::default();
        let service = service_with(ConsoleChannel::with_writer(buffer.clone(), false, false)).await;

        service
            .notify_success("github", &Release::new("2.0.0", "v2.0.0"))
            .await
            .unwrap();

        assert!(buffer.text().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let service = service_with(ConsoleChannel::with_writer(BrokenPipe, false, true)).await;

        let error = service
            .notify_success("github", &Release::new("2.0.0", "v2.0.0"))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn test_log_channel_never_fails() {
        let channel = LogChannel::new(true);
        let service = NotificationService::new(true, RetryPolicy::none());
        service.register_channel(Arc::new(channel)).await.unwrap();

        let release = Release::new("2.0.0", "v2.0.0");
        service.notify_success("github", &release).await.unwrap();
        service
            .notify_failure("github", &release, &DistributionError::Cancelled)
            .await
            .unwrap();
        service.notify_progress("github", &release, 0.25).await.unwrap();
    }
}
