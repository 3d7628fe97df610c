//! Notification fan-out
//!
//! [`NotificationService`] turns publisher outcomes into [`Notification`]s
//! and sends each one to every enabled channel. Every send is retried with
//! the notification retry policy. A failing channel never fails the
//! distribution: the last channel error is returned for the caller to log.

pub mod channels;

use crate::core::config::NotificationConfig;
use crate::core::error::{DistributionError, Result};
use crate::core::release::Release;
use crate::core::retry::{RetryManager, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

pub use channels::{ConsoleChannel, LogChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Failure,
    Progress,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Failure => "failure",
            NotificationKind::Progress => "progress",
        }
    }
}

/// One event delivered to channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub publisher: String,
    pub version: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    fn new(kind: NotificationKind, publisher: &str, release: &Release) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: String::new(),
            message: String::new(),
            publisher: publisher.to_string(),
            version: release.version.clone(),
            tag: release.tag.clone(),
            error: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for notifications
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    async fn send(&self, notification: &Notification) -> Result<()>;
}

pub struct NotificationService {
    enabled: bool,
    retry: RetryPolicy,
    channels: RwLock<Vec<Arc<dyn NotificationChannel>>>,
}

impl NotificationService {
    pub fn new(enabled: bool, retry: RetryPolicy) -> Self {
        Self {
            enabled,
            retry,
            channels: RwLock::new(Vec::new()),
        }
    }

    /// Build a service with the built-in channels named in `config`
    ///
    /// Channels are registered in name order.
    pub async fn from_config(config: &NotificationConfig) -> Result<Self> {
        let service = Self::new(config.enabled, config.retry_policy.clone());

        let mut names: Vec<&String> = config.channels.keys().collect();
        names.sort();
        for name in names {
            let settings = &config.channels[name];
            let channel: Arc<dyn NotificationChannel> = match name.as_str() {
                "log" => Arc::new(LogChannel::new(settings.enabled)),
                "console" => Arc::new(ConsoleChannel::stdout(settings.colored, settings.enabled)),
                other => {
                    return Err(DistributionError::Config(format!(
                        "notifications.channels.{}: unknown channel",
                        other
                    )));
                }
            };
            service.register_channel(channel).await?;
        }

        Ok(service)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn register_channel(&self, channel: Arc<dyn NotificationChannel>) -> Result<()> {
        let mut channels = self.channels.write().await;
        if channels.iter().any(|c| c.name() == channel.name()) {
            return Err(DistributionError::AlreadyRegistered {
                kind: "notification channel",
                name: channel.name().to_string(),
            });
        }
        channels.push(channel);
        Ok(())
    }

    pub async fn channel_names(&self) -> Vec<String> {
        self.channels
            .read()
            .await
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    pub async fn notify_success(&self, publisher: &str, release: &Release) -> Result<()> {
        let mut notification = Notification::new(NotificationKind::Success, publisher, release);
        notification.title = format!("Published {} to {}", release.tag, publisher);
        notification.message = format!(
            "Release {} was published successfully to {}",
            release.version, publisher
        );
        self.dispatch(notification).await
    }

    pub async fn notify_failure(
        &self,
        publisher: &str,
        release: &Release,
        error: &DistributionError,
    ) -> Result<()> {
        let mut notification = Notification::new(NotificationKind::Failure, publisher, release);
        notification.title = format!("Failed to publish {} to {}", release.tag, publisher);
        notification.message = format!(
            "Publishing release {} to {} failed: {}",
            release.version, publisher, error
        );
        notification.error = Some(error.to_string());
        notification
            .metadata
            .insert("error_code".to_string(), error.code().into());
        self.dispatch(notification).await
    }

    /// `progress` is a fraction in `0.0..=1.0`
    pub async fn notify_progress(
        &self,
        publisher: &str,
        release: &Release,
        progress: f64,
    ) -> Result<()> {
        let percent = (progress.clamp(0.0, 1.0) * 100.0).round();
        let mut notification = Notification::new(NotificationKind::Progress, publisher, release);
        notification.title = format!("Publishing {} to {}", release.tag, publisher);
        notification.message = format!("{}: {}% complete", publisher, percent);
        notification
            .metadata
            .insert("progress".to_string(), percent.into());
        self.dispatch(notification).await
    }

    async fn dispatch(&self, notification: Notification) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let channels: Vec<Arc<dyn NotificationChannel>> = self.channels.read().await.clone();
        let retry = RetryManager::new(self.retry.clone());
        let never = CancellationToken::new();
        let mut last_error = None;

        for channel in channels.iter().filter(|c| c.is_enabled()) {
            let result = retry
                .retry(&never, channel.name(), |_attempt| channel.send(&notification))
                .await;
            if let Err(error) = result {
                warn!(
                    channel = channel.name(),
                    notification_id = %notification.id,
                    error = %error,
                    "notification delivery failed"
                );
                last_error = Some(error);
            }
        }

        match last_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
