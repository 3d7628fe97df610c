//! Distribution Coordinator - publishes one release to every enabled channel
//!
//! Flow of a single [`DistributionCoordinator::distribute`] call:
//!
//! 1. enabled validators run sequentially; the first failure aborts
//! 2. enabled publishers are ordered by descending priority
//! 3. publishers are dispatched concurrently, bounded by a semaphore
//! 4. each publisher is retried with exponential backoff
//! 5. outcomes are reported to the notification service and aggregated

use crate::core::config::DistributionConfig;
use crate::core::error::{DistributionError, Result};
use crate::core::release::Release;
use crate::core::retry::{RetryManager, RetryPolicy, run_or_cancel};
use crate::core::status::PublishStatus;
use crate::core::traits::{PackageValidationResult, Publisher, Validator};
use crate::notification::NotificationService;
use crate::publishers::build_publisher;
use crate::validation::{AssetValidator, ChecksumValidator, TagValidator, VersionValidator};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Orchestrates validators and publishers for one release at a time
pub struct DistributionCoordinator {
    config: DistributionConfig,
    publishers: RwLock<Vec<Arc<dyn Publisher>>>,
    validators: RwLock<Vec<Arc<dyn Validator>>>,
    notifier: RwLock<Option<Arc<NotificationService>>>,
}

impl DistributionCoordinator {
    /// Create an empty coordinator; register publishers and validators next
    pub fn new(config: DistributionConfig) -> Self {
        Self {
            config,
            publishers: RwLock::new(Vec::new()),
            validators: RwLock::new(Vec::new()),
            notifier: RwLock::new(None),
        }
    }

    /// Create a coordinator with everything the configuration describes
    ///
    /// Publishers are registered in name order, disabled ones included so
    /// their status is reported. The built-in validators are registered
    /// and skipped at run time when disabled in `validators`.
    pub async fn from_config(config: DistributionConfig) -> Result<Self> {
        let notifier = NotificationService::from_config(&config.notifications).await?;
        if notifier.is_enabled() {
            debug!(channels = ?notifier.channel_names().await, "notifications enabled");
        }

        let mut names: Vec<&String> = config.publishers.keys().collect();
        names.sort();
        let mut publishers = Vec::with_capacity(names.len());
        for name in names {
            publishers.push(build_publisher(name, &config.publishers[name])?);
        }

        let coordinator = Self::new(config);
        for publisher in publishers {
            coordinator.register_publisher(publisher).await?;
        }

        let validators: [Arc<dyn Validator>; 4] = [
            Arc::new(VersionValidator::new()),
            Arc::new(TagValidator::new()),
            Arc::new(AssetValidator::new(Vec::new())),
            Arc::new(ChecksumValidator::new()),
        ];
        for validator in validators {
            coordinator.register_validator(validator).await?;
        }

        coordinator
            .set_notification_service(Some(Arc::new(notifier)))
            .await;
        Ok(coordinator)
    }

    pub async fn register_publisher(&self, publisher: Arc<dyn Publisher>) -> Result<()> {
        let mut publishers = self.publishers.write().await;
        if publishers.iter().any(|p| p.name() == publisher.name()) {
            return Err(DistributionError::AlreadyRegistered {
                kind: "publisher",
                name: publisher.name().to_string(),
            });
        }
        debug!(publisher = publisher.name(), "publisher registered");
        publishers.push(publisher);
        Ok(())
    }

    pub async fn register_validator(&self, validator: Arc<dyn Validator>) -> Result<()> {
        let mut validators = self.validators.write().await;
        if validators.iter().any(|v| v.name() == validator.name()) {
            return Err(DistributionError::AlreadyRegistered {
                kind: "validator",
                name: validator.name().to_string(),
            });
        }
        debug!(validator = validator.name(), "validator registered");
        validators.push(validator);
        Ok(())
    }

    /// Replace the notifier; `None` turns notifications off
    pub async fn set_notification_service(&self, notifier: Option<Arc<NotificationService>>) {
        *self.notifier.write().await = notifier;
    }

    async fn enabled_validators(&self) -> Vec<Arc<dyn Validator>> {
        self.validators
            .read()
            .await
            .iter()
            .filter(|v| self.config.is_validator_enabled(v.name()))
            .cloned()
            .collect()
    }

    /// Enabled publishers, highest priority first, ties in registration order
    async fn selected_publishers(&self) -> Vec<Arc<dyn Publisher>> {
        let mut selected: Vec<Arc<dyn Publisher>> = self
            .publishers
            .read()
            .await
            .iter()
            .filter(|p| self.config.is_publisher_enabled(p.name()))
            .cloned()
            .collect();

        let priority = |p: &Arc<dyn Publisher>| {
            self.config
                .publishers
                .get(p.name())
                .map(|c| c.priority)
                .unwrap_or_default()
        };
        selected.sort_by(|a, b| priority(b).cmp(&priority(a)));
        selected
    }

    async fn run_validators(&self, release: &Release) -> Result<()> {
        for validator in self.enabled_validators().await {
            debug!(validator = validator.name(), "running validator");
            validator
                .validate(release)
                .await
                .map_err(|source| DistributionError::PreflightFailed {
                    validator: validator.name().to_string(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }

    /// Run only the validator pass and report every finding
    pub async fn validate_release(
        &self,
        release: &Release,
    ) -> Result<Vec<(String, PackageValidationResult)>> {
        let mut results = Vec::new();
        for validator in self.enabled_validators().await {
            let result = validator.validate_release(release).await?;
            results.push((validator.name().to_string(), result));
        }
        Ok(results)
    }

    /// Publish `release` to every enabled publisher
    ///
    /// Returns `Cancelled` when the token fires, and `DistributionFailed`
    /// when any publisher exhausted its retries, even if others succeeded.
    pub async fn distribute(&self, cancel: &CancellationToken, release: &Release) -> Result<()> {
        info!(version = %release.version, tag = %release.tag, "starting distribution");

        self.run_validators(release).await?;

        let selected = self.selected_publishers().await;
        if selected.is_empty() {
            return Err(DistributionError::NoEnabledPublishers);
        }

        let limit = match self.config.concurrent_limit {
            0 => selected.len(),
            limit => limit.min(selected.len()),
        };
        let semaphore = Arc::new(Semaphore::new(limit));
        let release = Arc::new(release.clone());
        let notifier = self.notifier.read().await.clone();
        let mut tasks = JoinSet::new();

        for (index, publisher) in selected.into_iter().enumerate() {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|_| DistributionError::Cancelled)?
                }
            };

            let name = publisher.name().to_string();
            let policy = self.config.retry_policy_for(&name);
            let timeout = self.config.publishers.get(&name).and_then(|p| p.timeout);
            let cancel = cancel.clone();
            let release = Arc::clone(&release);
            let notifier = notifier.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let outcome =
                    publish_with_retry(&cancel, publisher.as_ref(), &release, policy, timeout).await;

                match &outcome {
                    Ok(()) => info!(publisher = %name, "publish succeeded"),
                    Err(e) => error!(publisher = %name, error = %e, "publish failed"),
                }

                if let Some(notifier) = &notifier {
                    let sent = match &outcome {
                        Ok(()) => notifier.notify_success(&name, &release).await,
                        Err(e) if e.is_cancelled() => Ok(()),
                        Err(e) => notifier.notify_failure(&name, &release, e).await,
                    };
                    if let Err(e) = sent {
                        warn!(publisher = %name, error = %e, "notification failed");
                    }
                }

                (index, name, outcome)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, _, Ok(()))) => {}
                Ok((index, name, Err(e))) => failures.push((index, format!("{}: {}", name, e))),
                Err(e) => failures.push((usize::MAX, format!("publisher task aborted: {}", e))),
            }
        }

        if cancel.is_cancelled() {
            warn!("distribution cancelled");
            return Err(DistributionError::Cancelled);
        }

        if !failures.is_empty() {
            failures.sort_by_key(|(index, _)| *index);
            return Err(DistributionError::DistributionFailed {
                count: failures.len(),
                summaries: failures.into_iter().map(|(_, summary)| summary).collect(),
            });
        }

        info!(tag = %release.tag, "distribution complete");
        Ok(())
    }

    /// Snapshot of every registered publisher's status
    pub async fn publisher_status(&self) -> BTreeMap<String, PublishStatus> {
        self.publishers
            .read()
            .await
            .iter()
            .map(|p| (p.name().to_string(), p.status()))
            .collect()
    }
}

async fn publish_with_retry(
    cancel: &CancellationToken,
    publisher: &dyn Publisher,
    release: &Release,
    policy: RetryPolicy,
    timeout: Option<Duration>,
) -> Result<()> {
    let name = publisher.name();
    RetryManager::new(policy)
        .retry(cancel, name, |attempt| async move {
            debug!(publisher = name, attempt, "publishing");
            let publish = run_or_cancel(cancel, publisher.publish(cancel, release));
            match timeout {
                Some(limit) => tokio::time::timeout(limit, publish)
                    .await
                    .unwrap_or_else(|_| {
                        Err(DistributionError::Timeout {
                            publisher: name.to_string(),
                            timeout: limit,
                        })
                    }),
                None => publish.await,
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PublisherConfig;
    use crate::core::retry::sleep_or_cancel;
    use crate::core::status::{StatusTracker, StatusType};
    use crate::notification::{Notification, NotificationChannel, NotificationKind};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Instant;

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
        started: Mutex<Vec<String>>,
    }

    struct MockPublisher {
        name: String,
        fail: bool,
        delay: Duration,
        calls: AtomicU32,
        gauge: Arc<Gauge>,
        status: StatusTracker,
    }

    impl MockPublisher {
        fn new(name: &str, fail: bool, delay: Duration, gauge: Arc<Gauge>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail,
                delay,
                calls: AtomicU32::new(0),
                gauge,
                status: StatusTracker::new(name, HashMap::new()),
            })
        }

        fn ok(name: &str) -> Arc<Self> {
            Self::new(name, false, Duration::ZERO, Arc::default())
        }

        fn failing(name: &str) -> Arc<Self> {
            Self::new(name, true, Duration::ZERO, Arc::default())
        }
    }

    #[async_trait]
    impl Publisher for MockPublisher {
        fn name(&self) -> &str {
            &self.name
        }

        async fn validate(&self, _cancel: &CancellationToken, _release: &Release) -> Result<()> {
            self.status.reset_after_validation();
            Ok(())
        }

        async fn publish(&self, cancel: &CancellationToken, release: &Release) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let attempt = self.status.begin();
            if let Err(e) = self.validate(cancel, release).await {
                let outcome = Err(e);
                attempt.finish(&outcome);
                return outcome;
            }
            self.status.mark_publishing();

            self.gauge.started.lock().unwrap().push(self.name.clone());
            let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(now, Ordering::SeqCst);
            let waited = sleep_or_cancel(cancel, self.delay).await;
            self.gauge.current.fetch_sub(1, Ordering::SeqCst);

            let outcome = waited.and_then(|_| {
                if self.fail {
                    Err(DistributionError::publish(&self.name, "remote rejected upload"))
                } else {
                    Ok(())
                }
            });
            attempt.finish(&outcome);
            outcome
        }

        fn status(&self) -> PublishStatus {
            self.status.snapshot()
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        received: Mutex<Vec<(NotificationKind, String)>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, notification: &Notification) -> Result<()> {
            self.received
                .lock()
                .unwrap()
                .push((notification.kind, notification.publisher.clone()));
            Ok(())
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }

    fn config_for(entries: &[(&str, i32)], max_retries: u32) -> DistributionConfig {
        let publishers = entries
            .iter()
            .map(|(name, priority)| {
                (
                    name.to_string(),
                    PublisherConfig {
                        priority: *priority,
                        ..PublisherConfig::default()
                    },
                )
            })
            .collect();
        DistributionConfig {
            publishers,
            retry_policy: fast_policy(max_retries),
            ..DistributionConfig::default()
        }
    }

    fn release() -> Release {
        Release::new("1.0.0", "v1.0.0")
    }

    #[tokio::test]
    async fn test_no_enabled_publishers() {
        let coordinator = DistributionCoordinator::new(DistributionConfig::default());
        let publisher = MockPublisher::ok("github");
        coordinator.register_publisher(publisher.clone()).await.unwrap();

        let error = coordinator
            .distribute(&CancellationToken::new(), &release())
            .await
            .unwrap_err();

        assert!(error.to_string().contains("no enabled publishers"));
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_validator_blocks_every_publisher() {
        let coordinator = DistributionCoordinator::new(config_for(&[("github", 0)], 0));
        let publisher = MockPublisher::ok("github");
        coordinator.register_publisher(publisher.clone()).await.unwrap();
        coordinator
            .register_validator(Arc::new(TagValidator::new().with_strategy(Arc::new(
                |_release: &Release| {
                    let mut result = PackageValidationResult::new();
                    result.error("STUB", "tag", "always fails");
                    Ok(result)
                },
            ))))
            .await
            .unwrap();

        let error = coordinator
            .distribute(&CancellationToken::new(), &release())
            .await
            .unwrap_err();

        assert!(error.to_string().contains("validation failed"));
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_validator_is_skipped() {
        let mut config = config_for(&[("github", 0)], 0);
        config
            .validators
            .insert("tag".to_string(), crate::core::config::ValidatorConfig { enabled: false });
        let coordinator = DistributionCoordinator::new(config);
        coordinator.register_publisher(MockPublisher::ok("github")).await.unwrap();
        coordinator
            .register_validator(Arc::new(TagValidator::new()))
            .await
            .unwrap();

        let bad_tag = Release::new("1.0.0", "1.0.0");
        coordinator
            .distribute(&CancellationToken::new(), &bad_tag)
            .await
            .unwrap();
        assert!(coordinator.validate_release(&bad_tag).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_is_aggregated_and_notified() {
        let coordinator =
            DistributionCoordinator::new(config_for(&[("A", 0), ("B", 0)], 1));
        let a = MockPublisher::failing("A");
        let b = MockPublisher::ok("B");
        coordinator.register_publisher(a.clone()).await.unwrap();
        coordinator.register_publisher(b.clone()).await.unwrap();

        let channel = Arc::new(RecordingChannel::default());
        let notifier = NotificationService::new(true, RetryPolicy::none());
        notifier.register_channel(channel.clone()).await.unwrap();
        coordinator
            .set_notification_service(Some(Arc::new(notifier)))
            .await;

        let error = coordinator
            .distribute(&CancellationToken::new(), &release())
            .await
            .unwrap_err();

        assert!(error.to_string().contains("publishing failed"));
        assert!(matches!(error, DistributionError::DistributionFailed { count: 1, .. }));
        assert_eq!(a.calls.load(Ordering::SeqCst), 2);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);

        let status = coordinator.publisher_status().await;
        assert_eq!(status["A"].status, StatusType::Error);
        assert_eq!(status["B"].status, StatusType::Success);

        let received = channel.received.lock().unwrap();
        let count = |kind, name: &str| {
            received
                .iter()
                .filter(|(k, n)| *k == kind && n == name)
                .count()
        };
        assert_eq!(count(NotificationKind::Failure, "A"), 1);
        assert_eq!(count(NotificationKind::Success, "B"), 1);
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn test_retry_count_overrides_global_policy() {
        let mut config = config_for(&[("A", 0)], 3);
        if let Some(entry) = config.publishers.get_mut("A") {
            entry.retry_count = Some(0);
        }
        let coordinator = DistributionCoordinator::new(config);
        let a = MockPublisher::failing("A");
        coordinator.register_publisher(a.clone()).await.unwrap();

        let error = coordinator
            .distribute(&CancellationToken::new(), &release())
            .await
            .unwrap_err();

        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert!(error.to_string().contains("failed after 1 attempt(s)"));
    }

    #[tokio::test]
    async fn test_oversized_concurrent_limit_is_clamped() {
        let mut config = config_for(&[("A", 0), ("B", 0)], 0);
        config.concurrent_limit = usize::MAX;
        let coordinator = DistributionCoordinator::new(config);
        coordinator.register_publisher(MockPublisher::ok("A")).await.unwrap();
        coordinator.register_publisher(MockPublisher::ok("B")).await.unwrap();

        coordinator
            .distribute(&CancellationToken::new(), &release())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_limit_is_honoured() {
        let gauge = Arc::new(Gauge::default());
        let names = ["p1", "p2", "p3", "p4", "p5"];
        let mut config = config_for(&names.map(|n| (n, 0)), 0);
        config.concurrent_limit = 2;
        let coordinator = DistributionCoordinator::new(config);
        for name in names {
            coordinator
                .register_publisher(MockPublisher::new(
                    name,
                    false,
                    Duration::from_millis(20),
                    Arc::clone(&gauge),
                ))
                .await
                .unwrap();
        }

        coordinator
            .distribute(&CancellationToken::new(), &release())
            .await
            .unwrap();

        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gauge.started.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_priority_decides_start_order() {
        let gauge = Arc::new(Gauge::default());
        let mut config = config_for(&[("low", 1), ("high", 10), ("mid", 5), ("mid2", 5)], 0);
        config.concurrent_limit = 1;
        let coordinator = DistributionCoordinator::new(config);
        for name in ["low", "high", "mid", "mid2"] {
            coordinator
                .register_publisher(MockPublisher::new(
                    name,
                    false,
                    Duration::from_millis(5),
                    Arc::clone(&gauge),
                ))
                .await
                .unwrap();
        }

        coordinator
            .distribute(&CancellationToken::new(), &release())
            .await
            .unwrap();

        assert_eq!(
            *gauge.started.lock().unwrap(),
            vec!["high", "mid", "mid2", "low"]
        );
    }

    #[tokio::test]
    async fn test_cancellation_returns_promptly() {
        let coordinator = DistributionCoordinator::new(config_for(&[("slow", 0)], 3));
        let slow = MockPublisher::new("slow", false, Duration::from_secs(30), Arc::default());
        coordinator.register_publisher(slow.clone()).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let error = coordinator.distribute(&cancel, &release()).await.unwrap_err();

        assert!(matches!(error, DistributionError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);

        let status = coordinator.publisher_status().await;
        assert_eq!(status["slow"].status, StatusType::Error);
        assert_eq!(status["slow"].error_count, 1);
    }

    #[tokio::test]
    async fn test_per_attempt_timeout() {
        let mut config = config_for(&[("slow", 0)], 1);
        if let Some(entry) = config.publishers.get_mut("slow") {
            entry.timeout = Some(Duration::from_millis(20));
        }
        let coordinator = DistributionCoordinator::new(config);
        coordinator
            .register_publisher(MockPublisher::new(
                "slow",
                false,
                Duration::from_secs(30),
                Arc::default(),
            ))
            .await
            .unwrap();

        let error = coordinator
            .distribute(&CancellationToken::new(), &release())
            .await
            .unwrap_err();

        assert!(error.to_string().contains("timed out"));

        let status = coordinator.publisher_status().await;
        assert_eq!(status["slow"].status, StatusType::Error);
        assert_eq!(status["slow"].error_count, 2);
        assert_eq!(status["slow"].publish_count, 0);
        assert_eq!(
            status["slow"].last_error.as_deref(),
            Some("[slow] publish interrupted before completion")
        );
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let coordinator = DistributionCoordinator::new(DistributionConfig::default());
        coordinator.register_publisher(MockPublisher::ok("github")).await.unwrap();
        let error = coordinator
            .register_publisher(MockPublisher::ok("github"))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("already registered"));

        coordinator
            .register_validator(Arc::new(TagValidator::new()))
            .await
            .unwrap();
        assert!(
            coordinator
                .register_validator(Arc::new(TagValidator::new()))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_validate_release_reports_findings() {
        let coordinator = DistributionCoordinator::new(DistributionConfig::default());
        coordinator
            .register_validator(Arc::new(VersionValidator::new()))
            .await
            .unwrap();
        coordinator
            .register_validator(Arc::new(AssetValidator::new(Vec::new())))
            .await
            .unwrap();

        let results = coordinator.validate_release(&release()).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "version");
        assert!(results[0].1.valid);
        assert_eq!(results[1].1.errors[0].code, "NO_BINARIES");
    }

    #[tokio::test]
    async fn test_from_config_registers_configured_publishers() {
        let yaml = r#"
publishers:
  github:
    config:
      owner: acme
      repo: tool
  homebrew:
    enabled: false
    config:
      formula_name: tool
notifications:
  enabled: false
"#;
        let config = DistributionConfig::from_yaml_str(yaml).unwrap();
        let coordinator = DistributionCoordinator::from_config(config).await.unwrap();

        let status = coordinator.publisher_status().await;
        assert_eq!(status.keys().collect::<Vec<_>>(), vec!["github", "homebrew"]);
        assert_eq!(status["github"].status, StatusType::Idle);
        assert_eq!(status["homebrew"].status, StatusType::Disabled);
        assert_eq!(coordinator.enabled_validators().await.len(), 4);
    }
}
