//! Per-publisher status tracking
//!
//! Each publisher owns one [`StatusTracker`]. All mutation, including the
//! metadata map, happens under the tracker's lock so a concurrent
//! `status()` read always observes a consistent snapshot.

use crate::core::error::DistributionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lifecycle state of a publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    Idle,
    Publishing,
    Success,
    Error,
    Disabled,
}

impl StatusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusType::Idle => "idle",
            StatusType::Publishing => "publishing",
            StatusType::Success => "success",
            StatusType::Error => "error",
            StatusType::Disabled => "disabled",
        }
    }
}

/// Durable per-publisher state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishStatus {
    pub name: String,
    pub status: StatusType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_publish: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub publish_count: u64,
    pub error_count: u64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Lock-guarded owner of a [`PublishStatus`]
#[derive(Debug)]
pub struct StatusTracker {
    inner: Mutex<PublishStatus>,
}

impl StatusTracker {
    /// Create an idle tracker with metadata fixed at construction time
    pub fn new(name: impl Into<String>, metadata: HashMap<String, serde_json::Value>) -> Self {
        Self {
            inner: Mutex::new(PublishStatus {
                name: name.into(),
                status: StatusType::Idle,
                last_publish: None,
                last_error: None,
                publish_count: 0,
                error_count: 0,
                metadata,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PublishStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point-in-time copy of the status
    pub fn snapshot(&self) -> PublishStatus {
        self.lock().clone()
    }

    /// A fresh validation clears a previous terminal outcome
    pub fn reset_after_validation(&self) {
        let mut status = self.lock();
        if matches!(status.status, StatusType::Success | StatusType::Error) {
            status.status = StatusType::Idle;
        }
    }

    pub fn mark_publishing(&self) {
        let mut status = self.lock();
        if status.status != StatusType::Disabled {
            status.status = StatusType::Publishing;
        }
    }

    pub fn mark_disabled(&self) {
        self.lock().status = StatusType::Disabled;
    }

    pub fn record_success(&self) {
        let mut status = self.lock();
        if status.status != StatusType::Disabled {
            status.status = StatusType::Success;
        }
        status.last_publish = Some(Utc::now());
        status.last_error = None;
        status.publish_count += 1;
    }

    pub fn record_failure(&self, error: &DistributionError) {
        fail(&mut self.lock(), error.to_string());
    }

    /// Start one publish call; its outcome is recorded exactly once
    ///
    /// Dropping the returned [`PublishAttempt`] without calling
    /// [`PublishAttempt::finish`] records an interrupted failure, which is
    /// what happens when a timeout or cancellation drops the publish future.
    pub fn begin(&self) -> PublishAttempt<'_> {
        PublishAttempt {
            tracker: self,
            finished: false,
        }
    }

    /// Record the terminal outcome of one publish call
    pub fn record<T>(&self, outcome: &Result<T, DistributionError>) {
        match outcome {
            Ok(_) => self.record_success(),
            Err(error) => self.record_failure(error),
        }
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.lock().metadata.insert(key.into(), value.into());
    }
}

fn fail(status: &mut PublishStatus, message: String) {
    if status.status != StatusType::Disabled {
        status.status = StatusType::Error;
    }
    status.last_error = Some(message);
    status.error_count += 1;
}

/// Guard for one in-flight publish call
#[must_use = "call finish() with the publish outcome"]
pub struct PublishAttempt<'a> {
    tracker: &'a StatusTracker,
    finished: bool,
}

impl PublishAttempt<'_> {
    pub fn finish<T>(mut self, outcome: &Result<T, DistributionError>) {
        self.finished = true;
        self.tracker.record(outcome);
    }
}

impl Drop for PublishAttempt<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut status = self.tracker.lock();
        let error = DistributionError::publish(
            status.name.clone(),
            "publish interrupted before completion",
        );
        fail(&mut status, error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_tracker_is_idle() {
        let tracker = StatusTracker::new("github", HashMap::new());
        let status = tracker.snapshot();

        assert_eq!(status.name, "github");
        assert_eq!(status.status, StatusType::Idle);
        assert_eq!(status.publish_count, 0);
        assert_eq!(status.error_count, 0);
    }

    #[test]
    fn test_success_and_failure_transitions() {
        let tracker = StatusTracker::new("homebrew", HashMap::new());

        tracker.mark_publishing();
        assert_eq!(tracker.snapshot().status, StatusType::Publishing);

        tracker.record_failure(&DistributionError::publish("homebrew", "boom"));
        let status = tracker.snapshot();
        assert_eq!(status.status, StatusType::Error);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("[homebrew] boom"));

        tracker.reset_after_validation();
        assert_eq!(tracker.snapshot().status, StatusType::Idle);

        tracker.mark_publishing();
        tracker.record_success();
        let status = tracker.snapshot();
        assert_eq!(status.status, StatusType::Success);
        assert_eq!(status.publish_count, 1);
        assert_eq!(status.error_count, 1);
        assert!(status.last_error.is_none());
        assert!(status.last_publish.is_some());
    }

    #[test]
    fn test_finished_attempt_records_once() {
        let tracker = StatusTracker::new("github", HashMap::new());

        let attempt = tracker.begin();
        tracker.mark_publishing();
        attempt.finish(&Ok::<(), DistributionError>(()));

        let status = tracker.snapshot();
        assert_eq!(status.status, StatusType::Success);
        assert_eq!(status.publish_count, 1);
        assert_eq!(status.error_count, 0);
    }

    #[test]
    fn test_dropped_attempt_records_failure() {
        let tracker = StatusTracker::new("github", HashMap::new());

        {
            let _attempt = tracker.begin();
            tracker.mark_publishing();
        }

        let status = tracker.snapshot();
        assert_eq!(status.status, StatusType::Error);
        assert_eq!(status.error_count, 1);
        assert_eq!(
            status.last_error.as_deref(),
            Some("[github] publish interrupted before completion")
        );
    }

    #[tokio::test]
    async fn test_timed_out_future_records_failure() {
        let tracker = StatusTracker::new("slow", HashMap::new());

        let publish = async {
            let attempt = tracker.begin();
            tracker.mark_publishing();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            attempt.finish(&Ok::<(), DistributionError>(()));
        };
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(10), publish).await;

        assert!(timed_out.is_err());
        let status = tracker.snapshot();
        assert_eq!(status.status, StatusType::Error);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.publish_count, 0);
    }

    #[test]
    fn test_disabled_is_sticky() {
        let tracker = StatusTracker::new("go", HashMap::new());
        tracker.mark_disabled();

        tracker.reset_after_validation();
        tracker.mark_publishing();
        tracker.record_success();

        let status = tracker.snapshot();
        assert_eq!(status.status, StatusType::Disabled);
        assert_eq!(status.publish_count, 1);
    }

    #[test]
    fn test_concurrent_reads_and_writes() {
        let tracker = Arc::new(StatusTracker::new("race", HashMap::new()));

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        tracker.set_metadata(format!("k{}", i), j);
                        tracker.record_success();
                        let _ = tracker.snapshot();
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }

        let status = tracker.snapshot();
        assert_eq!(status.publish_count, 800);
        assert_eq!(status.metadata.len(), 8);
    }

    #[test]
    fn test_status_type_serialization() {
        let json = serde_json::to_string(&StatusType::Publishing).unwrap();
        assert_eq!(json, r#""publishing""#);
    }
}
