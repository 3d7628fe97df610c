//! Core traits and types for release distribution
//!
//! This module defines the publisher and validator abstractions together
//! with the validation result types they share.

use crate::core::error::{DistributionError, Result};
use crate::core::release::Release;
use crate::core::status::PublishStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Validation
// ============================================================================

/// Severity of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub code: String,
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

/// Result of a validator pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PackageValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    pub fn error(&mut self, code: &str, field: &str, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ValidationError {
            code: code.to_string(),
            field: field.to_string(),
            message: message.into(),
            severity: Severity::Error,
        });
    }

    pub fn warning(&mut self, code: &str, field: &str, message: impl Into<String>) {
        self.warnings.push(ValidationError {
            code: code.to_string(),
            field: field.to_string(),
            message: message.into(),
            severity: Severity::Warning,
        });
    }

    pub fn warning_codes(&self) -> Vec<&str> {
        self.warnings.iter().map(|w| w.code.as_str()).collect()
    }

    /// Convert into `Err` when any error was recorded
    pub fn into_result(self, name: &str) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let summary = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(DistributionError::ValidationFailed {
            name: name.to_string(),
            count: self.errors.len(),
            summary,
        })
    }
}

// ============================================================================
// Validator Trait
// ============================================================================

/// Pre-flight structural checker
#[async_trait]
pub trait Validator: Send + Sync {
    /// Unique validator name (e.g., "tag", "assets")
    fn name(&self) -> &str;

    /// Inspect the release and report every finding
    async fn validate_release(&self, release: &Release) -> Result<PackageValidationResult>;

    /// Fail when the release has any error-severity finding
    ///
    /// Warnings are logged and never fail validation.
    async fn validate(&self, release: &Release) -> Result<()> {
        let result = self.validate_release(release).await?;
        for warning in &result.warnings {
            tracing::warn!(
                validator = self.name(),
                code = %warning.code,
                field = %warning.field,
                "{}",
                warning.message
            );
        }
        result.into_result(self.name())
    }
}

// ============================================================================
// Publisher Trait
// ============================================================================

/// Channel-specific publishing component
///
/// Implementations own their [`PublishStatus`] and must never mutate the
/// release they are given. `publish` re-runs `validate` so a publisher can
/// be driven directly, without the coordinator.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Unique publisher name (e.g., "github", "homebrew")
    fn name(&self) -> &str;

    /// Channel-specific structural checks
    async fn validate(&self, cancel: &CancellationToken, release: &Release) -> Result<()>;

    /// Ship the release to this channel
    async fn publish(&self, cancel: &CancellationToken, release: &Release) -> Result<()>;

    /// Point-in-time status snapshot
    fn status(&self) -> PublishStatus;
}
