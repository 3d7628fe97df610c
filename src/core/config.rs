//! Configuration structures and loading for release distribution
//!
//! Configuration is read from YAML or JSON, `${VAR}` references are
//! expanded from the environment, and the result is validated before use.

use crate::core::error::{DistributionError, Result};
use crate::core::retry::RetryPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Environment variable pattern (${VAR_NAME})
const ENV_VAR_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Orchestration policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DistributionConfig {
    /// Per-publisher settings keyed by publisher name
    pub publishers: HashMap<String, PublisherConfig>,

    /// Per-validator settings keyed by validator name
    pub validators: HashMap<String, ValidatorConfig>,

    /// Notification fan-out settings
    pub notifications: NotificationConfig,

    /// Backoff applied to every publisher retry loop
    pub retry_policy: RetryPolicy,

    /// Maximum simultaneously running publishers (0 = no limit)
    pub concurrent_limit: usize,
}

/// Publisher implementation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublisherKind {
    Github,
    GoModule,
    Homebrew,
}

impl PublisherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublisherKind::Github => "github",
            PublisherKind::GoModule => "go-module",
            PublisherKind::Homebrew => "homebrew",
        }
    }

    /// Infer the kind from a publisher name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "github" => Some(PublisherKind::Github),
            "go-module" | "go" | "gomodule" => Some(PublisherKind::GoModule),
            "homebrew" | "brew" => Some(PublisherKind::Homebrew),
            _ => None,
        }
    }
}

/// Settings for one publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Defaults to `true`: listing a publisher opts it in unless it says
    /// `enabled: false`. A publisher with no entry at all stays disabled.
    pub enabled: bool,

    /// Higher values start first when concurrency is limited
    pub priority: i32,

    /// Per-attempt time limit
    #[serde(with = "option_duration_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Overrides `retry_policy.max_retries` for this publisher
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,

    /// Implementation to build (inferred from the name when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<PublisherKind>,

    /// Publisher-specific settings
    pub config: HashMap<String, serde_json::Value>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 0,
            timeout: None,
            retry_count: None,
            kind: None,
            config: HashMap::new(),
        }
    }
}

impl PublisherConfig {
    pub fn resolved_kind(&self, name: &str) -> Option<PublisherKind> {
        self.kind.or_else(|| PublisherKind::from_name(name))
    }
}

/// Settings for one validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub enabled: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Notification channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    /// ANSI colouring (console channel only)
    pub colored: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            colored: true,
        }
    }
}

/// Notification fan-out settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,

    /// Backoff for individual channel sends
    pub retry_policy: RetryPolicy,

    /// Built-in channels keyed by name ("log", "console")
    pub channels: HashMap<String, ChannelConfig>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        let mut channels = HashMap::new();
        channels.insert("log".to_string(), ChannelConfig::default());
        Self {
            enabled: true,
            retry_policy: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
                multiplier: 2.0,
            },
            channels,
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "retry_policy.multiplier")
    pub field: String,
    pub message: String,
}

impl DistributionConfig {
    /// Load configuration from a YAML or JSON file
    ///
    /// The format is chosen by extension: `.json` is JSON, anything else YAML.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            DistributionError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let env: HashMap<String, String> = std::env::vars().collect();
        let expanded = expand_env_vars(&content, &env)?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let config = if is_json {
            Self::from_json_str(&expanded)?
        } else {
            Self::from_yaml_str(&expanded)?
        };

        let errors = config.validate();
        if !errors.is_empty() {
            let summary = errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DistributionError::Config(summary));
        }

        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| DistributionError::Config(format!("invalid YAML: {}", e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| DistributionError::Config(format!("invalid JSON: {}", e)))
    }

    /// Check semantic constraints serde cannot express
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        check_policy("retry_policy", &self.retry_policy, &mut errors);
        check_policy(
            "notifications.retry_policy",
            &self.notifications.retry_policy,
            &mut errors,
        );

        let mut names: Vec<&String> = self.publishers.keys().collect();
        names.sort();
        for name in names {
            let publisher = &self.publishers[name];
            if publisher.resolved_kind(name).is_none() {
                errors.push(ConfigValidationError {
                    field: format!("publishers.{}.kind", name),
                    message: "unknown publisher; set kind to github, go-module or homebrew"
                        .to_string(),
                });
            }
            if publisher.timeout == Some(Duration::ZERO) {
                errors.push(ConfigValidationError {
                    field: format!("publishers.{}.timeout", name),
                    message: "timeout must be greater than zero".to_string(),
                });
            }
        }

        errors
    }

    /// Effective retry policy for one publisher
    pub fn retry_policy_for(&self, name: &str) -> RetryPolicy {
        let mut policy = self.retry_policy.clone();
        if let Some(count) = self.publishers.get(name).and_then(|p| p.retry_count) {
            policy.max_retries = count;
        }
        policy
    }

    pub fn is_publisher_enabled(&self, name: &str) -> bool {
        self.publishers.get(name).map(|p| p.enabled).unwrap_or(false)
    }

    pub fn is_validator_enabled(&self, name: &str) -> bool {
        self.validators.get(name).map(|v| v.enabled).unwrap_or(true)
    }
}

fn check_policy(field: &str, policy: &RetryPolicy, errors: &mut Vec<ConfigValidationError>) {
    if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
        errors.push(ConfigValidationError {
            field: format!("{}.multiplier", field),
            message: format!("multiplier must be >= 1.0, got {}", policy.multiplier),
        });
    }
    if policy.base_delay > policy.max_delay {
        errors.push(ConfigValidationError {
            field: format!("{}.base_delay", field),
            message: "base_delay must not exceed max_delay".to_string(),
        });
    }
}

/// Replace `${VAR}` references with values from `env`
///
/// Unset variables are an error rather than silently becoming empty.
pub fn expand_env_vars(content: &str, env: &HashMap<String, String>) -> Result<String> {
    let regex = Regex::new(ENV_VAR_PATTERN)
        .map_err(|e| DistributionError::Config(format!("invalid env pattern: {}", e)))?;

    let mut missing = Vec::new();
    let expanded = regex.replace_all(content, |caps: &regex::Captures| {
        let name = &caps[1];
        match env.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(DistributionError::Config(format!(
            "undefined environment variable(s): {}",
            missing.join(", ")
        )));
    }

    Ok(expanded.into_owned())
}

fn parse_duration_value(value: DurationValue) -> std::result::Result<Duration, String> {
    match value {
        DurationValue::Millis(ms) => Ok(Duration::from_millis(ms)),
        DurationValue::Text(text) => {
            humantime::parse_duration(&text).map_err(|e| format!("invalid duration: {}", e))
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Millis(u64),
    Text(String),
}

/// Durations as milliseconds or human-readable strings ("500ms", "2s")
pub mod duration_serde {
    use super::{DurationValue, parse_duration_value};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        parse_duration_value(DurationValue::deserialize(deserializer)?)
            .map_err(serde::de::Error::custom)
    }
}

/// Optional variant of [`duration_serde`]
pub mod option_duration_serde {
    use super::{DurationValue, parse_duration_value};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<DurationValue>::deserialize(deserializer)?
            .map(parse_duration_value)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
