//! Version Validator - Validates semantic versioning (semver)
//!
//! Versions follow Semantic Versioning 2.0.0 with an optional leading `v`,
//! as used by Go module tags. Incomplete versions such as `v1.0` are
//! rejected.
//!
//! # Example
//!
//! ```
//! use release_distributor::validation::version_validator::parse_version;
//!
//! let info = parse_version("v1.2.3-rc.1").unwrap();
//! assert_eq!(info.major, 1);
//! assert_eq!(info.prerelease.as_deref(), Some("rc.1"));
//! assert!(parse_version("v1.0").is_err());
//! ```

use crate::core::error::Result;
use crate::core::release::Release;
use crate::core::traits::{PackageValidationResult, Validator};
use crate::validation::ValidationStrategy;
use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};

/// Parsed components of a version string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    /// Pre-release identifiers (e.g., "alpha.1")
    pub prerelease: Option<String>,
    /// Build metadata (e.g., "20130313144700")
    pub build: Option<String>,
}

/// Parse a version with an optional `v` prefix
pub fn parse_version(version: &str) -> std::result::Result<VersionInfo, String> {
    let bare = version.strip_prefix('v').unwrap_or(version);
    if bare.is_empty() {
        return Err("version is empty".to_string());
    }

    let parsed = Version::parse(bare).map_err(|e| e.to_string())?;
    Ok(VersionInfo {
        major: parsed.major,
        minor: parsed.minor,
        patch: parsed.patch,
        prerelease: (!parsed.pre.is_empty()).then(|| parsed.pre.to_string()),
        build: (!parsed.build.is_empty()).then(|| parsed.build.to_string()),
    })
}

pub fn is_valid_version(version: &str) -> bool {
    parse_version(version).is_ok()
}

/// Return the version with exactly one leading `v`
pub fn ensure_v_prefix(version: &str) -> String {
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{}", version)
    }
}

/// Checks the release version against the semver grammar
#[derive(Default)]
pub struct VersionValidator {
    strategy: Option<ValidationStrategy>,
}

impl VersionValidator {
    pub fn new() -> Self {
        Self { strategy: None }
    }

    /// Replace the validation body, e.g. with a test stub
    pub fn with_strategy(mut self, strategy: ValidationStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    fn check(release: &Release) -> PackageValidationResult {
        let mut result = PackageValidationResult::new();

        match parse_version(&release.version) {
            Ok(info) => {
                if info.prerelease.is_some() && !release.metadata.is_prerelease {
                    result.warning(
                        "PRERELEASE_MISMATCH",
                        "metadata.is_prerelease",
                        format!(
                            "Version {} has a prerelease suffix but the release is not marked as prerelease",
                            release.version
                        ),
                    );
                }
                result.metadata.insert(
                    "version".to_string(),
                    serde_json::to_value(&info).unwrap_or_default(),
                );
            }
            Err(e) => result.error(
                "INVALID_VERSION",
                "version",
                format!("Invalid semantic version '{}': {}", release.version, e),
            ),
        }

        result
    }
}

#[async_trait]
impl Validator for VersionValidator {
    fn name(&self) -> &str {
        "version"
    }

    async fn validate_release(&self, release: &Release) -> Result<PackageValidationResult> {
        match &self.strategy {
            Some(strategy) => strategy(release),
            None => Ok(Self::check(release)),
        }
    }
}
