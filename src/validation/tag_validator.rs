//! Tag Validator - release tags must be `v`-prefixed versions

use crate::core::error::Result;
use crate::core::release::Release;
use crate::core::traits::{PackageValidationResult, Validator};
use crate::validation::ValidationStrategy;
use crate::validation::version_validator::is_valid_version;
use async_trait::async_trait;

/// Check a release tag, returning a reason when it is rejected
///
/// # Examples
///
/// ```
/// use release_distributor::validation::tag_validator::check_tag;
///
/// assert!(check_tag("v1.2.3-alpha").is_ok());
/// assert!(check_tag("1.0.0").is_err());
/// ```
pub fn check_tag(tag: &str) -> std::result::Result<(), String> {
    if tag.is_empty() {
        return Err("tag is empty".to_string());
    }
    if !tag.starts_with('v') {
        return Err(format!("tag '{}' must start with 'v'", tag));
    }
    if !is_valid_version(tag) {
        return Err(format!("tag '{}' is not a semantic version", tag));
    }
    Ok(())
}

/// Checks the release tag format and its agreement with the version
#[derive(Default)]
pub struct TagValidator {
    strategy: Option<ValidationStrategy>,
}

impl TagValidator {
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

        if let Err(reason) = check_tag(&release.tag) {
            result.error("INVALID_TAG", "tag", reason);
            return result;
        }

        let tag_version = release.tag.trim_start_matches('v');
        let version = release.version.trim_start_matches('v');
        if tag_version != version {
            result.warning(
                "TAG_VERSION_MISMATCH",
                "tag",
                format!(
                    "Tag {} does not match version {}",
                    release.tag, release.version
                ),
            );
        }

        result
    }
}

#[async_trait]
impl Validator for TagValidator {
    fn name(&self) -> &str {
        "tag"
    }

    async fn validate_release(&self, release: &Release) -> Result<PackageValidationResult> {
        match &self.strategy {
            Some(strategy) => strategy(release),
            None => Ok(Self::check(release)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::DistributionError;
    use std::sync::Arc;

    #[test]
    fn test_accepts_valid_tags() {
        assert!(check_tag("v1.0.0").is_ok());
        assert!(check_tag("v1.2.3-alpha").is_ok());
    }

    #[test]
    fn test_rejects_invalid_tags() {
        for tag in ["1.0.0", "", "invalid"] {
            assert!(check_tag(tag).is_err(), "Expected '{}' to be rejected", tag);
        }
    }

    #[tokio::test]
    async fn test_validator_fails_on_missing_prefix() {
        let release = Release::new("1.0.0", "1.0.0");
        let error = TagValidator::new().validate(&release).await.unwrap_err();

        assert!(matches!(error, DistributionError::ValidationFailed { count: 1, .. }));
        assert!(error.to_string().contains("must start with 'v'"));
    }

    #[tokio::test]
    async fn test_validator_warns_on_version_mismatch() {
        let release = Release::new("1.0.1", "v1.0.0");
        let result = TagValidator::new().validate_release(&release).await.unwrap();

        assert!(result.valid);
        assert_eq!(result.warning_codes(), vec!["TAG_VERSION_MISMATCH"]);
    }

    #[tokio::test]
    async fn test_strategy_override_can_fail() {
        let validator = TagValidator::new().with_strategy(Arc::new(|_release: &Release| {
            let mut result = PackageValidationResult::new();
            result.error("STUB", "tag", "always fails");
            Ok(result)
        }));

        let release = Release::new("1.0.0", "v1.0.0");
        assert!(validator.validate(&release).await.is_err());
    }
}
