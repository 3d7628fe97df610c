//! Asset Validator - required assets and empty binaries
//!
//! Both findings are warnings: a release missing an expected platform can
//! still ship to the channels that do not need it.

use crate::core::error::Result;
use crate::core::release::{Binary, Release};
use crate::core::traits::{PackageValidationResult, Validator};
use crate::validation::ValidationStrategy;
use async_trait::async_trait;

fn matches_requirement(binary: &Binary, required: &str) -> bool {
    let required = required.to_lowercase();
    binary.platform.to_lowercase() == required
        || binary.key().to_lowercase() == required
        || binary.filename.to_lowercase().contains(&required)
}

/// Append asset warnings for `release` to `result`
///
/// A required asset is satisfied by a binary whose platform, key or
/// filename matches it.
pub fn check_assets(release: &Release, required: &[String], result: &mut PackageValidationResult) {
    for binary in release.binaries.values() {
        if binary.size == 0 {
            result.warning(
                "EMPTY_BINARY",
                &format!("binaries.{}", binary.key()),
                format!("Binary {} has size 0", binary.filename),
            );
        }
    }

    for asset in required {
        if !release
            .binaries
            .values()
            .any(|binary| matches_requirement(binary, asset))
        {
            result.warning(
                "MISSING_REQUIRED_ASSET",
                "binaries",
                format!("Required asset '{}' not found in release", asset),
            );
        }
    }
}

/// Warns on empty binaries and missing required assets
#[derive(Default)]
pub struct AssetValidator {
    required_assets: Vec<String>,
    strategy: Option<ValidationStrategy>,
}

impl AssetValidator {
    pub fn new(required_assets: Vec<String>) -> Self {
        Self {
            required_assets,
            strategy: None,
        }
    }

    /// Replace the validation body, e.g. with a test stub
    pub fn with_strategy(mut self, strategy: ValidationStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    fn check(&self, release: &Release) -> PackageValidationResult {
        let mut result = PackageValidationResult::new();

        if release.binaries.is_empty() {
            result.error("NO_BINARIES", "binaries", "Release contains no binaries");
            return result;
        }

        check_assets(release, &self.required_assets, &mut result);
        result
            .metadata
            .insert("binary_count".to_string(), release.binaries.len().into());
        result
    }
}

#[async_trait]
impl Validator for AssetValidator {
    fn name(&self) -> &str {
        "assets"
    }

    async fn validate_release(&self, release: &Release) -> Result<PackageValidationResult> {
        match &self.strategy {
            Some(strategy) => strategy(release),
            None => Ok(self.check(release)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn binary(platform: &str, arch: &str, size: u64) -> Binary {
        Binary {
            platform: platform.to_string(),
            architecture: arch.to_string(),
            filename: format!("tool_{}_{}.tar.gz", platform, arch),
            size,
            checksum: String::new(),
            download_url: String::new(),
            file_path: PathBuf::new(),
        }
    }

    fn required() -> Vec<String> {
        vec!["linux".to_string(), "windows".to_string(), "darwin".to_string()]
    }

    fn full_release() -> Release {
        Release::new("1.0.0", "v1.0.0")
            .with_binary(binary("linux", "amd64", 100))
            .with_binary(binary("windows", "amd64", 100))
            .with_binary(binary("darwin", "arm64", 100))
    }

    #[tokio::test]
    async fn test_all_required_assets_present() {
        let result = AssetValidator::new(required())
            .validate_release(&full_release())
            .await
            .unwrap();

        assert!(result.valid);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_asset() {
        let mut release = full_release();
        release.binaries.remove("windows-amd64");

        let result = AssetValidator::new(required())
            .validate_release(&release)
            .await
            .unwrap();

        assert_eq!(result.warning_codes(), vec!["MISSING_REQUIRED_ASSET"]);
    }

    #[tokio::test]
    async fn test_missing_asset_and_empty_binary() {
        let mut release = full_release().with_binary(binary("freebsd", "amd64", 0));
        release.binaries.remove("windows-amd64");

        let result = AssetValidator::new(required())
            .validate_release(&release)
            .await
            .unwrap();

        let codes = result.warning_codes();
        assert_eq!(codes.len(), 2);
        assert_eq!(codes.iter().filter(|c| **c == "MISSING_REQUIRED_ASSET").count(), 1);
        assert_eq!(codes.iter().filter(|c| **c == "EMPTY_BINARY").count(), 1);
        assert!(result.valid);
    }

    #[tokio::test]
    async fn test_no_binaries_is_an_error() {
        let release = Release::new("1.0.0", "v1.0.0");
        let result = AssetValidator::new(Vec::new())
            .validate_release(&release)
            .await
            .unwrap();

        assert!(!result.valid);
        assert_eq!(result.errors[0].code, "NO_BINARIES");
    }
}
