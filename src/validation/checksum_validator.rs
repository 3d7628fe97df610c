//! Checksum Validator - sha256 digests for every binary

use crate::core::error::Result;
use crate::core::release::Release;
use crate::core::traits::{PackageValidationResult, Validator};
use crate::validation::ValidationStrategy;
use async_trait::async_trait;

/// Length of a hex-encoded sha256 digest
pub const SHA256_HEX_LEN: usize = 64;

pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == SHA256_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Checks digest format and agreement between binaries and the checksum map
#[derive(Default)]
pub struct ChecksumValidator {
    strategy: Option<ValidationStrategy>,
}

impl ChecksumValidator {
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

        for binary in release.binaries.values() {
            let field = format!("binaries.{}.checksum", binary.key());
            let mapped = release.checksums.get(&binary.filename);

            match release.checksum_for(binary) {
                None => result.warning(
                    "MISSING_CHECKSUM",
                    &field,
                    format!("No checksum recorded for {}", binary.filename),
                ),
                Some(sum) if !is_sha256_hex(sum) => result.error(
                    "INVALID_CHECKSUM",
                    &field,
                    format!("Checksum for {} is not a sha256 hex digest", binary.filename),
                ),
                Some(sum) => {
                    if let Some(other) = mapped
                        && !other.eq_ignore_ascii_case(sum)
                    {
                        result.error(
                            "CHECKSUM_MISMATCH",
                            &field,
                            format!(
                                "Binary checksum for {} disagrees with the checksum map",
                                binary.filename
                            ),
                        );
                    }
                }
            }
        }

        for filename in release.checksums.keys() {
            if !release.binaries.values().any(|b| &b.filename == filename) {
                result.warning(
                    "ORPHAN_CHECKSUM",
                    "checksums",
                    format!("Checksum listed for unknown file {}", filename),
                );
            }
        }

        result
    }
}

#[async_trait]
impl Validator for ChecksumValidator {
    fn name(&self) -> &str {
        "checksums"
    }

    async fn validate_release(&self, release: &Release) -> Result<PackageValidationResult> {
        match &self.strategy {
            Some(strategy) => strategy(release),
            None => Ok(Self::check(release)),
        }
    }
}
