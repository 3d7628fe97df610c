//! Pre-flight release validators
//!
//! Each validator can have its body replaced through `with_strategy`, so
//! tests can inject fixed outcomes without building a failing release.

pub mod asset_validator;
pub mod checksum_validator;
pub mod tag_validator;
pub mod version_validator;

use crate::core::error::Result;
use crate::core::release::Release;
use crate::core::traits::PackageValidationResult;
use std::sync::Arc;

/// Replacement body for a validator's `validate_release`
pub type ValidationStrategy =
    Arc<dyn Fn(&Release) -> Result<PackageValidationResult> + Send + Sync>;

pub use asset_validator::{AssetValidator, check_assets};
pub use checksum_validator::{ChecksumValidator, is_sha256_hex};
pub use tag_validator::{TagValidator, check_tag};
pub use version_validator::{VersionInfo, VersionValidator, ensure_v_prefix, is_valid_version, parse_version};
