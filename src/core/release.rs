//! Release data model
//!
//! A [`Release`] is produced by the external builder and handed to the
//! coordinator by reference; nothing in this crate mutates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One platform artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binary {
    pub platform: String,
    pub architecture: String,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub file_path: PathBuf,
}

impl Binary {
    /// Map key for this binary (`platform-arch`)
    pub fn key(&self) -> String {
        format!("{}-{}", self.platform, self.architecture)
    }
}

/// Build and provenance metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub commit_sha: String,
    #[serde(default)]
    pub build_number: String,
    #[serde(default)]
    pub is_prerelease: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub assets: Vec<String>,
}

impl Default for ReleaseMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            author: String::new(),
            commit_sha: String::new(),
            build_number: String::new(),
            is_prerelease: false,
            tags: Vec::new(),
            assets: Vec::new(),
        }
    }
}

/// Immutable shipment descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    pub tag: String,
    #[serde(default)]
    pub binaries: BTreeMap<String, Binary>,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    #[serde(default)]
    pub changelog: String,
    #[serde(default)]
    pub release_notes: String,
    #[serde(default)]
    pub metadata: ReleaseMetadata,
}

impl Release {
    pub fn new(version: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            tag: tag.into(),
            binaries: BTreeMap::new(),
            checksums: BTreeMap::new(),
            changelog: String::new(),
            release_notes: String::new(),
            metadata: ReleaseMetadata::default(),
        }
    }

    /// Add a binary under its `platform-arch` key, replacing any previous one
    pub fn with_binary(mut self, binary: Binary) -> Self {
        self.binaries.insert(binary.key(), binary);
        self
    }

    /// Known checksum for a binary, from the binary itself or the checksum map
    pub fn checksum_for<'a>(&'a self, binary: &'a Binary) -> Option<&'a str> {
        if !binary.checksum.is_empty() {
            return Some(binary.checksum.as_str());
        }
        self.checksums
            .get(&binary.filename)
            .map(String::as_str)
            .filter(|sum| !sum.is_empty())
    }

    /// Parse a release from its JSON representation
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
