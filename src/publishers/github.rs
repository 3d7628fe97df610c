//! GitHub Releases publisher
//!
//! Creates a release through the REST API, then uploads every binary and a
//! `checksums.txt` manifest to the release's upload endpoint.

use crate::core::config::option_duration_serde;
use crate::core::error::{DistributionError, Result};
use crate::core::release::{Binary, Release};
use crate::core::status::{PublishStatus, StatusTracker};
use crate::core::traits::{PackageValidationResult, Publisher};
use crate::publishers::{expect_status, finish_validation, http_client, network, send};
use crate::security::SecureTokenManager;
use crate::validation::check_assets;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const CHECKSUMS_FILE: &str = "checksums.txt";

/// Publisher-specific settings from `publishers.<name>.config`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub owner: String,
    pub repo: String,
    /// Falls back to `GITHUB_TOKEN` / `GH_TOKEN`
    pub token: Option<SecretString>,
    pub base_url: String,
    pub target_commitish: String,
    pub draft: bool,
    /// Overrides `metadata.is_prerelease` when set
    pub prerelease: Option<bool>,
    pub generate_release_notes: bool,
    pub auto_changelog: bool,
    pub required_assets: Vec<String>,
    #[serde(with = "option_duration_serde")]
    pub timeout: Option<Duration>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            token: None,
            base_url: "https://api.github.com".to_string(),
            target_commitish: "main".to_string(),
            draft: false,
            prerelease: None,
            generate_release_notes: false,
            auto_changelog: false,
            required_assets: Vec::new(),
            timeout: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateReleaseRequest<'a> {
    tag_name: &'a str,
    target_commitish: &'a str,
    name: &'a str,
    body: String,
    draft: bool,
    prerelease: bool,
    generate_release_notes: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedRelease {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    html_url: String,
    upload_url: String,
}

pub struct GithubPublisher {
    name: String,
    config: GithubConfig,
    tokens: SecureTokenManager,
    client: reqwest::Client,
    status: StatusTracker,
}

impl GithubPublisher {
    pub fn new(name: impl Into<String>, config: GithubConfig) -> Result<Self> {
        let name = name.into();
        let client = http_client(&name, config.timeout)?;

        let mut metadata = HashMap::new();
        metadata.insert("owner".to_string(), config.owner.clone().into());
        metadata.insert("repo".to_string(), config.repo.clone().into());

        Ok(Self {
            status: StatusTracker::new(name.clone(), metadata),
            name,
            config,
            tokens: SecureTokenManager::new(),
            client,
        })
    }

    /// Replace the token lookup (e.g. to read different variables)
    pub fn with_token_manager(mut self, tokens: SecureTokenManager) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn disable(&self) {
        self.status.mark_disabled();
    }

    fn token(&self) -> Option<SecretString> {
        self.tokens.resolve("github", self.config.token.as_ref())
    }

    fn check(&self, release: &Release) -> PackageValidationResult {
        let mut result = PackageValidationResult::new();

        if !release.tag.starts_with('v') {
            result.error(
                "INVALID_TAG",
                "tag",
                format!("Tag '{}' must start with 'v'", release.tag),
            );
        }
        if self.config.owner.trim().is_empty() {
            result.error("MISSING_OWNER", "config.owner", "Repository owner is not configured");
        }
        if self.config.repo.trim().is_empty() {
            result.error("MISSING_REPO", "config.repo", "Repository name is not configured");
        }
        if self.token().is_none() {
            result.error(
                "MISSING_TOKEN",
                "config.token",
                "No GitHub token configured and GITHUB_TOKEN/GH_TOKEN are unset",
            );
        }
        if release.changelog.trim().is_empty() && !self.config.auto_changelog {
            result.warning("MISSING_CHANGELOG", "changelog", "Release has no changelog");
        }

        for binary in release.binaries.values() {
            if binary.file_path.as_os_str().is_empty() {
                result.error(
                    "MISSING_FILE_PATH",
                    &format!("binaries.{}", binary.key()),
                    format!("Binary {} has no local file to upload", binary.filename),
                );
            }
        }

        check_assets(release, &self.config.required_assets, &mut result);
        result
    }

    async fn create_release(
        &self,
        cancel: &CancellationToken,
        release: &Release,
        token: &SecretString,
    ) -> Result<CreatedRelease> {
        let body = if self.config.auto_changelog {
            generate_changelog(release)
        } else if !release.release_notes.is_empty() {
            release.release_notes.clone()
        } else {
            release.changelog.clone()
        };

        let payload = CreateReleaseRequest {
            tag_name: &release.tag,
            target_commitish: &self.config.target_commitish,
            name: &release.tag,
            body,
            draft: self.config.draft,
            prerelease: self
                .config
                .prerelease
                .unwrap_or(release.metadata.is_prerelease),
            generate_release_notes: self.config.generate_release_notes,
        };

        let url = format!(
            "{}/repos/{}/{}/releases",
            self.config.base_url.trim_end_matches('/'),
            self.config.owner,
            self.config.repo
        );
        debug!(publisher = %self.name, %url, tag = %release.tag, "creating release");

        let request = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("token {}", token.expose_secret()))
            .header(ACCEPT, GITHUB_ACCEPT)
            .json(&payload);
        let response = send(cancel, &self.name, request).await?;
        let response = expect_status(&self.name, response, StatusCode::CREATED, Some(token)).await?;

        response
            .json::<CreatedRelease>()
            .await
            .map_err(|source| network(&self.name, source))
    }

    async fn upload_asset(
        &self,
        cancel: &CancellationToken,
        upload_url: &str,
        token: &SecretString,
        filename: &str,
        body: Vec<u8>,
    ) -> Result<()> {
        let endpoint = upload_endpoint(upload_url, filename)
            .map_err(|e| DistributionError::publish(&self.name, e))?;
        debug!(publisher = %self.name, asset = filename, bytes = body.len(), "uploading asset");

        let request = self
            .client
            .post(endpoint)
            .header(AUTHORIZATION, format!("token {}", token.expose_secret()))
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(CONTENT_TYPE, content_type(filename))
            .body(body);
        let response = send(cancel, &self.name, request).await?;
        expect_status(&self.name, response, StatusCode::CREATED, Some(token)).await?;
        Ok(())
    }

    async fn read_binary(&self, binary: &Binary) -> Result<Vec<u8>> {
        tokio::fs::read(&binary.file_path).await.map_err(|e| {
            DistributionError::publish(
                &self.name,
                format!("failed to read {}: {}", binary.file_path.display(), e),
            )
        })
    }

    async fn publish_release(&self, cancel: &CancellationToken, release: &Release) -> Result<()> {
        let token = self.token().ok_or_else(|| {
            DistributionError::publish(&self.name, "no GitHub token available")
        })?;

        debug!(
            publisher = %self.name,
            token = %SecureTokenManager::mask_token(token.expose_secret()),
            "using GitHub token"
        );
        let created = self.create_release(cancel, release, &token).await?;
        info!(publisher = %self.name, release_id = created.id, url = %created.html_url, "release created");
        self.status.set_metadata("release_url", created.html_url.clone());
        self.status.set_metadata("release_id", created.id);

        let mut manifest = String::new();
        for binary in release.binaries.values() {
            let bytes = self.read_binary(binary).await?;
            let checksum = match release.checksum_for(binary) {
                Some(sum) => sum.to_string(),
                None => hex::encode(Sha256::digest(&bytes)),
            };
            manifest.push_str(&format!("{}  {}\n", checksum, binary.filename));

            self.upload_asset(cancel, &created.upload_url, &token, &binary.filename, bytes)
                .await?;
        }

        self.upload_asset(
            cancel,
            &created.upload_url,
            &token,
            CHECKSUMS_FILE,
            manifest.into_bytes(),
        )
        .await?;

        self.status
            .set_metadata("assets_uploaded", release.binaries.len() + 1);
        info!(publisher = %self.name, assets = release.binaries.len() + 1, "assets uploaded");
        Ok(())
    }
}

#[async_trait]
impl Publisher for GithubPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self, cancel: &CancellationToken, release: &Release) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(DistributionError::Cancelled);
        }
        self.status.reset_after_validation();
        finish_validation(&self.name, self.check(release))
    }

    async fn publish(&self, cancel: &CancellationToken, release: &Release) -> Result<()> {
        let attempt = self.status.begin();
        let outcome = async {
            self.validate(cancel, release).await?;
            self.status.mark_publishing();
            self.publish_release(cancel, release).await
        }
        .await;

        attempt.finish(&outcome);
        outcome
    }

    fn status(&self) -> PublishStatus {
        self.status.snapshot()
    }
}

/// Turn an `upload_url` template into the endpoint for one asset
///
/// The `{?name,label}` template suffix is stripped and `?name=` appended.
///
/// ```
/// use release_distributor::publishers::upload_endpoint;
///
/// let url = upload_endpoint(
///     "https://uploads.github.com/repos/o/r/releases/1/assets{?name,label}",
///     "tool.zip",
/// )
/// .unwrap();
/// assert_eq!(url.as_str(), "https://uploads.github.com/repos/o/r/releases/1/assets?name=tool.zip");
/// ```
pub fn upload_endpoint(template: &str, filename: &str) -> std::result::Result<Url, String> {
    let base = template.split('{').next().unwrap_or(template);
    let mut url = Url::parse(base).map_err(|e| format!("invalid upload URL '{}': {}", base, e))?;
    url.set_query(None);
    url.query_pairs_mut().append_pair("name", filename);
    Ok(url)
}

fn content_type(filename: &str) -> &'static str {
    let lower = filename.to_lowercase();
    if lower.ends_with(".zip") {
        "application/zip"
    } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        "application/gzip"
    } else if lower.ends_with(".txt") {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

fn os_label(platform: &str) -> Option<&'static str> {
    match platform.to_lowercase().as_str() {
        "darwin" | "macos" => Some("macOS"),
        "linux" => Some("Linux"),
        "windows" => Some("Windows"),
        _ => None,
    }
}

/// Render release notes with install steps, a checksum table and a
/// change list
///
/// Output depends only on the release contents.
pub fn generate_changelog(release: &Release) -> String {
    let mut out = format!("## {}\n\n", release.tag);

    if !release.changelog.trim().is_empty() {
        out.push_str(release.changelog.trim());
        out.push_str("\n\n");
    }

    out.push_str("### Installation\n\n");
    for label in ["macOS", "Linux", "Windows"] {
        let binaries: Vec<&Binary> = release
            .binaries
            .values()
            .filter(|b| os_label(&b.platform) == Some(label))
            .collect();
        if binaries.is_empty() {
            continue;
        }

        out.push_str(&format!("#### {}\n\n", label));
        for binary in binaries {
            let source = if binary.download_url.is_empty() {
                binary.filename.as_str()
            } else {
                binary.download_url.as_str()
            };
            if label == "Windows" {
                out.push_str(&format!(
                    "Download [{}]({}) ({}) and add it to your `PATH`.\n\n",
                    binary.filename, source, binary.architecture
                ));
            } else {
                out.push_str(&format!(
                    "```bash\n# {}\ncurl -LO {}\n```\n\n",
                    binary.architecture, source
                ));
            }
        }
    }

    out.push_str("### Checksums\n\n| File | SHA256 |\n|------|--------|\n");
    for binary in release.binaries.values() {
        let checksum = release.checksum_for(binary).unwrap_or("-");
        out.push_str(&format!("| {} | `{}` |\n", binary.filename, checksum));
    }

    out.push_str("\n### What's Changed\n\n");
    out.push_str("- Bug fixes and performance improvements\n");
    out.push_str("- Updated dependencies\n");
    out.push_str("- Documentation improvements\n");
    out
}
