//! Homebrew formula publisher
//!
//! Builds a [`HomebrewFormula`] from the release binaries, renders it with
//! handlebars and either writes it into a local tap checkout (custom tap
//! mode) or prepares it for a pull request against a shared tap.

use crate::core::config::option_duration_serde;
use crate::core::error::{DistributionError, Result};
use crate::core::release::{Binary, Release};
use crate::core::retry::run_or_cancel;
use crate::core::status::{PublishStatus, StatusTracker};
use crate::core::traits::{PackageValidationResult, Publisher};
use crate::publishers::{expect_status, finish_validation, http_client, network, send};
use crate::security::{CommandError, SafeCommandExecutor, SecureTokenManager};
use crate::validation::is_sha256_hex;
use async_trait::async_trait;
use futures::StreamExt;
use handlebars::Handlebars;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Primary binary preference, most preferred first
const PLATFORM_PREFERENCE: &[&str] = &["darwin-amd64", "darwin-arm64", "linux-amd64", "linux-arm64"];

const SINGLE_TEMPLATE: &str = r#"class {{class_name}} < Formula
  desc "{{description}}"
  homepage "{{homepage}}"
  url "{{url}}"
  sha256 "{{sha256}}"
  version "{{version}}"
  license "{{license}}"
{{#each dependencies}}
  depends_on "{{this}}"
{{/each}}

  def install
    {{install}}
  end

  test do
    {{test}}
  end
end
"#;

const MULTI_TEMPLATE: &str = r#"class {{class_name}} < Formula
  desc "{{description}}"
  homepage "{{homepage}}"
  version "{{version}}"
  license "{{license}}"
{{#if darwin}}

  on_macos do
{{#if darwin.arm64}}
    on_arm do
      url "{{darwin.arm64.url}}"
      sha256 "{{darwin.arm64.sha256}}"
    end
{{/if}}
{{#if darwin.amd64}}
    on_intel do
      url "{{darwin.amd64.url}}"
      sha256 "{{darwin.amd64.sha256}}"
    end
{{/if}}
  end
{{/if}}
{{#if linux}}

  on_linux do
{{#if linux.arm64}}
    on_arm do
      url "{{linux.arm64.url}}"
      sha256 "{{linux.arm64.sha256}}"
    end
{{/if}}
{{#if linux.amd64}}
    on_intel do
      url "{{linux.amd64.url}}"
      sha256 "{{linux.amd64.sha256}}"
    end
{{/if}}
  end
{{/if}}
{{#each dependencies}}
  depends_on "{{this}}"
{{/each}}

  def install
    {{install}}
  end

  test do
    {{test}}
  end
end
"#;

/// Publisher-specific settings from `publishers.<name>.config`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HomebrewConfig {
    pub formula_name: String,
    pub description: String,
    pub homepage: String,
    pub license: String,
    /// Executable installed into `bin` (defaults to the formula name)
    pub binary_name: Option<String>,
    pub dependencies: Vec<String>,
    /// Ruby body of `def install`
    pub install: Option<String>,
    /// Ruby body of `test do`
    pub test: Option<String>,
    /// Local tap checkout; enables custom tap mode
    pub tap_path: Option<PathBuf>,
    /// Shared tap targeted by pull requests
    pub tap_repo: String,
    /// Run `brew style` on the rendered formula when brew is installed
    pub run_audit: bool,
    /// HEAD-check the primary download URL
    pub check_urls: bool,
    #[serde(with = "option_duration_serde")]
    pub timeout: Option<Duration>,
}

impl Default for HomebrewConfig {
    fn default() -> Self {
        Self {
            formula_name: String::new(),
            description: String::new(),
            homepage: String::new(),
            license: "MIT".to_string(),
            binary_name: None,
            dependencies: Vec::new(),
            install: None,
            test: None,
            tap_path: None,
            tap_repo: "Homebrew/homebrew-core".to_string(),
            run_audit: true,
            check_urls: true,
            timeout: None,
        }
    }
}

/// Download location of one platform build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformAsset {
    pub url: String,
    pub sha256: String,
}

/// Everything needed to render a formula file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomebrewFormula {
    pub name: String,
    pub class_name: String,
    pub description: String,
    pub homepage: String,
    /// Primary download
    pub url: String,
    pub sha256: String,
    pub version: String,
    pub license: String,
    pub dependencies: Vec<String>,
    pub install: String,
    pub test: String,
    /// Every supported build keyed by `platform-arch`
    pub platforms: BTreeMap<String, PlatformAsset>,
}

/// Ruby class name for a formula (`my-tool` → `MyTool`, `tool@2` → `ToolAT2`)
///
/// ```
/// use release_distributor::publishers::formula_class_name;
///
/// assert_eq!(formula_class_name("net-probe"), "NetProbe");
/// assert_eq!(formula_class_name("node@18"), "NodeAT18");
/// ```
pub fn formula_class_name(name: &str) -> String {
    let mut class_name = String::with_capacity(name.len());
    let mut capitalize = true;

    for c in name.chars() {
        if c == '@' {
            class_name.push_str("AT");
            capitalize = true;
        } else if c.is_ascii_alphanumeric() {
            if capitalize {
                class_name.push(c.to_ascii_uppercase());
                capitalize = false;
            } else {
                class_name.push(c);
            }
        } else {
            capitalize = true;
        }
    }

    class_name
}

fn normalize_platform(platform: &str) -> String {
    match platform.to_lowercase().as_str() {
        "macos" | "darwin" | "osx" | "mac" => "darwin".to_string(),
        other => other.to_string(),
    }
}

fn normalize_arch(arch: &str) -> String {
    match arch.to_lowercase().as_str() {
        "x86_64" | "amd64" | "x64" => "amd64".to_string(),
        "aarch64" | "arm64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

/// Normalised `platform-arch` key when the formula can use this binary
fn platform_key(binary: &Binary) -> Option<String> {
    let key = format!(
        "{}-{}",
        normalize_platform(&binary.platform),
        normalize_arch(&binary.architecture)
    );
    PLATFORM_PREFERENCE.contains(&key.as_str()).then_some(key)
}

/// Render the formula text
///
/// One platform uses a plain `url`/`sha256` pair; several platforms use
/// `on_macos`/`on_linux` blocks with `on_arm`/`on_intel` branches.
pub fn render_formula(formula: &HomebrewFormula) -> Result<String> {
    let mut registry = Handlebars::new();
    registry.register_escape_fn(handlebars::no_escape);
    registry
        .register_template_string("single", SINGLE_TEMPLATE)
        .map_err(|e| DistributionError::Template(e.to_string()))?;
    registry
        .register_template_string("multi", MULTI_TEMPLATE)
        .map_err(|e| DistributionError::Template(e.to_string()))?;

    let mut by_os: BTreeMap<&str, BTreeMap<&str, &PlatformAsset>> = BTreeMap::new();
    for (key, asset) in &formula.platforms {
        if let Some((os, arch)) = key.split_once('-') {
            by_os.entry(os).or_default().insert(arch, asset);
        }
    }

    let context = json!({
        "class_name": formula.class_name,
        "description": formula.description,
        "homepage": formula.homepage,
        "url": formula.url,
        "sha256": formula.sha256,
        "version": formula.version,
        "license": formula.license,
        "dependencies": formula.dependencies,
        "install": formula.install,
        "test": formula.test,
        "darwin": by_os.get("darwin"),
        "linux": by_os.get("linux"),
    });

    let template = if formula.platforms.len() > 1 { "multi" } else { "single" };
    registry
        .render(template, &context)
        .map_err(|e| DistributionError::Template(e.to_string()))
}

pub struct HomebrewPublisher {
    name: String,
    config: HomebrewConfig,
    tokens: SecureTokenManager,
    client: reqwest::Client,
    status: StatusTracker,
    brew_available: Option<bool>,
}

impl HomebrewPublisher {
    pub fn new(name: impl Into<String>, config: HomebrewConfig) -> Result<Self> {
        let name = name.into();
        let client = http_client(&name, config.timeout)?;

        let mut metadata = HashMap::new();
        metadata.insert("formula".to_string(), config.formula_name.clone().into());
        let mode = if config.tap_path.is_some() { "custom-tap" } else { "shared" };
        metadata.insert("mode".to_string(), mode.into());

        Ok(Self {
            status: StatusTracker::new(name.clone(), metadata),
            name,
            config,
            tokens: SecureTokenManager::new(),
            client,
            brew_available: None,
        })
    }

    /// Override `brew` detection on `PATH`
    pub fn with_brew_available(mut self, available: bool) -> Self {
        self.brew_available = Some(available);
        self
    }

    pub fn with_token_manager(mut self, tokens: SecureTokenManager) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn disable(&self) {
        self.status.mark_disabled();
    }

    fn binary_name(&self) -> &str {
        self.config
            .binary_name
            .as_deref()
            .unwrap_or(&self.config.formula_name)
    }

    fn check(&self, release: &Release) -> PackageValidationResult {
        let mut result = PackageValidationResult::new();

        if release.version.trim().is_empty() {
            result.error("MISSING_VERSION", "version", "Release version is empty");
        }
        if self.config.formula_name.trim().is_empty() {
            result.error(
                "MISSING_FORMULA_NAME",
                "config.formula_name",
                "Formula name is not configured",
            );
        }

        let usable = release.binaries.values().any(|binary| {
            platform_key(binary).is_some()
                && !binary.download_url.is_empty()
                && release.checksum_for(binary).is_some()
        });
        if !usable {
            result.error(
                "NO_UNIX_BINARY",
                "binaries",
                format!(
                    "No {} binary with both a download URL and a checksum",
                    PLATFORM_PREFERENCE.join("/")
                ),
            );
        }

        if self.config.tap_path.is_none() && !self.tokens.has_token("homebrew") {
            result.warning(
                "MISSING_TOKEN",
                "config",
                "No Homebrew GitHub token set; the pull request must be opened manually",
            );
        }

        result
    }

    /// Stream a download through sha256
    async fn download_sha256(&self, cancel: &CancellationToken, url: &str) -> Result<String> {
        debug!(publisher = %self.name, url, "computing checksum from download");
        let response = send(cancel, &self.name, self.client.get(url)).await?;
        let response = expect_status(&self.name, response, StatusCode::OK, None).await?;

        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        run_or_cancel(cancel, async {
            while let Some(chunk) = stream.next().await {
                hasher.update(chunk.map_err(|source| network(&self.name, source))?);
            }
            Ok(())
        })
        .await?;

        Ok(hex::encode(hasher.finalize()))
    }

    /// Select the primary binary and collect every supported platform
    pub async fn generate_formula(
        &self,
        cancel: &CancellationToken,
        release: &Release,
    ) -> Result<HomebrewFormula> {
        let mut platforms = BTreeMap::new();
        for binary in release.binaries.values() {
            let Some(key) = platform_key(binary) else {
                continue;
            };
            if binary.download_url.is_empty() || platforms.contains_key(&key) {
                continue;
            }

            let sha256 = match release.checksum_for(binary) {
                Some(sum) => sum.to_lowercase(),
                None => self.download_sha256(cancel, &binary.download_url).await?,
            };
            platforms.insert(
                key,
                PlatformAsset {
                    url: binary.download_url.clone(),
                    sha256,
                },
            );
        }

        let primary = PLATFORM_PREFERENCE
            .iter()
            .find_map(|key| platforms.get(*key))
            .cloned()
            .ok_or_else(|| {
                DistributionError::publish(
                    &self.name,
                    "no darwin or linux binary with a download URL",
                )
            })?;

        let binary_name = self.binary_name();
        Ok(HomebrewFormula {
            name: self.config.formula_name.clone(),
            class_name: formula_class_name(&self.config.formula_name),
            description: self.config.description.clone(),
            homepage: self.config.homepage.clone(),
            url: primary.url,
            sha256: primary.sha256,
            version: release.version.trim_start_matches('v').to_string(),
            license: self.config.license.clone(),
            dependencies: self.config.dependencies.clone(),
            install: self
                .config
                .install
                .clone()
                .unwrap_or_else(|| format!("bin.install \"{}\"", binary_name)),
            test: self
                .config
                .test
                .clone()
                .unwrap_or_else(|| format!("system \"#{{bin}}/{}\", \"--version\"", binary_name)),
            platforms,
        })
    }

    /// Check the formula before it is written
    ///
    /// The primary URL must answer a HEAD request when `check_urls` is set.
    pub async fn validate_formula(
        &self,
        cancel: &CancellationToken,
        formula: &HomebrewFormula,
    ) -> Result<()> {
        let mut result = PackageValidationResult::new();

        if formula.class_name.is_empty() {
            result.error("MISSING_CLASS_NAME", "class_name", "Formula class name is empty");
        }
        if formula.url.is_empty() {
            result.error("MISSING_URL", "url", "Formula has no download URL");
        }
        if !is_sha256_hex(&formula.sha256) {
            result.error(
                "INVALID_SHA256",
                "sha256",
                format!("'{}' is not a 64 character hex sha256", formula.sha256),
            );
        }
        for (key, asset) in &formula.platforms {
            if !is_sha256_hex(&asset.sha256) {
                result.error(
                    "INVALID_SHA256",
                    &format!("platforms.{}.sha256", key),
                    format!("Checksum for {} is not a 64 character hex sha256", key),
                );
            }
        }

        if self.config.check_urls && !formula.url.is_empty() {
            match send(cancel, &self.name, self.client.head(&formula.url)).await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => result.error(
                    "URL_UNREACHABLE",
                    "url",
                    format!("{} answered HTTP {}", formula.url, response.status().as_u16()),
                ),
                Err(DistributionError::Cancelled) => return Err(DistributionError::Cancelled),
                Err(e) => result.error("URL_UNREACHABLE", "url", e.to_string()),
            }
        }

        finish_validation(&self.name, result)
    }

    /// Run `brew style` against a staged copy of the rendered formula
    ///
    /// Style problems are reported in metadata and logs but do not fail
    /// the publish.
    async fn audit(&self, cancel: &CancellationToken, formula_name: &str, rendered: &str) -> Result<()> {
        let staging = std::env::temp_dir().join(format!("release-distributor-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&staging).await?;
        let staged = staging.join(format!("{}.rb", formula_name));

        let outcome: Result<std::result::Result<String, CommandError>> = async {
            tokio::fs::write(&staged, rendered).await?;
            let executor = SafeCommandExecutor::new(&staging)
                .map_err(|e| e.into_distribution_error("brew", &[]))?;
            let path = staged.to_string_lossy();
            let args = ["style", &*path];
            run_or_cancel(cancel, async { Ok(executor.run("brew", &args).await) }).await
        }
        .await;

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            debug!(path = %staging.display(), error = %e, "failed to remove audit staging dir");
        }

        match outcome? {
            Ok(_) => self.status.set_metadata("audit", "passed"),
            Err(e) => {
                warn!(publisher = %self.name, error = %e, "brew style reported problems");
                self.status.set_metadata("audit", "failed");
            }
        }
        Ok(())
    }

    async fn publish_formula(&self, cancel: &CancellationToken, release: &Release) -> Result<()> {
        let formula = self.generate_formula(cancel, release).await?;
        self.validate_formula(cancel, &formula).await?;
        let rendered = render_formula(&formula)?;
        self.status.set_metadata("formula_version", formula.version.clone());

        if self.config.run_audit {
            let available = self
                .brew_available
                .unwrap_or_else(|| SafeCommandExecutor::is_available("brew"));
            if available {
                self.audit(cancel, &formula.name, &rendered).await?;
            } else {
                debug!(publisher = %self.name, "brew not installed, skipping audit");
                self.status.set_metadata("audit", "skipped");
            }
        }

        match &self.config.tap_path {
            Some(tap) => {
                let dir = tap.join("Formula");
                tokio::fs::create_dir_all(&dir).await?;
                let path = dir.join(format!("{}.rb", formula.name));
                tokio::fs::write(&path, rendered).await?;
                info!(publisher = %self.name, path = %path.display(), "formula written");
                self.status
                    .set_metadata("formula_path", path.display().to_string());
            }
            None => {
                let pull_request = format!("https://github.com/{}/pulls", self.config.tap_repo);
                info!(publisher = %self.name, url = %pull_request, "formula ready for pull request");
                self.status.set_metadata("pull_request_url", pull_request);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Publisher for HomebrewPublisher {
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
            self.publish_formula(cancel, release).await
        }
        .await;

        attempt.finish(&outcome);
        outcome
    }

    fn status(&self) -> PublishStatus {
        self.status.snapshot()
    }
}
