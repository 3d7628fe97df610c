//! Go module publisher
//!
//! Publishing a Go module means tagging the repository and asking the
//! module proxy to fetch the new version. The tag step and the final
//! availability check are strategies so they can be replaced in tests.

use crate::core::config::{duration_serde, option_duration_serde};
use crate::core::error::{DistributionError, Result};
use crate::core::release::Release;
use crate::core::retry::{RetryManager, RetryPolicy, run_or_cancel, sleep_or_cancel};
use crate::core::status::{PublishStatus, StatusTracker};
use crate::core::traits::{PackageValidationResult, Publisher};
use crate::publishers::{expect_status, finish_validation, http_client, send};
use crate::security::SafeCommandExecutor;
use crate::validation::{ensure_v_prefix, parse_version};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LICENSE_FILES: &[&str] = &["LICENSE", "LICENSE.md", "LICENSE.txt", "COPYING"];
const README_FILES: &[&str] = &["README.md", "README", "README.txt"];

/// Publisher-specific settings from `publishers.<name>.config`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GoModuleConfig {
    pub module_path: String,
    /// Local checkout holding `go.mod`
    pub repo_path: PathBuf,
    pub proxy_url: String,
    pub index_url: String,
    /// Run `go build`, `go vet` and `golangci-lint` during validation
    pub run_checks: bool,
    /// Warn about outdated dependencies via `go list -m -u all`
    pub check_dependencies: bool,
    /// Create README and example program when absent
    pub generate_docs: bool,
    pub remote: String,
    pub push_tag: bool,
    /// Wait before the first availability probe
    #[serde(with = "duration_serde")]
    pub settle_delay: Duration,
    /// Backoff between availability probes
    pub availability_policy: RetryPolicy,
    #[serde(with = "option_duration_serde")]
    pub timeout: Option<Duration>,
}

impl Default for GoModuleConfig {
    fn default() -> Self {
        Self {
            module_path: String::new(),
            repo_path: PathBuf::from("."),
            proxy_url: "https://proxy.golang.org".to_string(),
            index_url: "https://pkg.go.dev".to_string(),
            run_checks: false,
            check_dependencies: false,
            generate_docs: false,
            remote: "origin".to_string(),
            push_tag: true,
            settle_delay: Duration::from_secs(10),
            availability_policy: RetryPolicy {
                max_retries: 5,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
            timeout: None,
        }
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Creates and publishes the version tag
#[async_trait]
pub trait GitTagger: Send + Sync {
    async fn tag(
        &self,
        cancel: &CancellationToken,
        repo: &Path,
        tag: &str,
        message: &str,
    ) -> Result<()>;
}

/// Confirms the version is visible to module consumers
#[async_trait]
pub trait AvailabilityChecker: Send + Sync {
    async fn check(&self, cancel: &CancellationToken, module_path: &str, version: &str)
    -> Result<()>;
}

/// Tags with `git tag -a` and pushes the tag to a remote
pub struct CommandGitTagger {
    remote: String,
    push: bool,
}

impl CommandGitTagger {
    pub fn new(remote: impl Into<String>, push: bool) -> Self {
        Self {
            remote: remote.into(),
            push,
        }
    }
}

#[async_trait]
impl GitTagger for CommandGitTagger {
    async fn tag(
        &self,
        cancel: &CancellationToken,
        repo: &Path,
        tag: &str,
        message: &str,
    ) -> Result<()> {
        let executor = SafeCommandExecutor::new(repo)
            .map_err(|e| e.into_distribution_error("git", &[]))?;

        let tag_ref = format!("refs/tags/{}", tag);
        let lookup = ["rev-parse", "-q", "--verify", tag_ref.as_str()];
        let existing = run_or_cancel(cancel, async {
            executor
                .execute("git", &lookup)
                .await
                .map_err(|e| e.into_distribution_error("git", &lookup))
        })
        .await?;

        if existing.status.success() {
            debug!(tag, "tag already exists, skipping creation");
        } else {
            let create = ["tag", "-a", tag, "-m", message];
            run_or_cancel(cancel, async {
                executor
                    .run("git", &create)
                    .await
                    .map_err(|e| e.into_distribution_error("git", &create))
            })
            .await?;
        }

        if self.push {
            let push = ["push", self.remote.as_str(), tag];
            run_or_cancel(cancel, async {
                executor
                    .run("git", &push)
                    .await
                    .map_err(|e| e.into_distribution_error("git", &push))
            })
            .await?;
        }

        Ok(())
    }
}

/// Polls the module index until the version page answers `200`
pub struct IndexAvailabilityChecker {
    client: reqwest::Client,
    index_url: String,
    settle_delay: Duration,
    policy: RetryPolicy,
}

impl IndexAvailabilityChecker {
    pub fn new(
        client: reqwest::Client,
        index_url: impl Into<String>,
        settle_delay: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            index_url: index_url.into(),
            settle_delay,
            policy,
        }
    }
}

#[async_trait]
impl AvailabilityChecker for IndexAvailabilityChecker {
    async fn check(
        &self,
        cancel: &CancellationToken,
        module_path: &str,
        version: &str,
    ) -> Result<()> {
        sleep_or_cancel(cancel, self.settle_delay).await?;

        let url = format!(
            "{}/{}@{}",
            self.index_url.trim_end_matches('/'),
            module_path,
            version
        );
        RetryManager::new(self.policy.clone())
            .retry(cancel, "module-index", |attempt| {
                let url = url.clone();
                async move {
                    debug!(%url, attempt, "checking module availability");
                    let response = send(cancel, "module-index", self.client.get(&url)).await?;
                    expect_status("module-index", response, StatusCode::OK, None).await?;
                    Ok(())
                }
            })
            .await
    }
}

// ============================================================================
// Publisher
// ============================================================================

pub struct GoModulePublisher {
    name: String,
    config: GoModuleConfig,
    client: reqwest::Client,
    tagger: Arc<dyn GitTagger>,
    availability: Arc<dyn AvailabilityChecker>,
    status: StatusTracker,
}

impl GoModulePublisher {
    pub fn new(name: impl Into<String>, config: GoModuleConfig) -> Result<Self> {
        let name = name.into();
        let client = http_client(&name, config.timeout)?;

        let tagger: Arc<dyn GitTagger> =
            Arc::new(CommandGitTagger::new(&config.remote, config.push_tag));
        let availability: Arc<dyn AvailabilityChecker> = Arc::new(IndexAvailabilityChecker::new(
            client.clone(),
            &config.index_url,
            config.settle_delay,
            config.availability_policy.clone(),
        ));

        let mut metadata = HashMap::new();
        metadata.insert("module_path".to_string(), config.module_path.clone().into());

        Ok(Self {
            status: StatusTracker::new(name.clone(), metadata),
            name,
            config,
            client,
            tagger,
            availability,
        })
    }

    pub fn with_git_tagger(mut self, tagger: Arc<dyn GitTagger>) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn with_availability_checker(mut self, checker: Arc<dyn AvailabilityChecker>) -> Self {
        self.availability = checker;
        self
    }

    pub fn disable(&self) {
        self.status.mark_disabled();
    }

    fn repo_file(&self, candidates: &[&str]) -> Option<PathBuf> {
        candidates
            .iter()
            .map(|name| self.config.repo_path.join(name))
            .find(|path| path.is_file())
    }

    async fn check_go_mod(&self, result: &mut PackageValidationResult) {
        let path = self.config.repo_path.join("go.mod");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => {
                result.error(
                    "MISSING_GO_MOD",
                    "repo_path",
                    format!("No go.mod found in {}", self.config.repo_path.display()),
                );
                return;
            }
        };

        match module_directive(&content) {
            Some(declared) if declared == self.config.module_path => {}
            Some(declared) => result.error(
                "MODULE_PATH_MISMATCH",
                "module_path",
                format!(
                    "go.mod declares module {} but {} is configured",
                    declared, self.config.module_path
                ),
            ),
            None => result.error("INVALID_GO_MOD", "go.mod", "go.mod has no module directive"),
        }
    }

    async fn run_checks(
        &self,
        cancel: &CancellationToken,
        executor: &SafeCommandExecutor,
        result: &mut PackageValidationResult,
    ) -> Result<()> {
        for (args, code) in [
            (&["build", "./..."][..], "BUILD_FAILED"),
            (&["vet", "./..."][..], "VET_FAILED"),
        ] {
            let outcome = run_or_cancel(cancel, async {
                Ok(executor.run("go", args).await)
            })
            .await?;
            if let Err(e) = outcome {
                result.error(code, "module", format!("go {}: {}", args.join(" "), e));
            }
        }

        if SafeCommandExecutor::is_available("golangci-lint") {
            let outcome = run_or_cancel(cancel, async {
                Ok(executor.run("golangci-lint", &["run"]).await)
            })
            .await?;
            if let Err(e) = outcome {
                result.warning("LINT_ISSUES", "module", format!("golangci-lint: {}", e));
            }
        }

        Ok(())
    }

    async fn check_dependencies(
        &self,
        cancel: &CancellationToken,
        executor: &SafeCommandExecutor,
        result: &mut PackageValidationResult,
    ) -> Result<()> {
        let args = ["list", "-m", "-u", "all"];
        let outcome = run_or_cancel(cancel, async { Ok(executor.run("go", &args).await) }).await?;

        match outcome {
            Ok(output) => {
                for line in stale_dependencies(&output) {
                    result.warning(
                        "STALE_DEPENDENCY",
                        "dependencies",
                        format!("Update available: {}", line),
                    );
                }
            }
            Err(e) => warn!(publisher = %self.name, error = %e, "dependency check failed"),
        }

        Ok(())
    }

    async fn check(
        &self,
        cancel: &CancellationToken,
        release: &Release,
    ) -> Result<PackageValidationResult> {
        let mut result = PackageValidationResult::new();

        if let Err(e) = parse_version(&release.version) {
            result.error(
                "INVALID_VERSION",
                "version",
                format!("Invalid semantic version '{}': {}", release.version, e),
            );
        }

        if self.config.module_path.trim().is_empty() {
            result.error(
                "MISSING_MODULE_PATH",
                "config.module_path",
                "Module path is not configured",
            );
            return Ok(result);
        }

        self.check_go_mod(&mut result).await;

        if self.repo_file(LICENSE_FILES).is_none() {
            result.error("MISSING_LICENSE", "repo_path", "No LICENSE file found");
        }
        if self.repo_file(README_FILES).is_none() && !self.config.generate_docs {
            result.warning("MISSING_README", "repo_path", "No README file found");
        }

        if self.config.run_checks || self.config.check_dependencies {
            let executor = SafeCommandExecutor::new(&self.config.repo_path)
                .map_err(|e| e.into_distribution_error("go", &[]))?;
            if self.config.run_checks {
                self.run_checks(cancel, &executor, &mut result).await?;
            }
            if self.config.check_dependencies {
                self.check_dependencies(cancel, &executor, &mut result).await?;
            }
        }

        Ok(result)
    }

    async fn generate_docs(&self, version: &str) -> Result<()> {
        let readme = self.config.repo_path.join("README.md");
        if self.repo_file(README_FILES).is_none() {
            tokio::fs::write(&readme, readme_template(&self.config.module_path, version)).await?;
            info!(publisher = %self.name, path = %readme.display(), "generated README");
        }

        let example = self.config.repo_path.join("example").join("main.go");
        if !example.exists() {
            if let Some(parent) = example.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&example, example_template(&self.config.module_path, version))
                .await?;
            info!(publisher = %self.name, path = %example.display(), "generated example");
        }

        Ok(())
    }

    async fn refresh_proxy(&self, cancel: &CancellationToken, version: &str) -> Result<String> {
        let url = format!(
            "{}/{}/@v/{}.info",
            self.config.proxy_url.trim_end_matches('/'),
            escape_module_path(&self.config.module_path),
            version
        );
        debug!(publisher = %self.name, %url, "requesting proxy refresh");

        let response = send(cancel, &self.name, self.client.get(&url)).await?;
        expect_status(&self.name, response, StatusCode::OK, None).await?;
        Ok(url)
    }

    async fn publish_module(&self, cancel: &CancellationToken, release: &Release) -> Result<()> {
        let version = ensure_v_prefix(&release.version);

        if self.config.generate_docs {
            self.generate_docs(&version).await?;
        }

        let message = format!("Release {}", version);
        self.tagger
            .tag(cancel, &self.config.repo_path, &version, &message)
            .await?;
        info!(publisher = %self.name, tag = %version, "tag pushed");

        let proxy_url = self.refresh_proxy(cancel, &version).await?;
        self.status.set_metadata("proxy_url", proxy_url);

        self.availability
            .check(cancel, &self.config.module_path, &version)
            .await?;

        let pkg_url = format!(
            "{}/{}@{}",
            self.config.index_url.trim_end_matches('/'),
            self.config.module_path,
            version
        );
        info!(publisher = %self.name, url = %pkg_url, "module available");
        self.status.set_metadata("pkg_url", pkg_url);
        Ok(())
    }
}

#[async_trait]
impl Publisher for GoModulePublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self, cancel: &CancellationToken, release: &Release) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(DistributionError::Cancelled);
        }
        self.status.reset_after_validation();
        let result = self.check(cancel, release).await?;
        finish_validation(&self.name, result)
    }

    async fn publish(&self, cancel: &CancellationToken, release: &Release) -> Result<()> {
        let attempt = self.status.begin();
        let outcome = async {
            self.validate(cancel, release).await?;
            self.status.mark_publishing();
            self.publish_module(cancel, release).await
        }
        .await;

        attempt.finish(&outcome);
        outcome
    }

    fn status(&self) -> PublishStatus {
        self.status.snapshot()
    }
}

/// Case-encode a module path for the module proxy
///
/// Uppercase letters become `!` followed by the lowercase letter.
///
/// ```
/// use release_distributor::publishers::escape_module_path;
///
/// assert_eq!(escape_module_path("github.com/Azure/azure-sdk"), "github.com/!azure/azure-sdk");
/// ```
pub fn escape_module_path(module_path: &str) -> String {
    let mut escaped = String::with_capacity(module_path.len());
    for c in module_path.chars() {
        if c.is_ascii_uppercase() {
            escaped.push('!');
            escaped.push(c.to_ascii_lowercase());
        } else {
            escaped.push(c);
        }
    }
    escaped
}

fn module_directive(go_mod: &str) -> Option<&str> {
    go_mod.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("module")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        Some(rest.trim().trim_matches('"'))
    })
}

/// Lines of `go list -m -u all` that carry an available upgrade
fn stale_dependencies(output: &str) -> Vec<&str> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.contains('[') && line.ends_with(']'))
        .collect()
}

fn module_name(module_path: &str) -> &str {
    let mut segments = module_path.rsplit('/');
    let last = segments.next().unwrap_or(module_path);
    // Major-version suffixes (`/v2`) are not the package name
    if last.len() > 1 && last.starts_with('v') && last[1..].chars().all(|c| c.is_ascii_digit()) {
        segments.next().unwrap_or(last)
    } else {
        last
    }
}

fn readme_template(module_path: &str, version: &str) -> String {
    let name = module_name(module_path);
    format!(
        "# {name}\n\n\
         [![Go Reference](https://pkg.go.dev/badge/{module}.svg)](https://pkg.go.dev/{module})\n\
         [![Go Report Card](https://goreportcard.com/badge/{module})](https://goreportcard.com/report/{module})\n\n\
         ## Installation\n\n\
         ```bash\n\
         go get {module}@{version}\n\
         ```\n\n\
         ## Usage\n\n\
         See [example/main.go](example/main.go).\n",
        name = name,
        module = module_path,
        version = version
    )
}

fn example_template(module_path: &str, version: &str) -> String {
    format!(
        "package main\n\n\
         import (\n\
         \t\"fmt\"\n\n\
         \t_ \"{module}\"\n\
         )\n\n\
         func main() {{\n\
         \tfmt.Println(\"{name} {version}\")\n\
         }}\n",
        module = module_path,
        name = module_name(module_path),
        version = version
    )
}
