//! Channel publishers
//!
//! Each publisher embeds its own validation and HTTP client and owns its
//! [`StatusTracker`](crate::core::StatusTracker). Publishers are built from
//! configuration with [`build_publisher`].

pub mod github;
pub mod go_module;
pub mod homebrew;

use crate::core::config::{PublisherConfig, PublisherKind};
use crate::core::error::{DistributionError, Result};
use crate::core::retry::run_or_cancel;
use crate::core::traits::{PackageValidationResult, Publisher};
use crate::security::SecureTokenManager;
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use github::{GithubConfig, GithubPublisher, generate_changelog, upload_endpoint};
pub use go_module::{
    AvailabilityChecker, CommandGitTagger, GitTagger, GoModuleConfig, GoModulePublisher,
    IndexAvailabilityChecker, escape_module_path,
};
pub use homebrew::{
    HomebrewConfig, HomebrewFormula, HomebrewPublisher, PlatformAsset, formula_class_name,
    render_formula,
};

const USER_AGENT: &str = concat!("release-distributor/", env!("CARGO_PKG_VERSION"));

/// HTTP timeout used when a publisher does not configure one
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the publisher selected by `config.kind` (or inferred from `name`)
///
/// A publisher whose config is disabled starts in the `Disabled` state.
pub fn build_publisher(name: &str, config: &PublisherConfig) -> Result<Arc<dyn Publisher>> {
    let kind = config.resolved_kind(name).ok_or_else(|| {
        DistributionError::Config(format!("publishers.{}: unknown publisher kind", name))
    })?;

    let publisher: Arc<dyn Publisher> = match kind {
        PublisherKind::Github => {
            let publisher = GithubPublisher::new(name, decode_config(name, config)?)?;
            if !config.enabled {
                publisher.disable();
            }
            Arc::new(publisher)
        }
        PublisherKind::GoModule => {
            let publisher = GoModulePublisher::new(name, decode_config(name, config)?)?;
            if !config.enabled {
                publisher.disable();
            }
            Arc::new(publisher)
        }
        PublisherKind::Homebrew => {
            let publisher = HomebrewPublisher::new(name, decode_config(name, config)?)?;
            if !config.enabled {
                publisher.disable();
            }
            Arc::new(publisher)
        }
    };

    Ok(publisher)
}

fn decode_config<T: DeserializeOwned>(name: &str, config: &PublisherConfig) -> Result<T> {
    let map = config
        .config
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect::<serde_json::Map<_, _>>();

    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| DistributionError::Config(format!("publishers.{}.config: {}", name, e)))
}

pub(crate) fn http_client(publisher: &str, timeout: Option<Duration>) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|source| network(publisher, source))
}

pub(crate) fn network(publisher: &str, source: reqwest::Error) -> DistributionError {
    DistributionError::Network {
        publisher: publisher.to_string(),
        source,
    }
}

/// Send a request, abandoning it when the token is cancelled
pub(crate) async fn send(
    cancel: &CancellationToken,
    publisher: &str,
    request: RequestBuilder,
) -> Result<Response> {
    run_or_cancel(cancel, async {
        request.send().await.map_err(|source| network(publisher, source))
    })
    .await
}

/// Fail with `UnexpectedStatus` unless the response carries `expected`
///
/// `secret` is masked wherever it appears in the reported URL or body.
pub(crate) async fn expect_status(
    publisher: &str,
    response: Response,
    expected: StatusCode,
    secret: Option<&SecretString>,
) -> Result<Response> {
    if response.status() == expected {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let mut url = response.url().to_string();
    let mut body = response.text().await.unwrap_or_default();
    if let Some(secret) = secret {
        url = SecureTokenManager::mask_in(&url, secret);
        body = SecureTokenManager::mask_in(&body, secret);
    }
    Err(DistributionError::UnexpectedStatus {
        publisher: publisher.to_string(),
        url,
        status,
        body,
    })
}

/// Log warnings and convert errors into `ValidationFailed`
pub(crate) fn finish_validation(publisher: &str, result: PackageValidationResult) -> Result<()> {
    for warning in &result.warnings {
        warn!(
            publisher,
            code = %warning.code,
            field = %warning.field,
            "{}",
            warning.message
        );
    }
    result.into_result(publisher)
}
