//! Multi-channel release distribution
//!
//! A [`Release`] is validated once, then published concurrently to a
//! GitHub-style release host, a Go module proxy and a Homebrew formula tap.
//! Failures are retried with exponential backoff and reported per channel.

pub mod core;
pub mod notification;
pub mod orchestration;
pub mod publishers;
pub mod security;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use core::*;
pub use notification::{Notification, NotificationChannel, NotificationKind, NotificationService};
pub use orchestration::DistributionCoordinator;
pub use security::{CommandError, SafeCommandExecutor, SecureTokenManager};
