//! Orchestration layer for release distribution
//!
//! The coordinator runs pre-flight validators, then fans a release out to
//! every enabled publisher under a concurrency bound.

pub mod coordinator;

pub use coordinator::DistributionCoordinator;
