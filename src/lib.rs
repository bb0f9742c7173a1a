/// CRD types for `WorkflowService`
pub mod api;

/// Operator configuration
pub mod config;

/// Error taxonomy shared across the crate
pub mod errors;
pub use crate::errors::{Error, Result};

/// Expose all controller components used by main
pub mod controller;
pub use crate::controller::*;

/// Fixed-interval polling primitive
pub mod poll;

/// Spec diffing and the update-event filter
pub mod diff;

/// Create/replace/delete helpers for managed resources
pub mod lifecycle;

/// Typed builders for managed resources
pub mod resources;

/// One-shot job orchestration
pub mod jobs;

/// Deployment scaling with availability waits
pub mod scaling;

/// Broker management API client
pub mod broker;

/// Identity provider client
pub mod idp;

/// Credential provisioning
pub mod credentials;

/// Disaster-recovery switchover
pub mod dr;

/// Readiness gate and integration test runner
pub mod validation;

/// CR status reporting
pub mod status;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
pub mod fixtures;
