//! Shared reconciliation core for MongoDB Ops Manager deployments.
//!
//! Per-pod init processes use this crate to ensure the pod is correctly
//! represented — once, idempotently, without clobbering concurrent peers'
//! edits — in the single shared automation-config document held by Ops
//! Manager, and to wait for the resulting plan to roll out:
//!
//! - [`model`]: typed automation-config document
//! - [`builders`]: canonical entity factories (process, member, replica set,
//!   sharded cluster)
//! - [`ident`]: stable identifier allocation within a namespace
//! - [`reconcile`]: the diff/merge engine with changed-section reporting
//! - [`api`]: digest-authenticated REST client with contention retry
//! - [`retry`]: the bounded, jittered retry policy
//! - [`status`]: convergence polling of the plan rollout
//! - [`alerts`]: alert-configuration diffing
//!
//! # Concurrency discipline
//!
//! Multiple pods reconcile independently against the same shared document.
//! The transaction unit is: fetch the whole document, compute a new whole
//! document on a copy, attempt a whole-document replace, and retry from the
//! conflict on contention. No locks are held anywhere.

pub mod alerts;
pub mod api;
pub mod builders;
pub mod error;
pub mod ident;
pub mod model;
pub mod reconcile;
pub mod retry;
pub mod status;

// Re-export commonly used items at crate root
pub use api::{ApiTransport, DigestTransport, OpsManagerClient};
pub use builders::DeploymentType;
pub use error::{OmError, OmResult};
pub use model::AutomationConfig;
pub use reconcile::{reconcile, ChangedSections, DesiredState};
pub use retry::RetryPolicy;
pub use status::{ConvergencePoller, PlanOutcome};
