//! Per-pod deployment reconciler for MongoDB Ops Manager.
//!
//! Run once from each pod's init container, `deployerd` resolves the pod's
//! desired topology membership from its environment and mounted
//! configuration, merges it into the project's shared automation-config
//! document, and waits for the resulting plan to converge. Pod 0 also
//! reconciles the project's alert configurations.

pub mod agent;
pub mod deploy;
pub mod settings;

pub use deploy::Deployer;
pub use settings::{LoadOptions, Settings};
