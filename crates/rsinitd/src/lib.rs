//! Replica-set bootstrapper for MongoDB pods.
//!
//! Run once per pod before the deployment reconciler takes over, `rsinitd`
//! makes sure the pod's mongod is part of its replica set: pod 0 initiates
//! the set and creates the root user, later pods add themselves through the
//! primary, and pods restarting into an existing membership do nothing.

pub mod admin;
pub mod bootstrap;
pub mod error;

pub use admin::{AdminRunner, AdminTarget, MongoAdmin};
pub use bootstrap::{BootstrapConfig, BootstrapOutcome};
pub use error::{InitError, InitResult};
