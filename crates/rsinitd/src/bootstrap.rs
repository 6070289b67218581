//! Replica-set bootstrap: probe the seed member, then either initiate the
//! set, join it, or leave it alone.
//!
//! The decision tree keyed off the seed's `isMaster` reply:
//!
//! - the set exists and this member is listed: nothing to do;
//! - the set exists without this member: ask the primary for the current
//!   replica-set config and reconfigure it with this member appended;
//! - no set yet: initiate a single-member set on localhost, create the root
//!   user while the localhost exception still applies, then attach the
//!   split-horizon mapping.
//!
//! Every reconfiguration bumps the config version it read; a concurrent
//! writer makes the server reject the stale version, and the next pod retry
//! starts over from a fresh read.

use std::time::Duration;

use mongodb::bson::{doc, Bson, Document};
use tokio::net::lookup_host;
use tracing::{debug, info, warn};

use crate::admin::{AdminRunner, AdminTarget};
use crate::error::{InitError, InitResult};

/// Delay between DNS resolution attempts.
pub const RESOLVE_RETRY_DELAY: Duration = Duration::from_secs(10);

/// DNS resolution attempts before giving up on a member address.
pub const RESOLVE_ATTEMPTS: u32 = 15;

/// Attempts to attach the horizon mapping to a freshly initiated set.
pub const HORIZON_ATTEMPTS: u32 = 5;

/// Everything the bootstrap decision needs, resolved up front.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub set_name: String,
    pub port: u16,
    /// FQDN this member is reachable at inside the cluster.
    pub fqdn: String,
    /// FQDN of the seed member (pod 0) whose state drives the decision.
    pub seed_fqdn: String,
    pub root_username: String,
    pub root_password: String,
    /// Externally-resolvable `host:port` for the split-horizon mapping.
    pub horizon: Option<String>,
    /// This member joins as an arbiter.
    pub arbiter: bool,
    /// Election priority; ignored for arbiters.
    pub priority: i64,
    /// Delay between horizon-attach attempts.
    pub retry_delay: Duration,
    pub horizon_attempts: u32,
}

impl BootstrapConfig {
    fn self_address(&self) -> String {
        format!("{}:{}", self.fqdn, self.port)
    }

    fn seed_address(&self) -> String {
        format!("{}:{}", self.seed_fqdn, self.port)
    }

    fn credentials(&self) -> (String, String) {
        (self.root_username.clone(), self.root_password.clone())
    }
}

/// How the bootstrap ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The set exists and already lists this member.
    AlreadyMember,
    /// A new single-member set was initiated on this host.
    Initiated {
        /// False only when no horizon mapping was configured.
        horizon_attached: bool,
    },
    /// This member was appended to the existing set.
    MemberAdded,
}

/// Resolves `host` through DNS, retrying while cluster DNS catches up with
/// a freshly created pod.
pub async fn resolve_with_retry(host: &str, port: u16) -> InitResult<()> {
    let address = format!("{host}:{port}");
    for attempt in 1..=RESOLVE_ATTEMPTS {
        match lookup_host(&address).await {
            Ok(mut addrs) => {
                if addrs.next().is_some() {
                    debug!(%host, attempt, "resolved member address");
                    return Ok(());
                }
            }
            Err(e) => {
                debug!(%host, attempt, error = %e, "member address not resolvable yet");
            }
        }
        if attempt < RESOLVE_ATTEMPTS {
            tokio::time::sleep(RESOLVE_RETRY_DELAY).await;
        }
    }
    Err(InitError::resolve(host))
}

/// Runs the bootstrap decision tree against `runner`.
pub async fn run(runner: &dyn AdminRunner, cfg: &BootstrapConfig) -> InitResult<BootstrapOutcome> {
    let probe = runner
        .run(
            &AdminTarget::probe(cfg.seed_address()),
            doc! { "isMaster": 1 },
        )
        .await?;

    match probe.get_str("setName") {
        Ok(set_name) => {
            if set_name != cfg.set_name {
                return Err(InitError::config(format!(
                    "seed member belongs to set '{set_name}', expected '{}'",
                    cfg.set_name
                )));
            }
            if is_listed_member(&probe, &cfg.self_address()) {
                info!(member = %cfg.self_address(), set = %cfg.set_name, "already a member");
                Ok(BootstrapOutcome::AlreadyMember)
            } else {
                add_member(runner, cfg).await?;
                Ok(BootstrapOutcome::MemberAdded)
            }
        }
        Err(_) => {
            let horizon_attached = initiate(runner, cfg).await?;
            Ok(BootstrapOutcome::Initiated { horizon_attached })
        }
    }
}

/// True when the `isMaster` reply lists `address` as a data-bearing member
/// or an arbiter.
fn is_listed_member(probe: &Document, address: &str) -> bool {
    ["hosts", "passives", "arbiters"].iter().any(|field| {
        probe
            .get_array(field)
            .map(|members| {
                members
                    .iter()
                    .any(|m| m.as_str().is_some_and(|s| s == address))
            })
            .unwrap_or(false)
    })
}

/// Appends this member to the existing set via the primary.
async fn add_member(runner: &dyn AdminRunner, cfg: &BootstrapConfig) -> InitResult<()> {
    let primary = AdminTarget::primary(cfg.seed_address(), &cfg.set_name, cfg.credentials());

    let reply = runner
        .run(&primary, doc! { "replSetGetConfig": 1 })
        .await?;
    let mut config = reply
        .get_document("config")
        .map_err(|_| InitError::config("replSetGetConfig reply carries no config document"))?
        .clone();

    let members = config
        .get_array_mut("members")
        .map_err(|_| InitError::config("replica-set config carries no members array"))?;
    let next_id = members
        .iter()
        .filter_map(|m| m.as_document())
        .filter_map(member_id)
        .max()
        .map_or(0, |id| id + 1);

    let mut member = doc! {
        "_id": next_id,
        "host": cfg.self_address(),
        "arbiterOnly": cfg.arbiter,
        "priority": if cfg.arbiter { 0 } else { cfg.priority },
        "votes": 1,
    };
    if let Some(horizon) = &cfg.horizon {
        member.insert("horizons", doc! { "EXTERNAL": horizon });
    }
    members.push(Bson::Document(member));

    bump_version(&mut config)?;
    config.remove("term");

    info!(
        member = %cfg.self_address(),
        set = %cfg.set_name,
        id = next_id,
        "adding member to the replica set"
    );
    runner
        .run(&primary, doc! { "replSetReconfig": config })
        .await?;
    Ok(())
}

/// Initiates a single-member set on localhost and creates the root user
/// while the localhost exception still allows it. Returns whether a horizon
/// mapping was attached; failing to attach a configured one within the
/// attempt budget is fatal.
async fn initiate(runner: &dyn AdminRunner, cfg: &BootstrapConfig) -> InitResult<bool> {
    let unauthenticated = AdminTarget::localhost(cfg.port, None);

    info!(set = %cfg.set_name, member = %cfg.self_address(), "initiating replica set");
    runner
        .run(
            &unauthenticated,
            doc! {
                "replSetInitiate": {
                    "_id": cfg.set_name.as_str(),
                    "version": 1,
                    "members": [ { "_id": 0, "host": cfg.self_address() } ],
                }
            },
        )
        .await?;

    runner
        .run(
            &unauthenticated,
            doc! {
                "createUser": cfg.root_username.as_str(),
                "pwd": cfg.root_password.as_str(),
                "roles": [ { "role": "root", "db": "admin" } ],
            },
        )
        .await?;

    let Some(horizon) = cfg.horizon.clone() else {
        return Ok(false);
    };

    // The set may still be electing itself; only command rejections are
    // worth retrying here.
    let authenticated = AdminTarget::localhost(cfg.port, Some(cfg.credentials()));
    for attempt in 1..=cfg.horizon_attempts {
        match attach_horizon(runner, &authenticated, &horizon).await {
            Ok(()) => {
                info!(%horizon, "attached split-horizon mapping");
                return Ok(true);
            }
            Err(e) if e.is_command_failure() && attempt < cfg.horizon_attempts => {
                debug!(attempt, error = %e, "horizon attach not accepted yet");
                tokio::time::sleep(cfg.retry_delay).await;
            }
            Err(e) => {
                warn!(
                    attempt,
                    error = %e,
                    "could not attach the horizon mapping"
                );
                return Err(e);
            }
        }
    }
    Err(InitError::config("horizon_attempts must be at least 1"))
}

/// One attempt to set the EXTERNAL horizon on the sole member.
async fn attach_horizon(
    runner: &dyn AdminRunner,
    target: &AdminTarget,
    horizon: &str,
) -> InitResult<()> {
    let reply = runner.run(target, doc! { "replSetGetConfig": 1 }).await?;
    let mut config = reply
        .get_document("config")
        .map_err(|_| InitError::config("replSetGetConfig reply carries no config document"))?
        .clone();

    bump_version(&mut config)?;
    config.remove("term");

    let members = config
        .get_array_mut("members")
        .map_err(|_| InitError::config("replica-set config carries no members array"))?;
    let first = members
        .first_mut()
        .and_then(|m| m.as_document_mut())
        .ok_or_else(|| InitError::config("freshly initiated set has no members"))?;
    first.insert("horizons", doc! { "EXTERNAL": horizon });

    runner.run(target, doc! { "replSetReconfig": config }).await?;
    Ok(())
}

fn member_id(member: &Document) -> Option<i64> {
    match member.get("_id") {
        Some(Bson::Int32(id)) => Some(i64::from(*id)),
        Some(Bson::Int64(id)) => Some(*id),
        _ => None,
    }
}

/// Increments the config version in place, preserving its integer width.
fn bump_version(config: &mut Document) -> InitResult<()> {
    let next = match config.get("version") {
        Some(Bson::Int32(v)) => Bson::Int32(v + 1),
        Some(Bson::Int64(v)) => Bson::Int64(v + 1),
        _ => {
            return Err(InitError::config(
                "replica-set config carries no numeric version",
            ))
        }
    };
    config.insert("version", next);
    Ok(())
}
