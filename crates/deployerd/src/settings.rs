//! Settings for the deployer: environment variables, the mounted
//! `mongod.conf`, and optional per-host policy overrides.
//!
//! Everything is resolved once at startup into an immutable [`Settings`]
//! value; nothing downstream reads the environment.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Deserialize;

use om_common::builders::DeploymentType;
use om_common::reconcile::DesiredState;
use om_common::{OmError, OmResult};

/// Environment variables supplied by the pod spec.
mod env_keys {
    pub const BASE_URL: &str = "MMSBASEURL";
    pub const PUBLIC_KEY: &str = "APIPUB";
    pub const PRIVATE_KEY: &str = "APIKEY";
    pub const PROJECT_ID: &str = "MMSGROUPID";
    pub const MONGO_VERSION: &str = "VERSION";
    pub const HORIZON_ADDR: &str = "HORIZONADDR";
    pub const HORIZON_PORT: &str = "HORIZONPORT";
}

/// The subset of `mongod.conf` the deployer consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct MongodConf {
    pub net: NetConf,
    pub replication: Option<ReplicationConf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetConf {
    pub port: u16,
    pub tls: TlsConf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConf {
    #[serde(rename = "CAFile")]
    pub ca_file: PathBuf,
    #[serde(rename = "certificateKeyFile")]
    pub certificate_key_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationConf {
    #[serde(rename = "replSetName")]
    pub repl_set_name: String,
}

impl MongodConf {
    /// Parses the YAML text of a mounted `mongod.conf`.
    pub fn parse(text: &str) -> OmResult<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| OmError::configuration("mongod.conf", e.to_string()))
    }
}

/// Optional per-host policy overrides, keyed by the bare host label.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployPolicy {
    /// Subdomain for the DNS split-horizon alias.
    pub sub_domain: Option<String>,
    /// Election priority per host; hosts not listed get priority 1.
    pub priority: BTreeMap<String, i64>,
    /// Hosts that join as arbiters.
    pub arbiter: BTreeSet<String>,
    /// Hosts excluded from the backup agent.
    pub non_backup_agent: BTreeSet<String>,
    /// Hosts excluded from the monitoring agent.
    pub non_monitoring_agent: BTreeSet<String>,
    /// Deployment type code: rs, sh, cs, or ms. Defaults to rs.
    pub deployment_type: Option<String>,
    pub sharded_cluster_name: Option<String>,
    pub config_server_replica_set: Option<String>,
}

impl DeployPolicy {
    pub fn parse(text: &str) -> OmResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| OmError::configuration("deploy policy", e.to_string()))
    }
}

/// Fully resolved deployer settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub fqdn: String,
    /// Bare host label, also used for the audit snapshot name.
    pub hostname: String,
    /// StatefulSet-style pod ordinal, taken from the trailing `-N` of the
    /// host label.
    pub ordinal: u32,
    /// Pod 0 additionally reconciles the project's alert configurations.
    pub first_pod: bool,

    pub base_url: String,
    pub public_key: String,
    pub private_key: String,
    pub project_id: String,
    pub mongo_version: String,

    pub port: u16,
    pub ca_cert_path: PathBuf,
    pub cert_key_path: PathBuf,
    pub replica_set_name: Option<String>,

    pub deployment_type: DeploymentType,
    pub sharded_cluster_name: Option<String>,
    pub config_server_replica_set: Option<String>,

    pub priority: i64,
    pub arbiter: bool,
    pub backup: bool,
    pub monitoring: bool,

    /// Externally-resolvable `host:port` advertised for this member, if
    /// external discovery is configured.
    pub horizon: Option<String>,
    pub sub_domain: String,

    pub snapshot_dir: PathBuf,
    pub alerts_path: PathBuf,
    pub agent_versions_dir: PathBuf,
}

/// File locations and overrides fed in from the command line.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub fqdn: Option<String>,
    pub config_path: PathBuf,
    pub policy_path: PathBuf,
    pub alerts_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub agent_versions_dir: PathBuf,
}

fn require_env(name: &str) -> OmResult<String> {
    std::env::var(name)
        .map_err(|_| OmError::configuration(name, "environment variable must be set"))
}

/// Validates an FQDN: dot-separated labels of 1-63 alphanumeric-or-hyphen
/// characters, no label starting or ending with a hyphen. One trailing dot
/// is tolerated and stripped.
pub fn validate_fqdn(fqdn: &str) -> OmResult<String> {
    let trimmed = fqdn.strip_suffix('.').unwrap_or(fqdn);
    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    };
    if trimmed.is_empty() || !trimmed.split('.').all(valid_label) {
        return Err(OmError::configuration(
            "fqdn",
            format!("'{fqdn}' is not a valid FQDN"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Extracts the StatefulSet pod ordinal from a host label such as
/// `mongodb-pace-pst-2`.
pub fn pod_ordinal(host_label: &str) -> OmResult<u32> {
    host_label
        .rsplit('-')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            OmError::configuration(
                "hostname",
                format!("'{host_label}' does not end in a pod ordinal"),
            )
        })
}

impl Settings {
    /// Resolves settings from the environment, the mounted configuration
    /// files, and `opts`.
    pub fn load(opts: &LoadOptions) -> OmResult<Self> {
        let fqdn = match &opts.fqdn {
            Some(explicit) => validate_fqdn(explicit)?,
            None => {
                let host = hostname::get()
                    .map_err(|e| OmError::configuration("hostname", e.to_string()))?;
                validate_fqdn(&host.to_string_lossy())?
            }
        };

        let conf_text = std::fs::read_to_string(&opts.config_path)
            .map_err(|e| OmError::io(opts.config_path.display().to_string(), e))?;
        let conf = MongodConf::parse(&conf_text)?;

        let policy = match std::fs::read_to_string(&opts.policy_path) {
            Ok(text) => DeployPolicy::parse(&text)?,
            Err(_) => DeployPolicy::default(),
        };

        Self::resolve(fqdn, conf, policy, opts)
    }

    /// Combines an already-parsed configuration with the environment.
    pub fn resolve(
        fqdn: String,
        conf: MongodConf,
        policy: DeployPolicy,
        opts: &LoadOptions,
    ) -> OmResult<Self> {
        let hostname = fqdn.split('.').next().unwrap_or(&fqdn).to_string();
        let ordinal = pod_ordinal(&hostname)?;

        let deployment_type = policy
            .deployment_type
            .as_deref()
            .unwrap_or("rs")
            .parse::<DeploymentType>()?;

        let replica_set_name = conf.replication.map(|r| r.repl_set_name);
        if replica_set_name.is_none() && !deployment_type.is_router() {
            return Err(OmError::configuration(
                "replication.replSetName",
                "the replica set/shard name must be present in mongod.conf",
            ));
        }

        let horizon = match (
            std::env::var(env_keys::HORIZON_ADDR).ok(),
            std::env::var(env_keys::HORIZON_PORT).ok(),
        ) {
            (Some(addr), Some(port)) => {
                let base: u32 = port.parse().map_err(|_| {
                    OmError::configuration(env_keys::HORIZON_PORT, "must be a port number")
                })?;
                Some(format!("{addr}:{}", base + ordinal))
            }
            _ => None,
        };

        Ok(Self {
            first_pod: ordinal == 0,
            ordinal,
            base_url: require_env(env_keys::BASE_URL)?,
            public_key: require_env(env_keys::PUBLIC_KEY)?,
            private_key: require_env(env_keys::PRIVATE_KEY)?,
            project_id: require_env(env_keys::PROJECT_ID)?,
            mongo_version: require_env(env_keys::MONGO_VERSION)?,
            port: conf.net.port,
            ca_cert_path: conf.net.tls.ca_file,
            cert_key_path: conf.net.tls.certificate_key_file,
            replica_set_name,
            deployment_type,
            sharded_cluster_name: policy.sharded_cluster_name,
            config_server_replica_set: policy.config_server_replica_set,
            priority: policy.priority.get(&hostname).copied().unwrap_or(1),
            arbiter: policy.arbiter.contains(&hostname),
            backup: !policy.non_backup_agent.contains(&hostname),
            monitoring: !policy.non_monitoring_agent.contains(&hostname),
            horizon,
            sub_domain: policy.sub_domain.unwrap_or_else(|| "test".to_string()),
            snapshot_dir: opts.snapshot_dir.clone(),
            alerts_path: opts.alerts_path.clone(),
            agent_versions_dir: opts.agent_versions_dir.clone(),
            fqdn,
            hostname,
        })
    }

    /// Horizon mappings advertised for this member, if any.
    pub fn horizons(&self) -> om_common::model::Horizons {
        let mut horizons = om_common::model::Horizons::new();
        if let Some(h) = &self.horizon {
            horizons.insert("OUTSIDE".to_string(), h.clone());
        }
        horizons
    }

    /// Assembles this member's desired state for the reconciler.
    pub fn desired_state(&self, agent_version: Option<String>) -> OmResult<DesiredState> {
        let process = om_common::builders::build_process(
            &self.fqdn,
            &self.sub_domain,
            self.port,
            &self.mongo_version,
            self.replica_set_name.as_deref(),
            &self.cert_key_path.to_string_lossy(),
            self.horizons(),
            self.deployment_type,
            self.sharded_cluster_name.as_deref(),
        )?;
        let member = om_common::builders::build_replica_set_member(
            self.priority,
            self.arbiter,
            self.horizons(),
        );

        Ok(DesiredState {
            process,
            member,
            deployment_type: self.deployment_type,
            replica_set_name: self.replica_set_name.clone(),
            sharded_cluster_name: self.sharded_cluster_name.clone(),
            config_server_replica_set: self.config_server_replica_set.clone(),
            backup: self.backup,
            monitoring: self.monitoring,
            agent_version,
            base_url: self.base_url.clone(),
        })
    }
}
