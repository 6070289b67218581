//! Entity builders: pure factories for the canonical JSON representations
//! of processes, replica-set members, replica sets, and sharded clusters.
//!
//! No I/O and no shared state; every builder is a function of its arguments.

use std::str::FromStr;

use serde_json::Map;

use crate::error::{OmError, OmResult};
use crate::model::{
    ClusterRole, Horizons, LogRotate, MongoArgs, NetArgs, Process, ProcessType, ReplicaSet,
    ReplicaSetMember, ReplicaSetSettings, ReplicationArgs, SecurityArgs, SetParameterArgs, Shard,
    ShardedCluster, ShardingArgs, StorageArgs, SystemLogArgs, TlsArgs,
};

/// Fixed paths and defaults for managed members.
pub mod defaults {
    /// Listen on all interfaces; access is constrained by TLS + x509.
    pub const BIND_IP: &str = "0.0.0.0";
    /// TLS is mandatory between managed members.
    pub const TLS_MODE: &str = "requireTLS";
    pub const TLS_DISABLED_PROTOCOLS: &str = "TLS1_0,TLS1_1";
    pub const CLUSTER_AUTH_MODE: &str = "x509";
    pub const DB_PATH: &str = "/data/db";
    pub const STORAGE_ENGINE: &str = "wiredTiger";
    pub const LOG_PATH: &str = "/var/log/mongodb-mms-automation/mongodb.log";
    pub const AUTH_SCHEMA_VERSION: i64 = 5;
    pub const LOG_ROTATE_SIZE_MB: i64 = 1000;
    pub const LOG_ROTATE_TIME_HRS: i64 = 24;
    /// Replica-set protocol version (the only one modern servers accept).
    pub const PROTOCOL_VERSION: &str = "1";
    pub const HEARTBEAT_TIMEOUT_SECS: i64 = 10;
    pub const ELECTION_TIMEOUT_MILLIS: i64 = 10_000;
    pub const CATCH_UP_TIMEOUT_MILLIS: i64 = -1;
    pub const CATCH_UP_TAKEOVER_DELAY_MILLIS: i64 = 30_000;
    /// Name prefix for router processes, which have no replica set.
    pub const ROUTER_NAME_PREFIX: &str = "mongos";
}

/// The role a member plays in the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentType {
    /// Plain replica-set member (`rs`).
    ReplicaSet,
    /// Shard-server member of a sharded cluster (`sh`).
    Shard,
    /// Config-server member of a sharded cluster (`cs`).
    ConfigServer,
    /// `mongos` router (`ms`).
    Router,
}

impl DeploymentType {
    /// Returns the two-letter code used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentType::ReplicaSet => "rs",
            DeploymentType::Shard => "sh",
            DeploymentType::ConfigServer => "cs",
            DeploymentType::Router => "ms",
        }
    }

    /// Routers carry no storage or replication configuration.
    pub fn is_router(&self) -> bool {
        matches!(self, DeploymentType::Router)
    }

    fn cluster_role(&self) -> Option<ClusterRole> {
        match self {
            DeploymentType::ConfigServer => Some(ClusterRole::Configsvr),
            DeploymentType::Shard => Some(ClusterRole::Shardsvr),
            DeploymentType::ReplicaSet | DeploymentType::Router => None,
        }
    }
}

impl FromStr for DeploymentType {
    type Err = OmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rs" => Ok(DeploymentType::ReplicaSet),
            "sh" => Ok(DeploymentType::Shard),
            "cs" => Ok(DeploymentType::ConfigServer),
            "ms" => Ok(DeploymentType::Router),
            other => Err(OmError::configuration(
                "deploymentType",
                format!(
                    "must be 'rs' (replica set member), 'sh' (shard member), \
                     'cs' (config server member), or 'ms' (mongos), got '{other}'"
                ),
            )),
        }
    }
}

/// Derives the feature compatibility version (`major.minor`) from a full
/// MongoDB version string such as `4.4.5-ent`.
fn feature_compatibility_version(mongo_version: &str) -> String {
    let mut parts = mongo_version.split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("{major}.{minor}"),
        _ => mongo_version.to_string(),
    }
}

/// Builds the canonical process entity for one member.
///
/// The `name` field is left empty; the reconciler assigns it when the entity
/// is placed into the shared document. Routers require `sharded_cluster_name`
/// and omit the storage/replication blocks in favor of a `cluster` reference;
/// every other deployment type requires `replica_set_name`.
#[allow(clippy::too_many_arguments)]
pub fn build_process(
    fqdn: &str,
    subdomain: &str,
    port: u16,
    mongo_version: &str,
    replica_set_name: Option<&str>,
    cert_path: &str,
    horizons: Horizons,
    deployment_type: DeploymentType,
    sharded_cluster_name: Option<&str>,
) -> OmResult<Process> {
    let cluster = if deployment_type.is_router() {
        let name = sharded_cluster_name.ok_or_else(|| {
            OmError::configuration(
                "shardedClusterName",
                "required when the deploymentType is 'ms'",
            )
        })?;
        Some(name.to_string())
    } else {
        None
    };

    let replication = if deployment_type.is_router() {
        ReplicationArgs::default()
    } else {
        let rs_name = replica_set_name.ok_or_else(|| {
            OmError::configuration("replicaSetName", "required for replicated deployment types")
        })?;
        ReplicationArgs {
            repl_set_name: Some(rs_name.to_string()),
            extra: Map::new(),
        }
    };

    let storage = (!deployment_type.is_router()).then(|| StorageArgs {
        db_path: defaults::DB_PATH.to_string(),
        engine: defaults::STORAGE_ENGINE.to_string(),
        extra: Map::new(),
    });

    // DNS split-horizon name: host label plus the internal subdomain.
    let host_label = fqdn.split('.').next().unwrap_or(fqdn);
    let alias = format!("{host_label}.{subdomain}");

    Ok(Process {
        name: String::new(),
        hostname: fqdn.to_string(),
        alias,
        process_type: if deployment_type.is_router() {
            ProcessType::Mongos
        } else {
            ProcessType::Mongod
        },
        version: mongo_version.to_string(),
        feature_compatibility_version: feature_compatibility_version(mongo_version),
        auth_schema_version: defaults::AUTH_SCHEMA_VERSION,
        disabled: false,
        manual_mode: false,
        direct_attach_should_filter_by_file_list: false,
        args: MongoArgs {
            net: NetArgs {
                bind_ip: defaults::BIND_IP.to_string(),
                port,
                tls: TlsArgs {
                    mode: defaults::TLS_MODE.to_string(),
                    certificate_key_file: cert_path.to_string(),
                    disabled_protocols: defaults::TLS_DISABLED_PROTOCOLS.to_string(),
                    extra: Map::new(),
                },
                extra: Map::new(),
            },
            replication,
            security: SecurityArgs {
                cluster_auth_mode: defaults::CLUSTER_AUTH_MODE.to_string(),
                extra: Map::new(),
            },
            set_parameter: SetParameterArgs {
                ocsp_enabled: false,
                extra: Map::new(),
            },
            sharding: ShardingArgs {
                cluster_role: deployment_type.cluster_role(),
                extra: Map::new(),
            },
            storage,
            system_log: SystemLogArgs {
                destination: "file".to_string(),
                path: defaults::LOG_PATH.to_string(),
                extra: Map::new(),
            },
            extra: Map::new(),
        },
        log_rotate: LogRotate {
            size_threshold_mb: defaults::LOG_ROTATE_SIZE_MB,
            time_threshold_hrs: defaults::LOG_ROTATE_TIME_HRS,
            extra: Map::new(),
        },
        horizons,
        cluster,
        extra: Map::new(),
    })
}

/// Builds a replica-set member template.
///
/// `id` and `host` are placeholders; the reconciler assigns both when the
/// member is placed into its replica set. Arbiters are forced to priority 0
/// regardless of the supplied priority: an arbiter must never hold voting
/// weight for elections.
pub fn build_replica_set_member(priority: i64, arbiter: bool, horizons: Horizons) -> ReplicaSetMember {
    ReplicaSetMember {
        id: 0,
        host: String::new(),
        arbiter_only: arbiter,
        build_indexes: true,
        hidden: false,
        priority: if arbiter { 0 } else { priority },
        slave_delay: 0,
        tags: Map::new(),
        votes: 1,
        horizons,
        extra: Map::new(),
    }
}

/// Builds an empty replica set with the fixed defaults.
pub fn build_empty_replica_set(name: &str) -> ReplicaSet {
    ReplicaSet {
        id: name.to_string(),
        members: Vec::new(),
        protocol_version: defaults::PROTOCOL_VERSION.to_string(),
        settings: ReplicaSetSettings {
            chaining_allowed: true,
            heartbeat_timeout_secs: defaults::HEARTBEAT_TIMEOUT_SECS,
            catch_up_timeout_millis: defaults::CATCH_UP_TIMEOUT_MILLIS,
            catch_up_takeover_delay_millis: defaults::CATCH_UP_TAKEOVER_DELAY_MILLIS,
            election_timeout_millis: defaults::ELECTION_TIMEOUT_MILLIS,
            extra: Map::new(),
        },
        write_concern_majority_journal_default: "true".to_string(),
        extra: Map::new(),
    }
}

/// Builds an empty sharded cluster referencing its config-server replica set.
pub fn build_empty_sharded_cluster(name: &str, config_server_replica_set: &str) -> ShardedCluster {
    ShardedCluster {
        name: name.to_string(),
        shards: Vec::<Shard>::new(),
        config_server_replica: config_server_replica_set.to_string(),
        collections: Vec::new(),
        extra: Map::new(),
    }
}
