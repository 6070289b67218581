//! Typed model of the Ops Manager automation-config document.
//!
//! The document is the single shared JSON structure owned by the management
//! plane; every entity here deserializes at the transport boundary into an
//! explicit struct with its required fields declared. Keys this tool does not
//! manage round-trip through `#[serde(flatten)]` maps so a fetched document
//! can always be resubmitted whole.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Horizon mappings: horizon name to an externally-resolvable `host:port`.
pub type Horizons = BTreeMap<String, String>;

/// The shared automation-config document.
///
/// Fetched fresh at the start of each reconciliation attempt, mutated in
/// memory, and either discarded (no-op) or submitted as a full replacement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    /// One process entity per distinct hostname in the deployment group.
    #[serde(default)]
    pub processes: Vec<Process>,

    /// Replica sets, keyed by `_id` (the replica-set/shard name).
    #[serde(default)]
    pub replica_sets: Vec<ReplicaSet>,

    /// Sharded clusters, keyed by `name`.
    #[serde(default)]
    pub sharding: Vec<ShardedCluster>,

    /// Hosts running the backup agent.
    #[serde(default)]
    pub backup_versions: Vec<HostRecord>,

    /// Hosts running the monitoring agent.
    #[serde(default)]
    pub monitoring_versions: Vec<HostRecord>,

    /// Automation agent version metadata, created once if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<AgentVersion>,

    /// Document version counter. Management-plane-owned: read and discarded
    /// before resubmission, never set by the reconciler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,

    /// Available MongoDB builds. Management-plane-owned, discarded before
    /// resubmission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mongo_db_versions: Option<Value>,

    /// Sections this tool does not manage (auth, ssl, options, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AutomationConfig {
    /// Drops the keys the management plane owns and would reject or
    /// recompute on a full-document replace.
    pub fn strip_server_managed(&mut self) {
        self.version = None;
        self.mongo_db_versions = None;
    }
}

/// Automation agent version section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentVersion {
    /// Download URL for agent binaries, derived from the Ops Manager base URL.
    pub directory_url: String,
    /// Installed agent version, e.g. `13.10.0.8620-1`.
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Membership record for the backup/monitoring agent sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    /// FQDN of the member.
    pub hostname: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HostRecord {
    /// Creates a bare membership record.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            extra: Map::new(),
        }
    }
}

/// The kind of server binary a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    /// Data-bearing or config server.
    Mongod,
    /// Sharded-cluster router.
    Mongos,
}

/// A single `processes` entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Generated name, unique within the deployment group; referenced
    /// verbatim by the owning replica-set member's `host` field.
    #[serde(default)]
    pub name: String,

    /// FQDN of the pod. Exactly one process entity exists per hostname.
    pub hostname: String,

    /// Display alias (the DNS split-horizon name).
    pub alias: String,

    /// `mongod` or `mongos`.
    pub process_type: ProcessType,

    /// MongoDB version, e.g. `4.4.5-ent`.
    pub version: String,

    /// Feature compatibility version, `major.minor` of [`Process::version`].
    pub feature_compatibility_version: String,

    pub auth_schema_version: i64,
    pub disabled: bool,
    pub manual_mode: bool,
    pub direct_attach_should_filter_by_file_list: bool,

    /// Server configuration-file options.
    #[serde(rename = "args2_6")]
    pub args: MongoArgs,

    pub log_rotate: LogRotate,

    /// Split-horizon addresses advertised to clients outside the cluster
    /// network.
    #[serde(default)]
    pub horizons: Horizons,

    /// Sharded-cluster name; routers only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server options as they appear in the process's `args2_6` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoArgs {
    pub net: NetArgs,
    /// Empty for routers.
    pub replication: ReplicationArgs,
    pub security: SecurityArgs,
    pub set_parameter: SetParameterArgs,
    /// Empty unless the process carries a cluster role.
    pub sharding: ShardingArgs,
    /// Absent for routers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageArgs>,
    pub system_log: SystemLogArgs,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetArgs {
    pub bind_ip: String,
    pub port: u16,
    pub tls: TlsArgs,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsArgs {
    /// Always `requireTLS` for managed members.
    pub mode: String,
    pub certificate_key_file: String,
    pub disabled_protocols: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repl_set_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityArgs {
    pub cluster_auth_mode: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParameterArgs {
    pub ocsp_enabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Cluster role of a `mongod` within a sharded cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    Configsvr,
    Shardsvr,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardingArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_role: Option<ClusterRole>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageArgs {
    pub db_path: String,
    pub engine: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemLogArgs {
    pub destination: String,
    pub path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRotate {
    #[serde(rename = "sizeThresholdMB")]
    pub size_threshold_mb: i64,
    #[serde(rename = "timeThresholdHrs")]
    pub time_threshold_hrs: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A `replicaSets` entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSet {
    /// Replica-set/shard name.
    #[serde(rename = "_id")]
    pub id: String,

    /// Ordered members, `_id` unique within this set.
    #[serde(default)]
    pub members: Vec<ReplicaSetMember>,

    pub protocol_version: String,
    pub settings: ReplicaSetSettings,
    pub write_concern_majority_journal_default: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetSettings {
    pub chaining_allowed: bool,
    pub heartbeat_timeout_secs: i64,
    pub catch_up_timeout_millis: i64,
    pub catch_up_takeover_delay_millis: i64,
    pub election_timeout_millis: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A member entry within a replica set.
///
/// `id` is allocated monotonically within the owning set and never reused
/// while other members retain theirs; `host` references the matching
/// process's generated name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetMember {
    #[serde(rename = "_id", default)]
    pub id: i64,
    #[serde(default)]
    pub host: String,
    pub arbiter_only: bool,
    pub build_indexes: bool,
    pub hidden: bool,
    pub priority: i64,
    pub slave_delay: i64,
    #[serde(default)]
    pub tags: Map<String, Value>,
    pub votes: i64,
    #[serde(default)]
    pub horizons: Horizons,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A `sharding` entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardedCluster {
    pub name: String,
    #[serde(default)]
    pub shards: Vec<Shard>,
    /// Name of the config-server replica set.
    pub config_server_replica: String,
    #[serde(default)]
    pub collections: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A shard reference within a sharded cluster; `id` is the shard's
/// replica-set name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    #[serde(rename = "_id")]
    pub id: String,
    pub rs: String,
    #[serde(default)]
    pub tags: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Shard {
    /// Creates the reference linking a replica set into a sharded cluster.
    pub fn for_replica_set(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            rs: name,
            tags: Vec::new(),
            extra: Map::new(),
        }
    }
}
