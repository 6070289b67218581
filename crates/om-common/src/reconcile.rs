//! The reconciliation engine: diff/merge of one member's desired state into
//! the shared automation-config document.
//!
//! [`reconcile`] is pure and deterministic: it works on a clone of the
//! fetched document, never mutates the caller's copy, and reports exactly
//! which top-level sections it touched. An empty [`ChangedSections`] is the
//! idempotence guarantee: the caller must skip the write-back entirely.

use serde::Serialize;
use tracing::debug;

use crate::builders::{self, defaults, DeploymentType};
use crate::error::{OmError, OmResult};
use crate::ident;
use crate::model::{
    AgentVersion, AutomationConfig, HostRecord, Process, ReplicaSetMember, Shard,
};

/// A member's complete desired state, constructed once per invocation and
/// passed by reference into the engine. No ambient lookups happen inside the
/// reconciler.
#[derive(Debug, Clone)]
pub struct DesiredState {
    /// The canonical process entity for this member (name unassigned).
    pub process: Process,
    /// Member template for the owning replica set (id/host unassigned).
    /// Ignored for routers.
    pub member: ReplicaSetMember,
    pub deployment_type: DeploymentType,
    /// Replica-set/shard name; required unless this member is a router.
    pub replica_set_name: Option<String>,
    /// Required for shard members joining a cluster and for routers.
    pub sharded_cluster_name: Option<String>,
    /// Config-server replica-set name, used when the sharded cluster has to
    /// be created.
    pub config_server_replica_set: Option<String>,
    /// Whether this host runs the backup agent.
    pub backup: bool,
    /// Whether this host runs the monitoring agent.
    pub monitoring: bool,
    /// Locally detected automation-agent version, if one is installed.
    /// Consulted only when the document has no `agentVersion` section.
    pub agent_version: Option<String>,
    /// Ops Manager base address, used to derive the agent download URL.
    pub base_url: String,
}

impl DesiredState {
    /// Namespace prefix for this member's generated process name.
    fn name_prefix(&self) -> OmResult<&str> {
        if self.deployment_type.is_router() {
            // Routers have no replica set; they share one fixed namespace.
            Ok(defaults::ROUTER_NAME_PREFIX)
        } else {
            self.replica_set_name.as_deref().ok_or_else(|| {
                OmError::configuration(
                    "replicaSetName",
                    "required for replicated deployment types",
                )
            })
        }
    }
}

/// Which top-level sections of the shared document a reconciliation touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangedSections {
    pub agent_version: bool,
    pub processes: bool,
    pub replica_sets: bool,
    pub sharding: bool,
    pub backup_versions: bool,
    pub monitoring_versions: bool,
}

impl ChangedSections {
    /// True if any section was modified; false means the write-back must be
    /// skipped.
    pub fn any(&self) -> bool {
        self.agent_version
            || self.processes
            || self.replica_sets
            || self.sharding
            || self.backup_versions
            || self.monitoring_versions
    }

    /// Names of the modified sections, for logging.
    pub fn names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.agent_version {
            out.push("agentVersion");
        }
        if self.processes {
            out.push("processes");
        }
        if self.replica_sets {
            out.push("replicaSets");
        }
        if self.sharding {
            out.push("sharding");
        }
        if self.backup_versions {
            out.push("backupVersions");
        }
        if self.monitoring_versions {
            out.push("monitoringVersions");
        }
        out
    }
}

/// Deep structural equality over canonicalized JSON values; key order never
/// matters.
fn json_eq<A: Serialize, B: Serialize>(a: &A, b: &B) -> OmResult<bool> {
    Ok(serde_json::to_value(a)? == serde_json::to_value(b)?)
}

/// Ensures presence (or absence) of a `{hostname}` record; returns true if
/// the list was modified.
fn toggle_host(records: &mut Vec<HostRecord>, hostname: &str, wanted: bool) -> bool {
    let position = records.iter().position(|r| r.hostname == hostname);
    match (wanted, position) {
        (true, None) => {
            records.push(HostRecord::new(hostname));
            true
        }
        (false, Some(idx)) => {
            records.remove(idx);
            true
        }
        _ => false,
    }
}

/// Merges `desired` into a copy of `config`.
///
/// Locates or creates every referenced entity, replaces entities whose
/// content differs, and reports which sections were modified. The input
/// document is never mutated.
pub fn reconcile(
    config: &AutomationConfig,
    desired: &DesiredState,
) -> OmResult<(AutomationConfig, ChangedSections)> {
    let mut doc = config.clone();
    let mut changed = ChangedSections::default();

    // Agent-version section: created once if absent, from the locally
    // detected agent install.
    if doc.agent_version.is_none() {
        let name = desired.agent_version.clone().ok_or_else(|| {
            OmError::missing_dependency(
                "the automation agent does not appear to be installed; \
                 install it before continuing",
            )
        })?;
        doc.agent_version = Some(AgentVersion {
            directory_url: format!(
                "{}/download/agent/automation/",
                desired.base_url.trim_end_matches('/')
            ),
            name,
            extra: serde_json::Map::new(),
        });
        changed.agent_version = true;
    }

    // Process section: one entity per hostname, name reused on replacement.
    let prefix = desired.name_prefix()?;
    let mut process = desired.process.clone();
    let existing_names: Vec<String> = doc.processes.iter().map(|p| p.name.clone()).collect();

    let mut previous_name: Option<String> = None;
    match doc
        .processes
        .iter()
        .position(|p| p.hostname == process.hostname)
    {
        Some(idx) => {
            let name = doc.processes[idx].name.clone();
            process.name = name.clone();
            previous_name = Some(name);
            if json_eq(&doc.processes[idx], &process)? {
                debug!(process = %process.name, "process unchanged");
            } else {
                doc.processes.remove(idx);
                doc.processes.push(process.clone());
                changed.processes = true;
            }
        }
        None => {
            process.name = ident::next_process_name(&existing_names, prefix);
            doc.processes.push(process.clone());
            changed.processes = true;
        }
    }
    let process_name = process.name;

    // Replica-set section: routers have none.
    if !desired.deployment_type.is_router() {
        let rs_name = desired.replica_set_name.as_deref().ok_or_else(|| {
            OmError::configuration("replicaSetName", "required for replicated deployment types")
        })?;

        let rs_idx = match doc.replica_sets.iter().position(|r| r.id == rs_name) {
            Some(idx) => idx,
            None => {
                doc.replica_sets
                    .push(builders::build_empty_replica_set(rs_name));
                doc.replica_sets.len() - 1
            }
        };

        // The member is keyed by the process name it referenced before this
        // round; a renamed process would otherwise orphan its member.
        let lookup_host = previous_name.as_deref().unwrap_or(&process_name);
        let mut member = desired.member.clone();
        member.host = process_name.clone();

        let rs = &mut doc.replica_sets[rs_idx];
        let existing_ids: Vec<i64> = rs.members.iter().map(|m| m.id).collect();
        match rs.members.iter().position(|m| m.host == lookup_host) {
            Some(midx) => {
                member.id = rs.members[midx].id;
                if !json_eq(&rs.members[midx], &member)? {
                    rs.members[midx] = member;
                    changed.replica_sets = true;
                }
            }
            None => {
                member.id = ident::next_member_id(&existing_ids);
                rs.members.push(member);
                changed.replica_sets = true;
            }
        }

        // Sharding section: link the shard's replica set into its cluster.
        if desired.deployment_type == DeploymentType::Shard {
            if let Some(cluster_name) = desired.sharded_cluster_name.as_deref() {
                let cidx = match doc.sharding.iter().position(|c| c.name == cluster_name) {
                    Some(idx) => idx,
                    None => {
                        let config_server =
                            desired.config_server_replica_set.as_deref().ok_or_else(|| {
                                OmError::configuration(
                                    "configServerReplicaSet",
                                    "required when creating a sharded cluster",
                                )
                            })?;
                        doc.sharding.push(builders::build_empty_sharded_cluster(
                            cluster_name,
                            config_server,
                        ));
                        changed.sharding = true;
                        doc.sharding.len() - 1
                    }
                };
                let cluster = &mut doc.sharding[cidx];
                if !cluster.shards.iter().any(|s| s.id == rs_name) {
                    cluster.shards.push(Shard::for_replica_set(rs_name));
                    changed.sharding = true;
                }
            }
        }
    }

    // Backup / monitoring: independent presence toggles.
    let hostname = &desired.process.hostname;
    changed.backup_versions = toggle_host(&mut doc.backup_versions, hostname, desired.backup);
    changed.monitoring_versions =
        toggle_host(&mut doc.monitoring_versions, hostname, desired.monitoring);

    Ok((doc, changed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{build_process, build_replica_set_member};
    use crate::model::Horizons;
    use pretty_assertions::assert_eq;

    const BASE_URL: &str = "https://ops-manager.example.com:8443";

    fn desired_for(hostname: &str, rs_name: &str) -> DesiredState {
        let process = build_process(
            hostname,
            "pace-pst",
            27017,
            "4.4.5-ent",
            Some(rs_name),
            "/data/pki/server.pem",
            Horizons::new(),
            DeploymentType::ReplicaSet,
            None,
        )
        .unwrap();
        DesiredState {
            process,
            member: build_replica_set_member(1, false, Horizons::new()),
            deployment_type: DeploymentType::ReplicaSet,
            replica_set_name: Some(rs_name.to_string()),
            sharded_cluster_name: None,
            config_server_replica_set: None,
            backup: true,
            monitoring: true,
            agent_version: Some("13.10.0.8620-1".to_string()),
            base_url: BASE_URL.to_string(),
        }
    }

    fn shard_desired(hostname: &str, rs_name: &str, cluster: &str) -> DesiredState {
        let process = build_process(
            hostname,
            "pace-pst",
            27018,
            "4.4.5-ent",
            Some(rs_name),
            "/data/pki/server.pem",
            Horizons::new(),
            DeploymentType::Shard,
            Some(cluster),
        )
        .unwrap();
        DesiredState {
            process,
            member: build_replica_set_member(1, false, Horizons::new()),
            deployment_type: DeploymentType::Shard,
            replica_set_name: Some(rs_name.to_string()),
            sharded_cluster_name: Some(cluster.to_string()),
            config_server_replica_set: Some("cs0".to_string()),
            backup: false,
            monitoring: false,
            agent_version: Some("13.10.0.8620-1".to_string()),
            base_url: BASE_URL.to_string(),
        }
    }

    #[test]
    fn test_new_member_onboarding() {
        let empty = AutomationConfig::default();
        let desired = desired_for("h0", "rs0");

        let (doc, changed) = reconcile(&empty, &desired).unwrap();

        assert_eq!(doc.processes.len(), 1);
        assert_eq!(doc.processes[0].name, "rs0_0");
        assert_eq!(doc.processes[0].hostname, "h0");

        assert_eq!(doc.replica_sets.len(), 1);
        assert_eq!(doc.replica_sets[0].id, "rs0");
        assert_eq!(doc.replica_sets[0].members.len(), 1);
        assert_eq!(doc.replica_sets[0].members[0].id, 0);
        assert_eq!(doc.replica_sets[0].members[0].host, "rs0_0");

        assert_eq!(doc.backup_versions, vec![HostRecord::new("h0")]);
        assert_eq!(doc.monitoring_versions, vec![HostRecord::new("h0")]);

        let agent = doc.agent_version.as_ref().unwrap();
        assert_eq!(agent.name, "13.10.0.8620-1");
        assert_eq!(
            agent.directory_url,
            format!("{BASE_URL}/download/agent/automation/")
        );

        assert!(changed.agent_version);
        assert!(changed.processes);
        assert!(changed.replica_sets);
        assert!(changed.backup_versions);
        assert!(changed.monitoring_versions);
        assert!(!changed.sharding);
    }

    #[test]
    fn test_no_op_rerun() {
        let empty = AutomationConfig::default();
        let desired = desired_for("h0", "rs0");

        let (first, _) = reconcile(&empty, &desired).unwrap();
        let (second, changed) = reconcile(&first, &desired).unwrap();

        assert!(!changed.any(), "second run must be a no-op: {:?}", changed);
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn test_monitoring_removal_changes_only_that_section() {
        let empty = AutomationConfig::default();
        let desired = desired_for("h0", "rs0");
        let (doc, _) = reconcile(&empty, &desired).unwrap();

        let mut without_monitoring = desired.clone();
        without_monitoring.monitoring = false;
        let (doc, changed) = reconcile(&doc, &without_monitoring).unwrap();

        assert!(doc.monitoring_versions.is_empty());
        assert_eq!(
            changed,
            ChangedSections {
                monitoring_versions: true,
                ..ChangedSections::default()
            }
        );
    }

    #[test]
    fn test_identity_uniqueness_across_members() {
        let mut doc = AutomationConfig::default();
        for i in 0..5 {
            let desired = desired_for(&format!("h{i}"), "rs0");
            let (next, _) = reconcile(&doc, &desired).unwrap();
            doc = next;
        }

        let names: Vec<&str> = doc.processes.iter().map(|p| p.name.as_str()).collect();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), names.len(), "duplicate process names: {names:?}");

        let ids: Vec<i64> = doc.replica_sets[0].members.iter().map(|m| m.id).collect();
        let mut id_dedup = ids.clone();
        id_dedup.sort();
        id_dedup.dedup();
        assert_eq!(id_dedup.len(), ids.len(), "duplicate member ids: {ids:?}");
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_changed_process_keeps_name_and_member_id() {
        let empty = AutomationConfig::default();
        let desired = desired_for("h0", "rs0");
        let (doc, _) = reconcile(&empty, &desired).unwrap();

        // Same host, different port: the entity is replaced but keeps its
        // generated name, and the member keeps its id.
        let mut moved = desired.clone();
        moved.process.args.net.port = 27117;
        let (doc, changed) = reconcile(&doc, &moved).unwrap();

        assert!(changed.processes);
        assert!(!changed.replica_sets);
        assert_eq!(doc.processes.len(), 1);
        assert_eq!(doc.processes[0].name, "rs0_0");
        assert_eq!(doc.processes[0].args.net.port, 27117);
        assert_eq!(doc.replica_sets[0].members.len(), 1);
        assert_eq!(doc.replica_sets[0].members[0].id, 0);
    }

    #[test]
    fn test_member_change_replaces_in_place() {
        let empty = AutomationConfig::default();
        let desired = desired_for("h0", "rs0");
        let (doc, _) = reconcile(&empty, &desired).unwrap();

        let mut promoted = desired.clone();
        promoted.member.priority = 5;
        let (doc, changed) = reconcile(&doc, &promoted).unwrap();

        assert!(!changed.processes);
        assert!(changed.replica_sets);
        assert_eq!(doc.replica_sets[0].members.len(), 1);
        assert_eq!(doc.replica_sets[0].members[0].priority, 5);
        assert_eq!(doc.replica_sets[0].members[0].id, 0);
    }

    #[test]
    fn test_missing_agent_install_is_fatal() {
        let empty = AutomationConfig::default();
        let mut desired = desired_for("h0", "rs0");
        desired.agent_version = None;

        let err = reconcile(&empty, &desired).unwrap_err();
        assert!(matches!(err, OmError::MissingDependency { .. }));
    }

    #[test]
    fn test_existing_agent_section_untouched() {
        let empty = AutomationConfig::default();
        let desired = desired_for("h0", "rs0");
        let (doc, _) = reconcile(&empty, &desired).unwrap();

        // Once present, the section never requires the local install.
        let mut desired2 = desired_for("h1", "rs0");
        desired2.agent_version = None;
        let (doc, changed) = reconcile(&doc, &desired2).unwrap();

        assert!(!changed.agent_version);
        assert_eq!(doc.agent_version.as_ref().unwrap().name, "13.10.0.8620-1");
    }

    #[test]
    fn test_shard_member_links_into_cluster() {
        let empty = AutomationConfig::default();
        let desired = shard_desired("s0", "sh0", "cl0");

        let (doc, changed) = reconcile(&empty, &desired).unwrap();

        assert!(changed.sharding);
        assert_eq!(doc.sharding.len(), 1);
        assert_eq!(doc.sharding[0].name, "cl0");
        assert_eq!(doc.sharding[0].config_server_replica, "cs0");
        assert_eq!(doc.sharding[0].shards.len(), 1);
        assert_eq!(doc.sharding[0].shards[0].id, "sh0");
        assert_eq!(doc.sharding[0].shards[0].rs, "sh0");

        // A second member of the same shard leaves the sharding section alone.
        let desired2 = shard_desired("s1", "sh0", "cl0");
        let (doc, changed) = reconcile(&doc, &desired2).unwrap();
        assert!(!changed.sharding);
        assert_eq!(doc.sharding[0].shards.len(), 1);
    }

    #[test]
    fn test_router_skips_replica_sets() {
        let empty = AutomationConfig::default();
        let process = build_process(
            "r0",
            "sub",
            27017,
            "4.4.5-ent",
            None,
            "/data/pki/server.pem",
            Horizons::new(),
            DeploymentType::Router,
            Some("cl0"),
        )
        .unwrap();
        let desired = DesiredState {
            process,
            member: build_replica_set_member(1, false, Horizons::new()),
            deployment_type: DeploymentType::Router,
            replica_set_name: None,
            sharded_cluster_name: Some("cl0".to_string()),
            config_server_replica_set: None,
            backup: false,
            monitoring: true,
            agent_version: Some("13.10.0.8620-1".to_string()),
            base_url: BASE_URL.to_string(),
        };

        let (doc, changed) = reconcile(&empty, &desired).unwrap();

        assert!(doc.replica_sets.is_empty());
        assert!(!changed.replica_sets);
        assert_eq!(doc.processes[0].name, "mongos_0");
        assert_eq!(doc.processes[0].cluster.as_deref(), Some("cl0"));
    }

    #[test]
    fn test_input_document_never_mutated() {
        let empty = AutomationConfig::default();
        let desired = desired_for("h0", "rs0");

        let snapshot = serde_json::to_value(&empty).unwrap();
        let _ = reconcile(&empty, &desired).unwrap();
        assert_eq!(serde_json::to_value(&empty).unwrap(), snapshot);
    }
}
