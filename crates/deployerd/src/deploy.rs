//! The deployment pass: alert reconciliation (first pod only), then the
//! fetch / reconcile / replace / converge cycle against the shared
//! automation-config document.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use om_common::alerts::{diff_alerts, AlertConfig, AlertConfigPage};
use om_common::api::{endpoints, ApiTransport, OpsManagerClient};
use om_common::model::AutomationConfig;
use om_common::status::{ConvergencePoller, DEFAULT_MAX_ROUNDS, DEFAULT_POLL_INTERVAL};
use om_common::{reconcile, OmError, OmResult, PlanOutcome};

use crate::agent;
use crate::settings::Settings;

/// One pod's deployment pass against the management plane.
pub struct Deployer<T> {
    client: OpsManagerClient<T>,
    settings: Settings,
    poll_interval: Duration,
    poll_rounds: u32,
}

impl<T: ApiTransport> Deployer<T> {
    pub fn new(client: OpsManagerClient<T>, settings: Settings) -> Self {
        Self {
            client,
            settings,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Replaces the convergence polling cadence.
    pub fn with_polling(mut self, interval: Duration, rounds: u32) -> Self {
        self.poll_interval = interval;
        self.poll_rounds = rounds;
        self
    }

    /// Runs the full pass. Returns how the plan rollout ended; a polling
    /// timeout is a successful return, not an error.
    pub async fn run(&self) -> OmResult<PlanOutcome> {
        if self.settings.first_pod {
            self.reconcile_alerts().await?;
        }

        let agent_version = agent::detect_agent_version(&self.settings.agent_versions_dir);
        let desired = self.settings.desired_state(agent_version)?;

        let endpoint = endpoints::automation_config(&self.settings.project_id);
        let mut current: AutomationConfig = self.client.get(&endpoint).await?;
        current.strip_server_managed();

        let (next, changed) = reconcile(&current, &desired)?;
        if !changed.any() {
            info!(
                host = %self.settings.fqdn,
                "current configuration is correct, not replacing it"
            );
            return Ok(PlanOutcome::Converged { rounds: 0 });
        }

        info!(
            host = %self.settings.fqdn,
            sections = ?changed.names(),
            "replacing the automation configuration"
        );
        let snapshot = self.write_snapshot(&next)?;
        debug!(snapshot = %snapshot.display(), "wrote pre-replace snapshot");

        self.client.put(&endpoint, &next).await?;

        ConvergencePoller::new(&self.client, &self.settings.project_id)
            .with_interval(self.poll_interval)
            .with_max_rounds(self.poll_rounds)
            .wait_for_goal_state()
            .await
    }

    /// Reconciles the project's alert configurations from the mounted alerts
    /// file. A missing file means no alerts are managed here.
    async fn reconcile_alerts(&self) -> OmResult<()> {
        let text = match std::fs::read_to_string(&self.settings.alerts_path) {
            Ok(text) => text,
            Err(_) => {
                debug!(
                    path = %self.settings.alerts_path.display(),
                    "no alerts file mounted, skipping alert reconciliation"
                );
                return Ok(());
            }
        };
        let desired: Vec<AlertConfig> = serde_json::from_str(&text)?;

        let endpoint = endpoints::alert_configs(&self.settings.project_id);
        let page: AlertConfigPage = self.client.get(&endpoint).await?;

        let changes = diff_alerts(&self.settings.project_id, &page.results, &desired)?;
        if changes.is_empty() {
            debug!("alert configurations already correct");
            return Ok(());
        }

        for alert in &changes.create {
            info!(event = %alert.event_type_name, "creating alert configuration");
            self.client.post(&endpoint, alert).await?;
        }
        for alert in &changes.update {
            let id = alert.id.as_deref().ok_or_else(|| {
                OmError::configuration("alert id", "updates must carry the existing alert id")
            })?;
            info!(event = %alert.event_type_name, id, "updating alert configuration");
            self.client
                .put(&endpoints::alert_config(&self.settings.project_id, id), alert)
                .await?;
        }
        Ok(())
    }

    /// Writes the document about to be pushed into the snapshot directory,
    /// named after this host and the current timestamp.
    fn write_snapshot(&self, doc: &AutomationConfig) -> OmResult<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        let path = self
            .settings
            .snapshot_dir
            .join(format!("{}-{stamp}.json", self.settings.hostname));

        let pretty = serde_json::to_string_pretty(doc)?;
        std::fs::write(&path, pretty).map_err(|e| OmError::io(path.display().to_string(), e))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use om_common::api::{ApiResponse, Method};
    use om_common::builders::DeploymentType;
    use om_common::RetryPolicy;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Scripted transport recording every request it serves.
    struct Script {
        responses: Mutex<Vec<ApiResponse>>,
        requests: Mutex<Vec<(Method, String, Option<Value>)>>,
    }

    impl Script {
        fn new(bodies: &[(u16, Value)]) -> Self {
            Self {
                responses: Mutex::new(
                    bodies
                        .iter()
                        .rev()
                        .map(|(status, body)| ApiResponse {
                            status: *status,
                            body: body.to_string(),
                        })
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ApiTransport for Script {
        async fn send(
            &self,
            method: Method,
            url: &str,
            body: Option<&Value>,
        ) -> om_common::OmResult<ApiResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((method, url.to_string(), body.cloned()));
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop()
                .expect("transport called more times than scripted"))
        }
    }

    fn test_settings(agent_dir: PathBuf, snapshot_dir: PathBuf, ordinal: u32) -> Settings {
        Settings {
            fqdn: format!("mongodb-pace-pst-{ordinal}.pods.local"),
            hostname: format!("mongodb-pace-pst-{ordinal}"),
            ordinal,
            first_pod: ordinal == 0,
            base_url: "https://om.example.com:8443".to_string(),
            public_key: "pub".to_string(),
            private_key: "priv".to_string(),
            project_id: "proj1".to_string(),
            mongo_version: "4.4.5-ent".to_string(),
            port: 27017,
            ca_cert_path: PathBuf::from("/data/pki/ca.pem"),
            cert_key_path: PathBuf::from("/data/pki/server.pem"),
            replica_set_name: Some("rs0".to_string()),
            deployment_type: DeploymentType::ReplicaSet,
            sharded_cluster_name: None,
            config_server_replica_set: None,
            priority: 1,
            arbiter: false,
            backup: true,
            monitoring: true,
            horizon: None,
            sub_domain: "test".to_string(),
            snapshot_dir,
            alerts_path: PathBuf::from("/nonexistent/alerts.json"),
            agent_versions_dir: agent_dir,
        }
    }

    fn agent_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("mongodb-mms-automation-agent-13.10.0.8620"))
            .unwrap();
        dir
    }

    fn empty_config() -> Value {
        json!({
            "version": 7,
            "processes": [],
            "replicaSets": [],
            "sharding": [],
            "backupVersions": [],
            "monitoringVersions": []
        })
    }

    fn converged_status(goal: i64) -> Value {
        json!({ "goalVersion": goal, "processes": [] })
    }

    #[tokio::test]
    async fn test_onboarding_pass_replaces_and_converges() {
        let agents = agent_dir();
        let snapshots = tempfile::tempdir().unwrap();
        let settings = test_settings(agents.path().into(), snapshots.path().into(), 1);

        let script = Script::new(&[
            (200, empty_config()),
            (200, json!({})),
            (200, converged_status(8)),
        ]);
        let client = OpsManagerClient::new(script, "https://om.example.com:8443")
            .with_retry_policy(RetryPolicy::immediate(3));

        let deployer = Deployer::new(client, settings)
            .with_polling(Duration::ZERO, 3);
        let outcome = deployer.run().await.unwrap();
        assert_eq!(outcome, PlanOutcome::Converged { rounds: 1 });

        let requests = deployer.client.transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].0, Method::Get);
        assert!(requests[0].1.ends_with("/groups/proj1/automationConfig"));
        assert_eq!(requests[1].0, Method::Put);

        // The pushed document carries this pod and never the server-managed
        // sections of the fetched one.
        let pushed = requests[1].2.as_ref().unwrap();
        assert_eq!(pushed["processes"][0]["name"], "rs0_0");
        assert!(pushed.get("version").is_none());
        assert!(requests[2].1.ends_with("/groups/proj1/automationStatus"));
    }

    #[tokio::test]
    async fn test_unchanged_configuration_is_not_replaced() {
        let agents = agent_dir();
        let snapshots = tempfile::tempdir().unwrap();
        let settings = test_settings(agents.path().into(), snapshots.path().into(), 1);

        // First pass builds the document this pod would push.
        let script = Script::new(&[
            (200, empty_config()),
            (200, json!({})),
            (200, converged_status(8)),
        ]);
        let client = OpsManagerClient::new(script, "https://om.example.com:8443");
        let deployer = Deployer::new(client, settings.clone())
            .with_polling(Duration::ZERO, 1);
        deployer.run().await.unwrap();
        let converged = {
            let requests = deployer.client.transport.requests.lock().unwrap();
            requests[1].2.clone().unwrap()
        };

        // Second pass fetches that same document and must not write.
        let script = Script::new(&[(200, converged)]);
        let client = OpsManagerClient::new(script, "https://om.example.com:8443");
        let deployer = Deployer::new(client, settings).with_polling(Duration::ZERO, 1);

        let outcome = deployer.run().await.unwrap();
        assert_eq!(outcome, PlanOutcome::Converged { rounds: 0 });
        assert_eq!(deployer.client.transport.requests.lock().unwrap().len(), 1);
        assert_eq!(
            std::fs::read_dir(snapshots.path()).unwrap().count(),
            1,
            "only the replacing pass snapshots"
        );
    }

    #[tokio::test]
    async fn test_snapshot_written_before_replace() {
        let agents = agent_dir();
        let snapshots = tempfile::tempdir().unwrap();
        let settings = test_settings(agents.path().into(), snapshots.path().into(), 1);

        let script = Script::new(&[
            (200, empty_config()),
            (200, json!({})),
            (200, converged_status(8)),
        ]);
        let client = OpsManagerClient::new(script, "https://om.example.com:8443");
        let deployer = Deployer::new(client, settings).with_polling(Duration::ZERO, 1);
        deployer.run().await.unwrap();

        let entry = std::fs::read_dir(snapshots.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let name = entry.file_name().to_string_lossy().to_string();
        assert!(name.starts_with("mongodb-pace-pst-1-"));
        assert!(name.ends_with(".json"));

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(entry.path()).unwrap()).unwrap();
        assert_eq!(written["processes"][0]["name"], "rs0_0");
    }

    #[tokio::test]
    async fn test_first_pod_creates_missing_alerts() {
        let agents = agent_dir();
        let snapshots = tempfile::tempdir().unwrap();
        let alerts_dir = tempfile::tempdir().unwrap();
        let alerts_path = alerts_dir.path().join("alerts.json");
        std::fs::write(
            &alerts_path,
            json!([{ "eventTypeName": "HOST_DOWN", "notifications": [] }]).to_string(),
        )
        .unwrap();

        let mut settings = test_settings(agents.path().into(), snapshots.path().into(), 0);
        settings.alerts_path = alerts_path;

        let script = Script::new(&[
            (200, json!({ "results": [] })),
            (201, json!({})),
            (200, empty_config()),
            (200, json!({})),
            (200, converged_status(8)),
        ]);
        let client = OpsManagerClient::new(script, "https://om.example.com:8443");
        let deployer = Deployer::new(client, settings).with_polling(Duration::ZERO, 1);
        deployer.run().await.unwrap();

        let requests = deployer.client.transport.requests.lock().unwrap();
        assert!(requests[0].1.ends_with("/groups/proj1/alertConfigs"));
        assert_eq!(requests[1].0, Method::Post);
        let posted = requests[1].2.as_ref().unwrap();
        assert_eq!(posted["eventTypeName"], "HOST_DOWN");
        assert_eq!(posted["groupId"], "proj1");
    }

    #[tokio::test]
    async fn test_later_pods_skip_alert_reconciliation() {
        let agents = agent_dir();
        let snapshots = tempfile::tempdir().unwrap();
        let alerts_dir = tempfile::tempdir().unwrap();
        let alerts_path = alerts_dir.path().join("alerts.json");
        std::fs::write(&alerts_path, b"[]").unwrap();

        let mut settings = test_settings(agents.path().into(), snapshots.path().into(), 2);
        settings.alerts_path = alerts_path;

        let script = Script::new(&[
            (200, empty_config()),
            (200, json!({})),
            (200, converged_status(8)),
        ]);
        let client = OpsManagerClient::new(script, "https://om.example.com:8443");
        let deployer = Deployer::new(client, settings).with_polling(Duration::ZERO, 1);
        deployer.run().await.unwrap();

        let requests = deployer.client.transport.requests.lock().unwrap();
        assert!(
            requests[0].1.ends_with("/groups/proj1/automationConfig"),
            "no alertConfigs call expected"
        );
    }

    #[tokio::test]
    async fn test_missing_agent_install_is_fatal_on_empty_project() {
        let empty_agents = tempfile::tempdir().unwrap();
        let snapshots = tempfile::tempdir().unwrap();
        let settings = test_settings(empty_agents.path().into(), snapshots.path().into(), 1);

        let script = Script::new(&[(200, empty_config())]);
        let client = OpsManagerClient::new(script, "https://om.example.com:8443");
        let deployer = Deployer::new(client, settings).with_polling(Duration::ZERO, 1);

        let err = deployer.run().await.unwrap_err();
        assert!(matches!(err, OmError::MissingDependency { .. }));
    }
}
