use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use om_common::{DigestTransport, OpsManagerClient, PlanOutcome};
use om_deployerd::{Deployer, LoadOptions, Settings};

#[derive(Parser, Debug)]
#[command(
    name = "deployerd",
    about = "Reconciles this pod into the shared Ops Manager automation configuration"
)]
struct Args {
    /// FQDN this pod is reachable at; defaults to the OS hostname.
    fqdn: Option<String>,

    /// Mounted mongod configuration file.
    #[arg(long, default_value = "/init/mongod.conf")]
    config: PathBuf,

    /// Optional per-host deployment policy overrides.
    #[arg(long, default_value = "/init/deploy.json")]
    policy: PathBuf,

    /// Optional alert configurations, reconciled by pod 0.
    #[arg(long, default_value = "/init/alerts.json")]
    alerts: PathBuf,

    /// Directory receiving pre-replace configuration snapshots.
    #[arg(long, default_value = "/data/db")]
    snapshot_dir: PathBuf,

    /// Automation-agent versions directory used for version detection.
    #[arg(long, default_value = "/opt/mongodb-mms-automation/versions")]
    agent_versions_dir: PathBuf,
}

fn init_tracing() {
    let level = std::env::var("LOGLEVEL")
        .map(|l| l.to_uppercase())
        .unwrap_or_default();
    let filter = if level == "DEBUG" { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let settings = Settings::load(&LoadOptions {
        fqdn: args.fqdn,
        config_path: args.config,
        policy_path: args.policy,
        alerts_path: args.alerts,
        snapshot_dir: args.snapshot_dir,
        agent_versions_dir: args.agent_versions_dir,
    })?;
    info!(
        host = %settings.fqdn,
        deployment_type = settings.deployment_type.as_str(),
        project = %settings.project_id,
        "starting deployment pass"
    );

    let transport = DigestTransport::new(
        settings.public_key.as_str(),
        settings.private_key.as_str(),
        &settings.ca_cert_path,
        None,
    )?;
    let client = OpsManagerClient::new(transport, settings.base_url.clone());

    match Deployer::new(client, settings).run().await? {
        PlanOutcome::Converged { rounds } => {
            info!(rounds, "deployment pass complete");
        }
        PlanOutcome::TimedOut { goal_version, .. } => {
            info!(
                goal_version,
                "deployment pass complete; rollout still in progress"
            );
        }
    }
    Ok(())
}
