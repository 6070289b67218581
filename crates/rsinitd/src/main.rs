use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use om_rsinitd::bootstrap::{self, resolve_with_retry, HORIZON_ATTEMPTS};
use om_rsinitd::{BootstrapConfig, BootstrapOutcome, MongoAdmin};

#[derive(Parser, Debug)]
#[command(
    name = "rsinitd",
    about = "Initiates this pod's replica set or joins it as a member"
)]
struct Args {
    /// FQDN this pod is reachable at; defaults to the OS hostname.
    fqdn: Option<String>,

    /// CA certificate enabling TLS towards the members; TLS stays off when
    /// the file does not exist.
    #[arg(long, default_value = "/data/ca/ca.pem")]
    ca_file: PathBuf,

    /// Delay in seconds between horizon-attach attempts.
    #[arg(long, default_value_t = 10)]
    retry_delay: u64,
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

fn require_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("environment variable {name} must be set"))
}

/// FQDN of pod 0 of the same StatefulSet: the host label with the trailing
/// ordinal replaced.
fn seed_fqdn(fqdn: &str) -> anyhow::Result<String> {
    let (label, domain) = match fqdn.split_once('.') {
        Some((label, domain)) => (label, Some(domain)),
        None => (fqdn, None),
    };
    let (stem, ordinal) = label
        .rsplit_once('-')
        .with_context(|| format!("host label '{label}' does not end in a pod ordinal"))?;
    ordinal
        .parse::<u32>()
        .with_context(|| format!("host label '{label}' does not end in a pod ordinal"))?;
    Ok(match domain {
        Some(domain) => format!("{stem}-0.{domain}"),
        None => format!("{stem}-0"),
    })
}

fn pod_ordinal(fqdn: &str) -> anyhow::Result<u32> {
    let label = fqdn.split('.').next().unwrap_or(fqdn);
    label
        .rsplit('-')
        .next()
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("host label '{label}' does not end in a pod ordinal"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let fqdn = match args.fqdn {
        Some(fqdn) => fqdn,
        None => hostname::get()
            .context("could not read the OS hostname")?
            .to_string_lossy()
            .into_owned(),
    };
    let ordinal = pod_ordinal(&fqdn)?;

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "27017".to_string())
        .parse()
        .context("PORT must be a port number")?;

    let horizon = match (
        std::env::var("HORIZONADDR").ok(),
        std::env::var("HORIZONPORT").ok(),
    ) {
        (Some(addr), Some(base)) => {
            let base: u32 = base.parse().context("HORIZONPORT must be a port number")?;
            Some(format!("{addr}:{}", base + ordinal))
        }
        _ => None,
    };

    let cfg = BootstrapConfig {
        set_name: require_env("REPLICASET")?,
        port,
        seed_fqdn: seed_fqdn(&fqdn)?,
        fqdn,
        root_username: require_env("ADMINUSER")?,
        root_password: require_env("ADMINPASSWD")?,
        horizon,
        arbiter: std::env::var("ARBITER").map(|v| v == "true").unwrap_or(false),
        priority: 1,
        retry_delay: std::time::Duration::from_secs(args.retry_delay),
        horizon_attempts: HORIZON_ATTEMPTS,
    };
    info!(
        member = %cfg.fqdn,
        seed = %cfg.seed_fqdn,
        set = %cfg.set_name,
        "starting replica-set bootstrap"
    );

    resolve_with_retry(&cfg.fqdn, cfg.port).await?;
    resolve_with_retry(&cfg.seed_fqdn, cfg.port).await?;

    let ca_file = args.ca_file.exists().then_some(args.ca_file);
    let runner = MongoAdmin::new(ca_file);

    match bootstrap::run(&runner, &cfg).await? {
        BootstrapOutcome::AlreadyMember => info!("membership already in place"),
        BootstrapOutcome::MemberAdded => info!("joined the replica set"),
        BootstrapOutcome::Initiated { horizon_attached } => {
            info!(horizon_attached, "replica set initiated");
        }
    }
    Ok(())
}
