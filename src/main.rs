//! Cleanup Operator - deletes ConfigMaps and Secrets nothing references

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use cleanup_operator::cluster::KubeCluster;
use cleanup_operator::config::{resolve, ProcessEnv};
use cleanup_operator::controller::{error_policy, reconcile, Context};
use cleanup_operator::crd::Cleanup;
use cleanup_operator::health::{self, HealthMonitor};
use cleanup_operator::telemetry::{init_telemetry, TelemetryConfig};
use cleanup_operator::{
    DEFAULT_CONFIG_PATH, DEFAULT_HEALTH_ADDR, DEFAULT_HEALTH_MULTIPLIER, FIELD_MANAGER,
};

/// Cleanup Operator - garbage-collects unreferenced ConfigMaps and Secrets
#[derive(Parser, Debug)]
#[command(name = "cleanup-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Path to the mounted config file (missing file is ignored)
    #[arg(long, env = "CLEANUP_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address for /healthz and /readyz
    #[arg(long, env = "HEALTH_ADDR", default_value = DEFAULT_HEALTH_ADDR)]
    health_addr: SocketAddr,

    /// Log as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Cleanup::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig { json: cli.log_json })?;

    run_controller(cli).await
}

/// Ensure the Cleanup CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply.
/// This ensures the CRD version always matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing Cleanup CRD...");
    crds.patch(
        "cleanups.resources.example.com",
        &params,
        &Patch::Apply(&Cleanup::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Cleanup CRD: {}", e))?;

    Ok(())
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    let config = resolve(Some(cli.config.as_path()), &ProcessEnv)?;

    let health = Arc::new(HealthMonitor::new(
        config.interval,
        DEFAULT_HEALTH_MULTIPLIER,
    ));
    tokio::spawn(health::serve(cli.health_addr, health.clone()));

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let cleanups: Api<Cleanup> = Api::all(client.clone());
    let ctx = Arc::new(Context::new(
        Arc::new(KubeCluster::new(client)),
        config,
        health.clone(),
    ));

    tracing::info!("Starting Cleanup controller");
    health.set_ready();

    Controller::new(cleanups, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Cleanup reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Cleanup reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Cleanup controller stopped");
    Ok(())
}
