//! keygate - API credential access operator for Kubernetes

mod controller_runner;
mod startup;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use kube::Client;

use keygate_common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use keygate_controller::Context;

/// keygate - provisions API credentials to workloads from CredentialGrants
#[derive(Parser, Debug)]
#[command(name = "keygate", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers and admission webhooks (default mode)
    Run,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Address the admission webhook server binds
    #[arg(long, global = true, env = "KEYGATE_WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    webhook_addr: SocketAddr,

    /// Webhook serving certificate (PEM)
    #[arg(
        long,
        global = true,
        env = "KEYGATE_TLS_CERT",
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.crt"
    )]
    tls_cert: PathBuf,

    /// Webhook serving key (PEM)
    #[arg(
        long,
        global = true,
        env = "KEYGATE_TLS_KEY",
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.key"
    )]
    tls_key: PathBuf,

    /// Do not start the admission webhook server
    #[arg(long, global = true)]
    no_webhook: bool,

    /// Skip CRD installation on startup
    #[arg(long, global = true)]
    no_install_crds: bool,

    /// Service name reported in traces and metrics
    #[arg(long, global = true, env = "OTEL_SERVICE_NAME", default_value = "keygate")]
    service_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", startup::crd_manifests()?);
        return Ok(());
    }

    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install rustls crypto provider: {:?}", e);
    }

    init_telemetry(TelemetryConfig::new(cli.run.service_name.clone()))?;

    let result = match cli.command {
        Some(Commands::Run) | None => run(cli.run).await,
    };

    shutdown_telemetry();
    result
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    tracing::info!("keygate operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {}", e))?;

    if args.no_install_crds {
        tracing::info!("Skipping CRD installation");
    } else {
        startup::ensure_crds_installed(&client).await?;
    }

    if args.no_webhook {
        tracing::info!("Admission webhook server disabled");
    } else {
        let config = startup::load_server_config(args.webhook_addr, &args.tls_cert, &args.tls_key)?;
        startup::spawn_webhook_server(config, client.clone());
    }

    let ctx = Arc::new(Context::builder(client.clone()).build());

    tracing::info!("Starting keygate controllers...");
    let mut controllers = controller_runner::build_grant_controllers(client.clone(), ctx.clone());
    controllers.extend(controller_runner::build_provider_controllers(client, ctx));

    futures::future::join_all(controllers).await;

    tracing::info!("keygate operator shutting down");
    Ok(())
}
