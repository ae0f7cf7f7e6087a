mod error;
mod telemetry;

use error::Result;
use node_drain::client::{K8SClusterClient, RateLimitedClusterClient};
use node_drain::{DrainConfig, DrainError, NodeDrainer};

use argh::FromArgs;
use snafu::ResultExt;
use std::env;
use std::fs;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

const TERMINATION_LOG: &str = "/dev/termination-log";
const NODE_NAME_ENV_VAR: &str = "MY_NODE_NAME";

#[derive(FromArgs, Debug)]
/// Cordons a Kubernetes node and evicts its workloads ahead of maintenance.
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Command {
    Drain(DrainArgs),
    Uncordon(UncordonArgs),
}

#[derive(FromArgs, Debug)]
/// Cordon the node, then evict every Pod that is not static, mirror, or DaemonSet-managed.
#[argh(subcommand, name = "drain")]
struct DrainArgs {
    /// node to drain. Defaults to $MY_NODE_NAME.
    #[argh(option)]
    node: Option<String>,
}

#[derive(FromArgs, Debug)]
/// Mark the node schedulable again.
#[argh(subcommand, name = "uncordon")]
struct UncordonArgs {
    /// node to uncordon. Defaults to $MY_NODE_NAME.
    #[argh(option)]
    node: Option<String>,
}

#[tokio::main]
async fn main() {
    let args: Args = argh::from_env();
    let termination_log =
        env::var("TERMINATION_LOG").unwrap_or_else(|_| TERMINATION_LOG.to_string());

    if let Err(error) = run_agent(args).await {
        event!(Level::ERROR, %error, "Drain agent failed.");
        if let Err(write_error) = fs::write(&termination_log, format!("{}", error)) {
            eprintln!(
                "Could not write k8s termination log '{}': {}",
                termination_log, write_error
            );
        }
        process::exit(1);
    }
}

async fn run_agent(args: Args) -> Result<()> {
    telemetry::init_telemetry_from_env().context(error::TelemetryInitSnafu)?;

    let config = DrainConfig::from_environment().context(error::DrainConfigSnafu)?;

    let k8s_client = kube::client::Client::try_default()
        .await
        .context(error::ClientCreateSnafu)?;
    let cluster_client = RateLimitedClusterClient::new(
        K8SClusterClient::new(k8s_client),
        config.api_requests_per_second,
    );
    let drainer = NodeDrainer::new(cluster_client, config).context(error::DrainConfigSnafu)?;
    event!(
        Level::DEBUG,
        deadline_secs = drainer.config().deadline.as_secs(),
        max_concurrent_evictions = drainer.config().max_concurrent_evictions.get(),
        "Loaded drain configuration."
    );

    match args.command {
        Command::Drain(DrainArgs { node }) => {
            let node_name = resolve_node_name(node)?;

            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    event!(Level::WARN, "Interrupted; abandoning the drain.");
                    interrupt.cancel();
                }
            });

            let result = drainer
                .drain_node_with_cancellation(&node_name, cancel)
                .await;
            if let Err(DrainError::Eviction { source, .. }) = &result {
                event!(Level::ERROR, pod = %source.pod(), "Pod could not be evicted.");
            }
            let summary = result.context(error::DrainSnafu {
                node_name: node_name.clone(),
            })?;

            event!(
                Level::INFO,
                node = %summary.node_name,
                evicted = summary.outcomes.len(),
                skipped = summary.skipped.len(),
                "Node drained."
            );
        }
        Command::Uncordon(UncordonArgs { node }) => {
            let node_name = resolve_node_name(node)?;
            drainer
                .uncordon_node(&node_name)
                .await
                .context(error::UncordonSnafu {
                    node_name: node_name.clone(),
                })?;
        }
    }

    Ok(())
}

fn resolve_node_name(node: Option<String>) -> Result<String> {
    match node {
        Some(node_name) => Ok(node_name),
        None => env::var(NODE_NAME_ENV_VAR).context(error::GetNodeNameSnafu),
    }
}
