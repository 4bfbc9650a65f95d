mod config;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kubesnap_discovery::{Collector, JsonFileSink, QueryOptions, SnapshotLayout, SnapshotSink};
use kubesnap_k8s::{ClusterApi, KubeClient};

use config::{Args, Config};

/// File the effective configuration is written to under `meta/`
const CONFIG_FILE: &str = "config.json";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_args(&args)?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run_app(config).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run_app(config: Config) -> Result<()> {
    let plan = config.run_plan()?;

    let kube_client = KubeClient::new();
    if let Some(context) = config.context.as_deref().or(kube_client.current_context()) {
        info!(context = %context, "Using Kubernetes context");
    }
    let client = kube_client.client(config.context.as_deref()).await?;
    let namespaces = kube_client.get_namespaces(&client).await?;
    let cluster = ClusterApi::new(client);

    let root = config
        .output_dir
        .join(format!("kubesnap_{}", Utc::now().format("%Y%m%d%H%M%S")));
    let layout = SnapshotLayout::new(root);
    let sink = JsonFileSink;
    sink.serialize(&config, &layout.meta_dir(), CONFIG_FILE)
        .context("Failed to write effective config")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding queries");
            interrupt.cancel();
        }
    });

    let options = QueryOptions::default()
        .with_parallelism(config.parallelism)
        .with_timeout(config.query_timeout())
        .with_cancel(cancel);

    let collector = Collector::new(&cluster, &sink, &layout, options);
    let summary = collector
        .run(&plan, &namespaces)
        .await
        .context("Failed to write query times")?;

    for failure in &summary.failures {
        warn!(
            query = %failure.name,
            namespace = %failure.namespace,
            status = failure.outcome.status(),
            error = failure.outcome.error().unwrap_or(""),
            "Query did not succeed"
        );
    }
    for (scope, reason) in &summary.failed_passes {
        warn!(scope = %scope, reason = %reason, "Pass was skipped");
    }

    println!("{}", layout.root().display());
    Ok(())
}
