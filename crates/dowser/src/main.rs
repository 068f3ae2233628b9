//! dowser - metrics cluster operator
//!
//! Watches `MetricsCluster` objects in one namespace and converges the
//! Prometheus and Thanos workloads serving their CI job metrics.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use dowser::{
    DriftPolicy, HttpFetcher, KubeClusterClient, MetadataResolver, OperatorConfig, Reconciler,
    controller,
};
use dowser_api::MetricsCluster;
use kube::CustomResourceExt;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "dowser")]
#[command(about = "Converges metrics clusters into Prometheus/Thanos workloads")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "DOWSER_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the operator
    Start(StartArgs),

    /// Print the MetricsCluster CustomResourceDefinition as JSON
    Crd,
}

#[derive(Args)]
struct StartArgs {
    /// Path to a TOML config file
    #[arg(short, long, env = "DOWSER_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace to watch and write to
    #[arg(long, env = "DOWSER_NAMESPACE")]
    namespace: Option<String>,

    /// Image of the archive download step
    #[arg(long, env = "DOWSER_FETCHER_IMAGE")]
    fetcher_image: Option<String>,

    /// Prometheus image
    #[arg(long, env = "DOWSER_PROMETHEUS_IMAGE")]
    prometheus_image: Option<String>,

    /// Thanos image
    #[arg(long, env = "DOWSER_THANOS_IMAGE")]
    thanos_image: Option<String>,

    /// Base URL of raw job storage
    #[arg(long, env = "DOWSER_STORAGE_BASE_URL")]
    storage_base_url: Option<String>,

    /// Base URL job URLs are declared under
    #[arg(long, env = "DOWSER_SOURCE_BASE_URL")]
    source_base_url: Option<String>,

    /// Prefix of the browsable artifact index
    #[arg(long, env = "DOWSER_ARTIFACT_INDEX_PREFIX")]
    artifact_index_prefix: Option<String>,

    /// Memory request of the Prometheus container
    #[arg(long, env = "DOWSER_PROMETHEUS_MEMORY")]
    prometheus_memory: Option<String>,

    /// How per-cluster objects react to drift
    #[arg(long, value_enum, env = "DOWSER_DRIFT_POLICY")]
    drift_policy: Option<DriftPolicy>,
}

impl StartArgs {
    fn load(self) -> anyhow::Result<OperatorConfig> {
        let mut config = match &self.config {
            Some(path) => OperatorConfig::from_file(path)?,
            None => OperatorConfig::default(),
        };

        if let Some(namespace) = self.namespace {
            config.namespace = namespace;
        }
        if let Some(image) = self.fetcher_image {
            config.images.fetcher = image;
        }
        if let Some(image) = self.prometheus_image {
            config.images.prometheus = image;
        }
        if let Some(image) = self.thanos_image {
            config.images.thanos = image;
        }
        if let Some(url) = self.storage_base_url {
            config.sources.storage_base_url = url;
        }
        if let Some(url) = self.source_base_url {
            config.sources.source_base_url = url;
        }
        if let Some(prefix) = self.artifact_index_prefix {
            config.sources.artifact_index_prefix = prefix;
        }
        if let Some(memory) = self.prometheus_memory {
            config.prometheus_memory = memory;
        }
        if let Some(policy) = self.drift_policy {
            config.drift_policy = policy;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("dowser=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Commands::Start(args) => start(args.load()?).await?,
        Commands::Crd => {
            println!("{}", serde_json::to_string_pretty(&MetricsCluster::crd())?);
        }
    }

    Ok(())
}

async fn start(config: OperatorConfig) -> anyhow::Result<()> {
    info!(
        namespace = %config.namespace,
        prometheus = %config.images.prometheus,
        thanos = %config.images.thanos,
        "starting dowser"
    );

    let client = kube::Client::try_default().await?;
    let fetcher = HttpFetcher::new(config.http_timeout())?;
    let resolver = MetadataResolver::from_config(fetcher, &config);
    let reconciler = Arc::new(Reconciler::new(
        KubeClusterClient::new(client.clone()),
        resolver,
        config,
    ));

    controller::run(client, reconciler).await;
    info!("dowser stopped");
    Ok(())
}
