//! ---
//! hamq_section: "01-core-functionality"
//! hamq_subsection: "binary"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Binary entrypoint for the HAMQ daemon."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use hamq_common::config::{AppConfig, DeliveryMode};
use hamq_common::logging::init_tracing;
use hamq_consumer::{ConsumerGroup, LoggingJobHandler, PipelineError};
use hamq_metrics::{
    new_registry, spawn_http_server, ConsumerMetrics, DispatchMetrics, SharedRegistry,
};
use hamq_msg::{CorrelationId, InMemoryBroker, JobInformation, MemoryConnector, Order, WireCodec};
use hamq_redundancy::{DispatchError, Dispatcher, DualEndpoints, EXIT_ALL_ENDPOINTS_UNAVAILABLE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = env!("CARGO_PKG_VERSION"),
    about = "HAMQ dual-endpoint dispatch daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[arg(long, value_enum, help = "Override delivery mode")]
    mode: Option<CliMode>,

    #[arg(long, value_name = "COUNT", help = "Override the number of jobs dispatched")]
    jobs: Option<usize>,

    #[arg(long, value_enum, default_value_t = PayloadKind::Job, help = "Demo payload shape")]
    payload: PayloadKind,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    ActiveActive,
    ActivePassive,
}

impl From<CliMode> for DeliveryMode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::ActiveActive => DeliveryMode::ActiveActive,
            CliMode::ActivePassive => DeliveryMode::ActivePassive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PayloadKind {
    Job,
    Order,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Start consumers, dispatch one batch and wait for ctrl-c")]
    Run,
    #[command(about = "Load and validate the configuration, then exit")]
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", version_string());
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/hamq.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(mode) = cli.mode {
        config.delivery_mode = mode.into();
    }
    if let Some(jobs) = cli.jobs {
        config.producer.batch_size = jobs;
    }
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", loaded.source.display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::ValidateConfig => {
            println!(
                "Configuration OK: {}\nMode: {}\nPrimary: {}\nSecondary: {}",
                loaded.source.display(),
                config.delivery_mode,
                config.endpoints.primary.describe(),
                config.endpoints.secondary.describe()
            );
        }
        Commands::Run => {
            init_tracing("hamqd", &config.logging)?;
            info!(
                config = %loaded.source.display(),
                mode = %config.delivery_mode,
                version = %version_string(),
                "configuration loaded"
            );
            if let Err(err) = run_daemon(config, cli.payload).await {
                if let Some(code) = fatal_exit_code(&err) {
                    error!(error = %err, exit_code = code, "all endpoints unavailable; terminating");
                    std::process::exit(code);
                }
                return Err(err);
            }
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, payload: PayloadKind) -> Result<()> {
    let registry = new_registry();
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let connector = MemoryConnector::new(InMemoryBroker::new());
    let result = match payload {
        PayloadKind::Job => {
            run_with_payload(&config, &connector, &registry, JobInformation::new).await
        }
        PayloadKind::Order => run_with_payload(&config, &connector, &registry, demo_order).await,
    };

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    result
}

async fn run_with_payload<T>(
    config: &AppConfig,
    connector: &MemoryConnector,
    registry: &SharedRegistry,
    make_job: fn(CorrelationId) -> T,
) -> Result<()>
where
    T: Serialize + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let codec = WireCodec::from_config(&config.codec);
    let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();
    let consumers = ConsumerGroup::<T>::new(
        Arc::new(LoggingJobHandler),
        codec.clone(),
        config.consumer.clone(),
    )
    .with_metrics(ConsumerMetrics::new(registry.clone())?)
    .with_failure_channel(failures_tx)
    .start(connector, &config.endpoints)
    .await?;

    let endpoints = match DualEndpoints::connect(connector, &config.endpoints).await {
        Ok(endpoints) => Arc::new(endpoints),
        Err(err) => {
            consumers.shutdown().await?;
            return Err(err.into());
        }
    };
    let dispatcher = Dispatcher::new(endpoints.clone(), config.delivery_mode, codec)
        .with_metrics(DispatchMetrics::new(registry.clone())?);

    let jobs: Vec<(CorrelationId, T)> = (0..config.producer.batch_size)
        .map(|_| {
            let id = CorrelationId::new();
            (id, make_job(id))
        })
        .collect();
    match dispatcher.send_batch(&jobs).await {
        Ok(report) => info!(
            mode = %dispatcher.mode(),
            delivered = report.delivered(),
            duplicated = report.duplicated(),
            rejected = report.rejected.len(),
            "messages sent"
        ),
        Err(err) => {
            endpoints.close().await;
            consumers.shutdown().await?;
            return Err(err.into());
        }
    }

    info!("daemon running; waiting for termination signal");
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            received = &mut ctrl_c => {
                received?;
                break;
            }
            Some(failure) = failures_rx.recv() => {
                warn!(
                    correlation_id = %failure.correlation_id,
                    endpoint = failure.endpoint.label(),
                    error = %failure.error,
                    "job handler failed; id stays marked processed"
                );
            }
        }
    }

    info!("ctrl-c received; shutting down");
    let report = consumers.shutdown().await?;
    endpoints.close().await;
    let total = report.total();
    info!(
        handled = total.handled,
        skipped = total.skipped,
        rejected = total.rejected,
        handler_failed = total.handler_failed,
        "daemon shutdown complete"
    );
    Ok(())
}

fn demo_order(id: CorrelationId) -> Order {
    Order::new(id, format!("Order Id: {}", id)).with_detail("SKU-1001", "Demo widget", 2, 9.99)
}

fn fatal_exit_code(err: &anyhow::Error) -> Option<i32> {
    if let Some(dispatch) = err.downcast_ref::<DispatchError>() {
        return dispatch.is_fatal().then(|| dispatch.exit_code());
    }
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::AllEndpointsUnavailable) => Some(EXIT_ALL_ENDPOINTS_UNAVAILABLE),
        _ => None,
    }
}

fn version_string() -> String {
    format!(
        "hamqd {} (git {}, {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown")
    )
}
