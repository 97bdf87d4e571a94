//! # chaosperf
//!
//! Measures how a Kubernetes-style API server behaves while a fault-injection
//! condition slows down a share of its I/O.
//!
//! For every (percent, latency) pair a condition is injected, N workers run
//! CRUD cycles against deployments, and success rates plus latency
//! quantiles are reported.
//!
//! ## Example
//!
//! ```bash
//! # Defaults from chaosperf.toml, if present
//! chaosperf
//!
//! # Small matrix, CSV report in ./reports
//! chaosperf -w 10 -j 20 -l 0ms,50ms -p 10,50 --export-csv -f reports
//!
//! # Run until interrupted
//! chaosperf -j unbounded -l 100ms -p 30
//! ```
//!
//! Ctrl-C once finishes the current test case and cleans up; twice aborts
//! with exit code 130.

use anyhow::{Context, Result};
use clap::Parser;
use perf_core::api::{ConditionApi, KubeClient, ResourceApi};
use perf_core::config::Config;
use perf_core::report::{CsvExporter, SummaryPrinter};
use perf_core::shutdown::{Escalation, FORCED_EXIT_CODE};
use perf_core::{
    Aggregator, ConditionAgent, ConditionTemplate, FlowSettings, MetricsSink, Shutdown, TestFlow,
    Worker, WorkerPool, WorkloadTemplate,
};
use perf_types::{JobCount, Latency, Percent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Config file read when `--config` is not given, if it exists.
const DEFAULT_CONFIG_PATH: &str = "chaosperf.toml";

/// Load-and-chaos test runner for Kubernetes-style API servers.
#[derive(Parser, Debug)]
#[command(name = "chaosperf")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (default: chaosperf.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(long, short)]
    workers: Option<u32>,

    /// CRUD cycles per worker per test case, or "unbounded"
    #[arg(long, short)]
    jobs: Option<JobCount>,

    /// Injected latencies, comma-separated (e.g. 0ms,20ms)
    #[arg(long, short, value_delimiter = ',')]
    latencies: Option<Vec<Latency>>,

    /// Affected request percents, comma-separated (e.g. 10,50)
    #[arg(long, short, value_delimiter = ',')]
    percents: Option<Vec<Percent>>,

    /// Seconds to wait after each run before deleting the condition
    #[arg(long, short)]
    sleep: Option<u64>,

    /// Print a summary sheet per test case
    #[arg(long)]
    summarize: Option<bool>,

    /// Write a CSV report after the matrix
    #[arg(long)]
    export_csv: bool,

    /// Directory the CSV report is written to
    #[arg(long, short = 'f')]
    export_dir: Option<PathBuf>,

    /// Resource API server URL
    #[arg(long)]
    api_server: Option<String>,

    /// Kubeconfig for the resource API; empty means in-cluster settings
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Condition API server URL (default: same as --api-server)
    #[arg(long)]
    chaos_api_server: Option<String>,

    /// Kubeconfig for the condition API (default: same as --kubeconfig)
    #[arg(long)]
    chaos_kubeconfig: Option<PathBuf>,

    /// Condition template (JSON)
    #[arg(long)]
    template: Option<PathBuf>,
}

impl Cli {
    /// Read the config file and apply flag overrides on top.
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Config::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Config::default(),
        };

        if let Some(workers) = self.workers {
            config.workload.workers = workers;
        }
        if let Some(jobs) = self.jobs {
            config.workload.jobs_per_worker = jobs;
        }
        if let Some(latencies) = &self.latencies {
            config.flow.latencies = latencies.clone();
        }
        if let Some(percents) = &self.percents {
            config.flow.percents = percents.clone();
        }
        if let Some(sleep) = self.sleep {
            config.flow.drain_secs = sleep;
        }
        if let Some(summarize) = self.summarize {
            config.flow.summarize = summarize;
        }
        if self.export_csv {
            config.flow.export_csv = true;
        }
        if let Some(dir) = &self.export_dir {
            config.flow.export_dir = dir.clone();
        }
        // A kubeconfig flag replaces a configured server; a server flag wins
        // over both.
        if let Some(path) = &self.kubeconfig {
            config.cluster.kubeconfig = Some(path.clone());
            config.cluster.api_server = None;
        }
        if let Some(server) = &self.api_server {
            config.cluster.api_server = Some(server.clone());
        }
        if let Some(path) = &self.chaos_kubeconfig {
            let cluster = config.cluster.clone();
            let connection = config.chaos.connection.get_or_insert(cluster);
            connection.kubeconfig = Some(path.clone());
            connection.api_server = None;
        }
        if let Some(server) = &self.chaos_api_server {
            let cluster = config.cluster.clone();
            config
                .chaos
                .connection
                .get_or_insert(cluster)
                .api_server = Some(server.clone());
        }
        if let Some(template) = &self.template {
            config.chaos.template = template.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chaosperf=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.load_config().context("Invalid configuration")?;

    let mut flow = build_flow(&config)?;

    let shutdown = Shutdown::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let result = flow.run(&shutdown).await;
    shutdown.finish();

    let report = result.context("Test flow aborted")?;
    if report.interrupted {
        info!(cases = report.cases.len(), "stopped early on request");
    }
    Ok(())
}

/// Wire clients, workers, the condition agent and reporters together.
fn build_flow(config: &Config) -> Result<TestFlow> {
    let settings = FlowSettings::from_config(config);
    let chaos_connection = config.chaos.connection_or(&config.cluster);

    let condition_template =
        ConditionTemplate::from_file(&config.chaos.template, &chaos_connection.namespace)
            .context("Failed to load condition template")?;
    let condition_client: Arc<dyn ConditionApi> = Arc::new(
        KubeClient::new(chaos_connection).context("Failed to build condition API client")?,
    );
    let agent = ConditionAgent::new(
        condition_client,
        condition_template,
        config.chaos.poll_interval(),
        config.chaos.poll_timeout(),
    );

    // One client per worker, each with its own rate limiter.
    let clients = (0..settings.workers)
        .map(|_| KubeClient::new(&config.cluster))
        .map(|client| client.map(|client| Arc::new(client) as Arc<dyn ResourceApi>))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to build resource API client")?;

    let sink = Arc::new(Aggregator::new());
    let workload = Arc::new(WorkloadTemplate::from_config(
        &config.workload,
        &config.cluster.namespace,
    ));
    let worker_sink: Arc<dyn MetricsSink> = sink.clone();
    let pool = WorkerPool::new(settings.workers, move |id| {
        let client = clients[id.0 as usize % clients.len()].clone();
        Worker::new(id, client, worker_sink.clone(), workload.clone())
    });

    let mut flow = TestFlow::new(settings, agent, pool, sink);
    if config.flow.summarize {
        flow = flow.with_reporter(SummaryPrinter::stdout());
    }
    if config.flow.export_csv {
        flow = flow.with_reporter(CsvExporter::new(&config.flow.export_dir));
    }
    Ok(flow)
}

/// Escalate on every SIGINT/SIGTERM until the process token is cancelled.
async fn watch_signals(shutdown: Shutdown) {
    #[cfg(unix)]
    let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            error!("Failed to listen for SIGTERM: {}", e);
            None
        }
    };

    loop {
        #[cfg(unix)]
        let term = async {
            match terminate.as_mut() {
                Some(stream) => {
                    stream.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let term = std::future::pending::<()>();

        tokio::select! {
            _ = shutdown.process_token().cancelled() => return,
            result = signal::ctrl_c() => match result {
                Ok(()) => info!("Received SIGINT"),
                Err(e) => {
                    error!("Failed to listen for SIGINT: {}", e);
                    return;
                }
            },
            _ = term => info!("Received SIGTERM"),
        }

        if shutdown.escalate() == Escalation::Forced {
            error!("Forced stop, exiting without cleanup");
            std::process::exit(FORCED_EXIT_CODE);
        }
    }
}
