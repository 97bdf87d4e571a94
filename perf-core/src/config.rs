//! Configuration loading for chaosperf.
//!
//! Configuration is loaded from a TOML file (default: `chaosperf.toml`).
//! Every section and key is optional; missing values take the defaults below.

use perf_types::{JobCount, Latency, Percent};
use serde::Deserialize;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for chaosperf.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Resource API connection used by workers.
    #[serde(default)]
    pub cluster: ConnectionConfig,
    /// Fault-injection condition settings.
    #[serde(default)]
    pub chaos: ChaosConfig,
    /// Worker fleet settings.
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// Test matrix and reporting settings.
    #[serde(default)]
    pub flow: FlowConfig,
}

/// Connection to a Kubernetes-style API server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    /// Base URL of the API server. Absent means `kubeconfig`, then in-cluster.
    pub api_server: Option<String>,
    /// Kubeconfig file to read the server and credentials from. An empty
    /// path is treated as absent.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to use instead of its `current-context`.
    pub context: Option<String>,
    /// File holding a bearer token.
    pub token_file: Option<PathBuf>,
    /// PEM bundle used to verify the server.
    pub ca_cert: Option<PathBuf>,
    /// Skip server certificate verification (default: false).
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    /// Namespace objects are created in (default: "default").
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Client-side request rate per second (default: 100).
    #[serde(default = "default_qps")]
    pub qps: u32,
    /// Client-side burst allowance (default: 50).
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Fault-injection condition settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ChaosConfig {
    /// JSON template of the condition object.
    #[serde(default = "default_template")]
    pub template: PathBuf,
    /// Seconds between readiness/absence polls (default: 2).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Seconds before a poll gives up (default: 60).
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Separate connection for the condition API; absent reuses `[cluster]`.
    pub connection: Option<ConnectionConfig>,
}

/// Worker fleet settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadConfig {
    /// Number of concurrent workers (default: 30).
    #[serde(default = "default_workers")]
    pub workers: u32,
    /// CRUD cycles per worker per test case, or "unbounded" (default: 100).
    #[serde(default = "default_jobs_per_worker")]
    pub jobs_per_worker: JobCount,
    /// Value of the `app` label and deployment name prefix (default: "nginx").
    #[serde(default = "default_app")]
    pub app: String,
    /// Container image of the created deployments (default: "nginx:1.14.2").
    #[serde(default = "default_image")]
    pub image: String,
    /// Replica count of the created deployments (default: 3).
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

/// Test matrix and reporting settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    /// Latencies injected by the condition (default: 0ms..300ms).
    #[serde(default = "default_latencies")]
    pub latencies: Vec<Latency>,
    /// Percents of affected requests (default: 10..70).
    #[serde(default = "default_percents")]
    pub percents: Vec<Percent>,
    /// Seconds to wait after a run before deleting the condition (default: 60).
    #[serde(default = "default_drain_secs")]
    pub drain_secs: u64,
    /// Print a summary sheet per test case (default: true).
    #[serde(default = "default_summarize")]
    pub summarize: bool,
    /// Write a CSV file after the matrix (default: false).
    #[serde(default)]
    pub export_csv: bool,
    /// Directory the CSV file is written to (default: ".").
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

// Default value functions
fn default_namespace() -> String {
    "default".to_string()
}

fn default_qps() -> u32 {
    100
}

fn default_burst() -> u32 {
    50
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_template() -> PathBuf {
    PathBuf::from("templates/iochaos.json")
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_workers() -> u32 {
    30
}

fn default_jobs_per_worker() -> JobCount {
    NonZeroU64::new(100).map_or(JobCount::Unbounded, JobCount::Limited)
}

fn default_app() -> String {
    "nginx".to_string()
}

fn default_image() -> String {
    "nginx:1.14.2".to_string()
}

fn default_replicas() -> u32 {
    3
}

fn default_latencies() -> Vec<Latency> {
    [0, 10, 20, 30, 40, 50, 60, 70, 100, 200, 300]
        .into_iter()
        .map(Latency::from_millis)
        .collect()
}

fn default_percents() -> Vec<Percent> {
    [10u8, 20, 30, 40, 50, 60, 70]
        .into_iter()
        .filter_map(|p| Percent::new(p).ok())
        .collect()
}

fn default_drain_secs() -> u64 {
    60
}

fn default_summarize() -> bool {
    true
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            api_server: None,
            kubeconfig: None,
            context: None,
            token_file: None,
            ca_cert: None,
            insecure_skip_tls_verify: false,
            namespace: default_namespace(),
            qps: default_qps(),
            burst: default_burst(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            connection: None,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            jobs_per_worker: default_jobs_per_worker(),
            app: default_app(),
            image: default_image(),
            replicas: default_replicas(),
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            latencies: default_latencies(),
            percents: default_percents(),
            drain_secs: default_drain_secs(),
            summarize: default_summarize(),
            export_csv: false,
            export_dir: default_export_dir(),
        }
    }
}

impl ConnectionConfig {
    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ChaosConfig {
    /// Interval between polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Upper bound of one poll.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    /// Connection for the condition API, falling back to the cluster one.
    pub fn connection_or<'a>(&'a self, cluster: &'a ConnectionConfig) -> &'a ConnectionConfig {
        self.connection.as_ref().unwrap_or(cluster)
    }
}

impl FlowConfig {
    /// Delay between a run and the condition delete.
    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check cross-field constraints and normalize the test matrix.
    ///
    /// Latencies and percents are sorted ascending with duplicates removed.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.flow.latencies.sort();
        self.flow.latencies.dedup();
        self.flow.percents.sort();
        self.flow.percents.dedup();

        if self.flow.latencies.is_empty() {
            return Err(ConfigError::Invalid("flow.latencies must not be empty".into()));
        }
        if self.flow.percents.is_empty() {
            return Err(ConfigError::Invalid("flow.percents must not be empty".into()));
        }
        if self.workload.workers == 0 {
            return Err(ConfigError::Invalid("workload.workers must be > 0".into()));
        }
        if self.workload.app.is_empty() {
            return Err(ConfigError::Invalid("workload.app must not be empty".into()));
        }
        if self.chaos.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "chaos.poll_interval_secs must be > 0".into(),
            ));
        }

        validate_connection("cluster", &self.cluster)?;
        if let Some(connection) = &self.chaos.connection {
            validate_connection("chaos.connection", connection)?;
        }

        if self.flow.export_csv && !self.flow.export_dir.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "flow.export_dir {} is not a directory",
                self.flow.export_dir.display()
            )));
        }

        Ok(())
    }
}

fn validate_connection(section: &str, connection: &ConnectionConfig) -> Result<(), ConfigError> {
    if connection.qps == 0 || connection.burst == 0 {
        return Err(ConfigError::Invalid(format!(
            "{section}.qps and {section}.burst must be > 0"
        )));
    }
    if connection.namespace.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{section}.namespace must not be empty"
        )));
    }
    if connection.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid(format!(
            "{section}.request_timeout_secs must be > 0"
        )));
    }
    Ok(())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Values parse but do not make a runnable configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
