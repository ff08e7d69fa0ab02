pub mod validation;

use crate::{Error, Result, aggregator::MinPolicy, source::MAX_PAGE_SIZE};
use backon::ExponentialBuilder;
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr, path::Path, time::Duration};
use validation::validate_config;

const ENV_PREFIX: &str = "AGENT";

/// Main settings for the payments metrics agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level for application logging (e.g., "info", "debug", "warn", "error")
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Use generated records instead of querying the data source
    #[serde(default)]
    pub test_mode: bool,
    /// How running minimums treat their zero starting value
    #[serde(default)]
    pub min_policy: MinPolicy,
    #[serde(default)]
    pub data_source: DataSourceSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Exporter for the agent's own counters (optional)
    #[serde(default)]
    pub prometheus: Option<PrometheusSettings>,
}

/// Payments API connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceSettings {
    pub base_url: String,
    pub api_key: String,
    /// Records requested per page (1..=100)
    pub page_size: usize,
    pub timeout_secs: u64,
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.stripe.com".to_string(),
            api_key: String::new(),
            page_size: MAX_PAGE_SIZE,
            timeout_secs: 30,
        }
    }
}

impl DataSourceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Metrics backend connection and component identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub base_url: String,
    pub license_key: String,
    /// Plugin GUID the component is reported under
    pub guid: String,
    /// Agent version reported alongside the metrics
    pub version: String,
    pub component_name: String,
    /// Host name reported to the backend
    pub host: String,
    pub timeout_secs: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            base_url: "https://platform-api.newrelic.com".to_string(),
            license_key: String::new(),
            guid: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            component_name: "Stripe".to_string(),
            host: "localhost".to_string(),
            timeout_secs: 30,
        }
    }
}

impl MetricsSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where the watermark lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreSettings {
    HttpCache(HttpCacheSettings),
    File { path: String },
    Memory,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings::File {
            path: "payments-metrics-agent.watermark.json".to_string(),
        }
    }
}

/// Hosted key-value cache (IronCache REST API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpCacheSettings {
    pub base_url: String,
    pub project_id: String,
    pub token: String,
    pub cache_name: String,
    pub timeout_secs: u64,
}

impl Default for HttpCacheSettings {
    fn default() -> Self {
        Self {
            base_url: "https://cache-aws-us-east-1.iron.io".to_string(),
            project_id: String::new(),
            token: String::new(),
            cache_name: "newrelic-stripe-agent".to_string(),
            timeout_secs: 30,
        }
    }
}

impl HttpCacheSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry of transient HTTP failures inside the clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub factor: f32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Retries after the first attempt; 0 disables retrying
    pub max_times: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            factor: 2.0,
            min_delay_ms: 500,
            max_delay_ms: 10_000,
            max_times: 3,
        }
    }
}

impl RetrySettings {
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_jitter()
            .with_factor(self.factor)
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_times)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusSettings {
    pub addr: SocketAddr,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load from a TOML file; environment variables still take priority.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let builder = Config::builder()
            .add_source(File::with_name(&path.as_ref().to_string_lossy()))
            .add_source(environment());
        Self::build(builder)
    }

    /// Load from environment variables (and a `.env` file if present).
    pub fn from_env() -> Result<Self> {
        // NOTE: a missing .env file is fine
        let _ = dotenvy::dotenv();

        Self::build(Config::builder().add_source(environment()))
    }

    /// Load from `path` overlaid with `vars` instead of the process
    /// environment.
    #[cfg(test)]
    fn from_path_and_vars(path: &Path, vars: config::Map<String, String>) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::from(path))
            .add_source(environment().source(Some(vars)));
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings: Settings = builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|err| Error::Configuration(format!("failed to load settings: {err}")))?;

        validate_config(&settings)?;
        Ok(settings)
    }

    pub fn page_size(&self) -> usize {
        self.data_source.page_size
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = match &self.store {
            StoreSettings::HttpCache(cache) => format!("http cache {}", cache.cache_name),
            StoreSettings::File { path } => format!("file {path}"),
            StoreSettings::Memory => "memory".to_string(),
        };
        write!(
            f,
            "Settings {{\n\
             \tLog Level: {}\n\
             \tTest Mode: {}\n\
             \tMin Policy: {:?}\n\
             \tData Source URL: {}\n\
             \tPage Size: {}\n\
             \tMetrics URL: {}\n\
             \tComponent: {}\n\
             \tWatermark Store: {}\n\
             }}",
            self.log_level,
            self.test_mode,
            self.min_policy,
            self.data_source.base_url,
            self.data_source.page_size,
            self.metrics.base_url,
            self.metrics.component_name,
            store,
        )
    }
}
