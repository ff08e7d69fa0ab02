use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use payments_agent_scheduled_run::{ScheduleOption, ScheduledRun};
use payments_metrics_agent::{Agent, Error, settings::Settings};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "payments-metrics-agent", version, about)]
struct Cli {
    /// Path to a TOML config file; without it settings come from AGENT__* variables
    #[arg(short, long, env = "AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    schedule: ScheduleOption,
}

#[derive(Clone)]
struct Collect {
    agent: Arc<Agent>,
    schedule: ScheduleOption,
}

#[async_trait::async_trait]
impl ScheduledRun for Collect {
    fn schedule(&self) -> &ScheduleOption {
        &self.schedule
    }

    async fn run_once(&self) -> Result<()> {
        self.agent.run().await?;
        Ok(())
    }

    fn is_fatal(&self, err: &anyhow::Error) -> bool {
        err.downcast_ref::<Error>().is_some_and(Error::is_fatal)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::from_path(path)?,
        None => Settings::from_env()?,
    };

    init_logging(&settings.log_level);
    info!("{settings}");

    if let Some(prometheus) = &settings.prometheus {
        PrometheusBuilder::new()
            .with_http_listener(prometheus.addr)
            .install()?;
        export_build_info();
        info!(addr = %prometheus.addr, "prometheus exporter listening");
    }

    let command = Collect {
        agent: Arc::new(Agent::from_settings(&settings)?),
        schedule: cli.schedule,
    };
    command.execute().await?;

    info!("payments metrics agent shutting down");
    Ok(())
}

fn init_logging(log_level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn export_build_info() {
    let version = option_env!("BUILD_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    let build_commit = option_env!("BUILD_COMMIT").unwrap_or("UNKNOWN");

    metrics::gauge!(
        "payments_agent_build_info",
        "version" => version,
        "commit" => build_commit
    )
    .set(1);
}
