//! Runs a single-pass command either once or on a cron-like interval.
//!
//! Passes never overlap: a tick that fires while the previous pass is still in
//! flight is skipped. Errors the command classifies as fatal stop the scheduler
//! and are returned to the caller; every other error is logged and the next
//! tick tries again.
//!
//! # Example
//!
//! ```
//! use anyhow::Result;
//! use clap::Parser;
//! use payments_agent_scheduled_run::{ScheduleOption, ScheduledRun};
//!
//! #[derive(Parser, Clone)]
//! struct Collect {
//!     #[command(flatten)]
//!     schedule: ScheduleOption,
//! }
//!
//! #[async_trait::async_trait]
//! impl ScheduledRun for Collect {
//!     fn schedule(&self) -> &ScheduleOption {
//!         &self.schedule
//!     }
//!
//!     async fn run_once(&self) -> Result<()> {
//!         Ok(())
//!     }
//! }
//! ```

use std::{sync::Arc, time::Duration};

use anyhow::{Result, bail};
use clap::Args;
use tokio::sync::{Mutex, mpsc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Schedule configuration that can be flattened into command structs.
#[derive(Debug, Args, Clone, Default)]
pub struct ScheduleOption {
    /// Schedule interval (e.g. "5s", "10m", "2h"). If not provided, runs once
    /// and exits.
    #[arg(long, help = "Schedule interval (e.g. '5s', '10m', '2h')")]
    pub schedule: Option<String>,
}

impl ScheduleOption {
    pub fn is_scheduled(&self) -> bool {
        self.schedule.is_some()
    }
}

/// A command made of one self-contained pass.
#[async_trait::async_trait]
pub trait ScheduledRun: Clone {
    fn schedule(&self) -> &ScheduleOption;

    /// Perform one pass.
    async fn run_once(&self) -> Result<()>;

    /// Whether `err` means another pass cannot succeed either.
    fn is_fatal(&self, _err: &anyhow::Error) -> bool {
        false
    }

    /// Run once, or on the configured schedule until Ctrl+C or a fatal error.
    async fn execute(&self) -> Result<()>
    where
        Self: Sized + Send + Sync + 'static,
    {
        run_scheduled(self).await
    }
}

pub async fn run_scheduled<T: ScheduledRun + Send + Sync + 'static>(command: &T) -> Result<()> {
    let Some(schedule_str) = command.schedule().schedule.as_deref() else {
        return command.run_once().await;
    };

    let cron_expr = schedule_to_cron(schedule_str)?;
    let in_flight = Arc::new(Mutex::new(()));
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<anyhow::Error>();

    let command_clone = command.clone();
    let job = Job::new_async(cron_expr.as_str(), move |_uuid, _l| {
        let command = command_clone.clone();
        let in_flight = in_flight.clone();
        let fatal_tx = fatal_tx.clone();
        Box::pin(async move {
            let Ok(_guard) = in_flight.try_lock() else {
                warn!("previous run still in progress, skipping this tick");
                return;
            };

            if let Err(err) = command.run_once().await {
                if command.is_fatal(&err) {
                    error!("Fatal error, stopping scheduler: {err:#}");
                    let _ = fatal_tx.send(err);
                } else {
                    error!("Run failed, retrying on next tick: {err:#}");
                }
            }
        })
    })?;

    let mut sched = JobScheduler::new().await?;
    sched.add(job).await?;
    sched.start().await?;

    info!("Scheduler started. Command will run every {schedule_str}");
    info!("Press Ctrl+C to stop...");

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            signal.map_err(anyhow::Error::from)
        }
        Some(err) = fatal_rx.recv() => Err(err),
    };

    sched.shutdown().await?;
    outcome
}

/// Convert a schedule string to a cron expression.
///
/// Supports formats like "5s", "10m", "2h" or plain numbers (treated as seconds).
/// Maximum allowed duration is less than 24 hours.
fn schedule_to_cron(s: &str) -> Result<String> {
    let s = s.trim().to_lowercase();

    let duration = if let Some(num_str) = s.strip_suffix('s') {
        Duration::from_secs(num_str.parse()?)
    } else if let Some(num_str) = s.strip_suffix('m') {
        Duration::from_secs(num_str.parse::<u64>()? * 60)
    } else if let Some(num_str) = s.strip_suffix('h') {
        Duration::from_secs(num_str.parse::<u64>()? * 3600)
    } else {
        Duration::from_secs(s.parse()?)
    };

    let secs = duration.as_secs();
    if secs == 0 {
        bail!("Schedule duration '{s}' must be at least one second.");
    }
    if secs >= 24 * 3600 {
        bail!("Schedule duration '{s}' is too long. Maximum allowed is less than 24 hours.");
    }

    if secs < 60 {
        Ok(format!("*/{secs} * * * * *"))
    } else if secs < 3600 {
        Ok(format!("0 */{} * * * *", secs / 60))
    } else {
        Ok(format!("0 0 */{} * * *", secs / 3600))
    }
}
