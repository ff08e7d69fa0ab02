//! One pass of the agent: window, fetch and aggregate each record type,
//! report, then commit the watermark.

use crate::{
    Result,
    aggregator::{MinPolicy, aggregate},
    fetcher::fetch_all,
    reporter::{self, Component, MetricsBackend, NewRelicBackend},
    settings::{Settings, StoreSettings},
    source::{MAX_PAGE_SIZE, RecordSource, RecordType, StripeSource, SyntheticSource},
    watermark::{FileWatermarkStore, HttpCacheStore, MemoryWatermarkStore, WatermarkStore},
    window::{Timestamp, Window, duration_secs},
};
use chrono::Utc;
use std::fmt;
use tracing::{error, info, warn};

/// Last stage a run reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Start,
    WindowComputed,
    Aggregating(RecordType),
    Reported,
    WatermarkCommitted,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStage::Start => f.write_str("start"),
            RunStage::WindowComputed => f.write_str("window computed"),
            RunStage::Aggregating(record_type) => write!(f, "aggregating {record_type}"),
            RunStage::Reported => f.write_str("reported"),
            RunStage::WatermarkCommitted => f.write_str("watermark committed"),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub window: Window,
    pub previous_watermark: Option<Timestamp>,
    pub duration_secs: i64,
    /// Records aggregated per record type, in processing order.
    pub records: Vec<(RecordType, u64)>,
    pub metrics: usize,
    /// Watermark written by this run. `None` when the stored watermark was
    /// already at or past the window end.
    pub committed: Option<Timestamp>,
}

pub struct Agent {
    source: Box<dyn RecordSource>,
    store: Box<dyn WatermarkStore>,
    backend: Box<dyn MetricsBackend>,
    component_name: String,
    page_size: usize,
    min_policy: MinPolicy,
}

impl Agent {
    pub fn new(
        source: Box<dyn RecordSource>,
        store: Box<dyn WatermarkStore>,
        backend: Box<dyn MetricsBackend>,
    ) -> Self {
        Self {
            source,
            store,
            backend,
            component_name: "Stripe".to_string(),
            page_size: MAX_PAGE_SIZE,
            min_policy: MinPolicy::default(),
        }
    }

    /// Wire up the collaborators named in `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let source: Box<dyn RecordSource> = if settings.test_mode {
            info!("test mode: using generated records");
            Box::new(SyntheticSource)
        } else {
            Box::new(StripeSource::new(&settings.data_source, &settings.retry)?)
        };

        let store: Box<dyn WatermarkStore> = match &settings.store {
            StoreSettings::HttpCache(cache) => {
                Box::new(HttpCacheStore::new(cache, &settings.retry)?)
            }
            StoreSettings::File { path } => Box::new(FileWatermarkStore::new(path)),
            StoreSettings::Memory => Box::new(MemoryWatermarkStore::default()),
        };

        let backend = Box::new(NewRelicBackend::new(&settings.metrics, &settings.retry)?);

        Ok(Self::new(source, store, backend)
            .with_component_name(&settings.metrics.component_name)
            .with_page_size(settings.page_size())
            .with_min_policy(settings.min_policy))
    }

    pub fn with_component_name(mut self, name: impl Into<String>) -> Self {
        self.component_name = name.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_min_policy(mut self, min_policy: MinPolicy) -> Self {
        self.min_policy = min_policy;
        self
    }

    /// Run once for the current wall-clock time.
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_at(Utc::now().timestamp()).await
    }

    /// Run once with `now` as the end of the window.
    ///
    /// Any failure ends the run where it happened. The watermark is only
    /// written after the metrics backend accepted the submission.
    pub async fn run_at(&self, now: Timestamp) -> Result<RunSummary> {
        let mut stage = RunStage::Start;
        let result = self.run_stages(now, &mut stage).await;

        match &result {
            Ok(summary) => {
                metrics::counter!("payments_agent_runs_succeeded").increment(1);
                if let Some(watermark) = summary.committed {
                    metrics::gauge!("payments_agent_watermark").set(watermark as f64);
                }
            }
            Err(err) => {
                metrics::counter!("payments_agent_runs_failed").increment(1);
                error!(%stage, %err, "run aborted, watermark not advanced");
            }
        }

        result
    }

    async fn run_stages(&self, now: Timestamp, stage: &mut RunStage) -> Result<RunSummary> {
        let previous_watermark = self.store.get().await?;
        let window = Window::compute(now, previous_watermark);
        *stage = RunStage::WindowComputed;
        info!(%window, ?previous_watermark, "window computed");

        let mut component = Component::new(&self.component_name);
        let mut records = Vec::with_capacity(RecordType::TRACKED.len());

        for record_type in RecordType::TRACKED {
            *stage = RunStage::Aggregating(record_type);
            let stream = fetch_all(self.source.as_ref(), record_type, window, self.page_size);
            let aggregation = aggregate(stream, self.min_policy).await?;

            info!(
                %record_type,
                records = aggregation.record_count(),
                currencies = aggregation.len() / 2,
                "aggregated"
            );
            records.push((record_type, aggregation.record_count()));
            reporter::report(&mut component, record_type, &aggregation);
        }

        let duration = duration_secs(&window, previous_watermark.is_some());
        component.set_duration_secs(duration);
        self.backend.submit(&component).await?;
        *stage = RunStage::Reported;

        let committed = if previous_watermark.is_none_or(|previous| window.to > previous) {
            self.store.put(window.to).await?;
            Some(window.to)
        } else {
            warn!(
                ?previous_watermark,
                now, "stored watermark is ahead of the clock, leaving it in place"
            );
            None
        };
        *stage = RunStage::WatermarkCommitted;
        info!(?committed, duration, "run complete");

        Ok(RunSummary {
            window,
            previous_watermark,
            duration_secs: duration,
            records,
            metrics: component.submissions().len(),
            committed,
        })
    }
}
