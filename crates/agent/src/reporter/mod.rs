pub mod newrelic;

use crate::{
    Result,
    aggregator::{Accumulator, Aggregation},
    source::RecordType,
};
use async_trait::async_trait;
use mockall::automock;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

pub use newrelic::NewRelicBackend;

/// Statistics payload of one metric, rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricValue {
    pub min: f64,
    pub max: f64,
    pub total: f64,
    pub count: u64,
    pub sum_of_squares: f64,
}

impl From<&Accumulator> for MetricValue {
    fn from(acc: &Accumulator) -> Self {
        Self {
            min: round2(acc.min),
            max: round2(acc.max),
            total: round2(acc.total),
            count: acc.count,
            sum_of_squares: round2(acc.sum_of_squares),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSubmission {
    pub name: String,
    pub currency: String,
    pub value: MetricValue,
}

/// The batch of metrics sent to the backend at the end of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Component {
    name: String,
    duration_secs: i64,
    metrics: BTreeMap<(String, String), MetricValue>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
    }

    pub fn set_duration_secs(&mut self, duration_secs: i64) {
        self.duration_secs = duration_secs;
    }

    /// Attach a metric; attaching the same (name, currency) again replaces it.
    pub fn add_metric(
        &mut self,
        name: impl Into<String>,
        currency: impl Into<String>,
        value: MetricValue,
    ) {
        self.metrics.insert((name.into(), currency.into()), value);
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn submissions(&self) -> Vec<MetricSubmission> {
        self.metrics
            .iter()
            .map(|((name, currency), value)| MetricSubmission {
                name: name.clone(),
                currency: currency.clone(),
                value: *value,
            })
            .collect()
    }
}

/// Name of the metric for `field` of `record_type`, e.g. `Charges/Amount`.
pub fn metric_name(record_type: RecordType, field: impl std::fmt::Display) -> String {
    format!("{}s/{field}", record_type.name())
}

/// Attach one rounded metric per (currency, field) of `aggregation`.
pub fn report(component: &mut Component, record_type: RecordType, aggregation: &Aggregation) {
    for (currency, field, acc) in aggregation.iter() {
        let name = metric_name(record_type, field);
        let value = MetricValue::from(acc);
        info!(
            %name,
            currency,
            min = value.min,
            max = value.max,
            total = value.total,
            count = value.count,
            sum_of_squares = value.sum_of_squares,
            mean = acc.mean().map(round2),
            std_dev = acc.variance().map(|v| round2(v.sqrt())),
            "attaching metric"
        );
        component.add_metric(name, currency, value);
    }
}

/// Destination of the run's metrics.
#[automock]
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Send every metric attached to `component` in one request.
    async fn submit(&self, component: &Component) -> Result<()>;
}
