use super::{Component, MetricValue, MetricsBackend};
use crate::{
    Error, Result,
    http::{self, TransportError},
    settings::{MetricsSettings, RetrySettings},
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Serialize)]
struct AgentInfo<'a> {
    host: &'a str,
    pid: u32,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct ComponentPayload<'a> {
    name: &'a str,
    guid: &'a str,
    duration: i64,
    metrics: BTreeMap<String, MetricValue>,
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    agent: AgentInfo<'a>,
    components: Vec<ComponentPayload<'a>>,
}

/// Client for the New Relic Platform component metrics API.
pub struct NewRelicBackend {
    client: reqwest::Client,
    url: String,
    license_key: String,
    guid: String,
    version: String,
    host: String,
    retry: RetrySettings,
}

impl NewRelicBackend {
    pub fn new(settings: &MetricsSettings, retry: &RetrySettings) -> Result<Self> {
        let client = http::client(settings.timeout()).map_err(|err| {
            Error::Configuration(format!("cannot build metrics backend HTTP client: {err}"))
        })?;
        Ok(Self {
            client,
            url: format!(
                "{}/platform/v1/metrics",
                settings.base_url.trim_end_matches('/')
            ),
            license_key: settings.license_key.clone(),
            guid: settings.guid.clone(),
            version: settings.version.clone(),
            host: settings.host.clone(),
            retry: retry.clone(),
        })
    }

    fn payload<'a>(&'a self, component: &'a Component) -> Payload<'a> {
        let metrics = component
            .submissions()
            .into_iter()
            .map(|s| (format!("Component/{}[{}]", s.name, s.currency), s.value))
            .collect();

        Payload {
            agent: AgentInfo {
                host: &self.host,
                pid: std::process::id(),
                version: &self.version,
            },
            components: vec![ComponentPayload {
                name: component.name(),
                guid: &self.guid,
                duration: component.duration_secs(),
                metrics,
            }],
        }
    }
}

fn classify(err: TransportError) -> Error {
    match err.status() {
        Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            Error::Configuration("metrics backend license key is wrong".to_string())
        }
        _ => Error::Reporting(err.to_string()),
    }
}

#[async_trait]
impl MetricsBackend for NewRelicBackend {
    async fn submit(&self, component: &Component) -> Result<()> {
        let payload = self.payload(component);
        let metric_count = payload.components[0].metrics.len();

        http::send(
            || {
                self.client
                    .post(&self.url)
                    .header("X-License-Key", &self.license_key)
                    .json(&payload)
            },
            self.retry.backoff(),
            "submit_metrics",
        )
        .await
        .map_err(classify)?;

        info!(
            component = component.name(),
            metrics = metric_count,
            duration = component.duration_secs(),
            "submitted metrics"
        );
        Ok(())
    }
}
