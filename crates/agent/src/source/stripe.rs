use super::{Record, RecordSource, RecordType};
use crate::{
    Error, Result,
    http::{self, TransportError},
    settings::{DataSourceSettings, RetrySettings},
    window::Window,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: Vec<Record>,
}

/// Payments API client listing charges and transfers with offset pagination.
pub struct StripeSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetrySettings,
}

impl StripeSource {
    pub fn new(settings: &DataSourceSettings, retry: &RetrySettings) -> Result<Self> {
        let client = http::client(settings.timeout()).map_err(|err| {
            Error::Configuration(format!("cannot build data source HTTP client: {err}"))
        })?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            retry: retry.clone(),
        })
    }

    fn query(
        record_type: RecordType,
        window: Window,
        count: usize,
        offset: usize,
    ) -> Vec<(String, String)> {
        let field = record_type.predicate_field();
        vec![
            (format!("{field}[gt]"), window.from.to_string()),
            (format!("{field}[lte]"), window.to.to_string()),
            ("count".to_string(), count.to_string()),
            ("offset".to_string(), offset.to_string()),
        ]
    }
}

#[async_trait]
impl RecordSource for StripeSource {
    async fn list(
        &self,
        record_type: RecordType,
        window: Window,
        count: usize,
        offset: usize,
    ) -> Result<Vec<Record>> {
        let url = format!("{}/v1/{}", self.base_url, record_type.resource());
        let query = Self::query(record_type, window, count, offset);

        debug!(%record_type, %window, count, offset, "requesting page");

        let response = http::send(
            || {
                self.client
                    .get(&url)
                    .bearer_auth(&self.api_key)
                    .query(&query)
            },
            self.retry.backoff(),
            "list_records",
        )
        .await
        .map_err(classify)?;

        let page: ListResponse = response
            .json()
            .await
            .map_err(|err| Error::DataSource(format!("malformed {record_type} page: {err}")))?;

        Ok(page.data)
    }
}

fn classify(err: TransportError) -> Error {
    let invalid_key = err.status() == Some(StatusCode::UNAUTHORIZED)
        || err
            .body()
            .is_some_and(|body| body.contains("Invalid API Key provided"));

    if invalid_key {
        Error::Configuration("invalid data source API key".to_string())
    } else {
        Error::DataSource(err.to_string())
    }
}
