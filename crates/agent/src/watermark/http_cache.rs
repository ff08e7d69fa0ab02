use super::{WATERMARK_KEY, WatermarkStore, parse_watermark};
use crate::{
    Error, Result,
    http::{self, TransportError},
    settings::{HttpCacheSettings, RetrySettings},
    window::Timestamp,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CacheItem {
    value: Value,
}

/// Watermark kept in a hosted key-value cache (IronCache REST API).
pub struct HttpCacheStore {
    client: reqwest::Client,
    item_url: String,
    token: String,
    retry: RetrySettings,
}

impl HttpCacheStore {
    pub fn new(settings: &HttpCacheSettings, retry: &RetrySettings) -> Result<Self> {
        let item_url = format!(
            "{}/1/projects/{}/caches/{}/items/{WATERMARK_KEY}",
            settings.base_url.trim_end_matches('/'),
            settings.project_id,
            settings.cache_name,
        );
        let client = http::client(settings.timeout()).map_err(|err| {
            Error::Configuration(format!("cannot build watermark cache HTTP client: {err}"))
        })?;
        Ok(Self {
            client,
            item_url,
            token: settings.token.clone(),
            retry: retry.clone(),
        })
    }

    fn authorization(&self) -> String {
        format!("OAuth {}", self.token)
    }
}

fn classify(err: TransportError) -> Error {
    match err.status() {
        Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            Error::Configuration("watermark cache credentials are wrong".to_string())
        }
        _ => Error::Store(err.to_string()),
    }
}

#[async_trait]
impl WatermarkStore for HttpCacheStore {
    async fn get(&self) -> Result<Option<Timestamp>> {
        let response = http::send(
            || {
                self.client
                    .get(&self.item_url)
                    .header("Authorization", self.authorization())
            },
            self.retry.backoff(),
            "get_watermark",
        )
        .await;

        let response = match response {
            Ok(response) => response,
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND) => {
                debug!("no watermark stored yet");
                return Ok(None);
            }
            Err(err) => return Err(classify(err)),
        };

        let item: CacheItem = response
            .json()
            .await
            .map_err(|err| Error::Store(format!("malformed cache item: {err}")))?;

        match item.value {
            Value::Number(number) => number
                .as_i64()
                .map(Some)
                .ok_or_else(|| {
                    Error::Store(format!("stored watermark {number} is not a timestamp"))
                }),
            Value::String(raw) => parse_watermark(&raw).map(Some),
            other => Err(Error::Store(format!("stored watermark {other} is not a timestamp"))),
        }
    }

    async fn put(&self, watermark: Timestamp) -> Result<()> {
        let body = json!({ "value": watermark.to_string() });
        http::send(
            || {
                self.client
                    .put(&self.item_url)
                    .header("Authorization", self.authorization())
                    .json(&body)
            },
            self.retry.backoff(),
            "put_watermark",
        )
        .await
        .map_err(classify)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const ITEM_PATH: &str =
        "/1/projects/proj-1/caches/newrelic-stripe-agent/items/previously_processed_at";

    fn store(base_url: String) -> HttpCacheStore {
        let settings = HttpCacheSettings {
            base_url,
            project_id: "proj-1".to_string(),
            token: "tok".to_string(),
            ..Default::default()
        };
        let retry = RetrySettings {
            max_times: 1,
            min_delay_ms: 1,
            max_delay_ms: 2,
            ..Default::default()
        };
        HttpCacheStore::new(&settings, &retry).unwrap()
    }

    #[tokio::test]
    async fn reads_string_value() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(ITEM_PATH)
                    .header("authorization", "OAuth tok");
                then.status(200).json_body(serde_json::json!({
                    "cache": "newrelic-stripe-agent",
                    "key": "previously_processed_at",
                    "value": "1700000000"
                }));
            })
            .await;

        assert_eq!(
            store(server.base_url()).get().await.unwrap(),
            Some(1_700_000_000)
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn reads_numeric_value() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(ITEM_PATH);
                then.status(200)
                    .json_body(serde_json::json!({"value": 1700000123}));
            })
            .await;

        assert_eq!(
            store(server.base_url()).get().await.unwrap(),
            Some(1_700_000_123)
        );
    }

    #[tokio::test]
    async fn missing_item_is_no_watermark() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(ITEM_PATH);
                then.status(404).json_body(serde_json::json!({"msg": "Key not found."}));
            })
            .await;

        assert_eq!(store(server.base_url()).get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unavailable_cache_is_an_error_not_an_empty_store() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(ITEM_PATH);
                then.status(503);
            })
            .await;

        let err = store(server.base_url()).get().await.unwrap_err();
        assert!(matches!(err, Error::Store(_)), "{err:?}");
    }

    #[tokio::test]
    async fn rejected_token_is_a_configuration_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path(ITEM_PATH);
                then.status(401);
            })
            .await;

        let err = store(server.base_url()).put(5).await.unwrap_err();
        assert!(err.is_fatal(), "{err:?}");
    }

    #[tokio::test]
    async fn put_sends_value_as_string() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path(ITEM_PATH)
                    .header("authorization", "OAuth tok")
                    .json_body(serde_json::json!({"value": "1700003600"}));
                then.status(200).json_body(serde_json::json!({"msg": "Stored."}));
            })
            .await;

        store(server.base_url()).put(1_700_003_600).await.unwrap();
        mock.assert_async().await;
    }
}
