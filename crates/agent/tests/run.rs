//! End-to-end runs against mock HTTP servers and an on-disk watermark.

use httpmock::prelude::*;
use payments_metrics_agent::{
    Agent, Error,
    settings::{DataSourceSettings, MetricsSettings, RetrySettings, Settings, StoreSettings},
    watermark::{FileWatermarkStore, WatermarkStore},
};
use serde_json::json;
use tempfile::TempDir;

const T: i64 = 1_700_000_000;

fn settings(data_source: &MockServer, metrics: &MockServer, dir: &TempDir) -> Settings {
    Settings {
        log_level: "debug".to_string(),
        test_mode: false,
        min_policy: Default::default(),
        data_source: DataSourceSettings {
            base_url: data_source.base_url(),
            api_key: "sk_test_123".to_string(),
            page_size: 2,
            ..Default::default()
        },
        metrics: MetricsSettings {
            base_url: metrics.base_url(),
            license_key: "license".to_string(),
            guid: "com.example.payments".to_string(),
            ..Default::default()
        },
        store: StoreSettings::File {
            path: dir.path().join("state/watermark.json").to_string_lossy().into_owned(),
        },
        retry: RetrySettings {
            max_times: 0,
            ..Default::default()
        },
        prometheus: None,
    }
}

fn file_store(dir: &TempDir) -> FileWatermarkStore {
    FileWatermarkStore::new(dir.path().join("state/watermark.json"))
}

#[tokio::test]
async fn first_run_pages_through_charges_and_commits_watermark() {
    let data_source = MockServer::start_async().await;
    let metrics = MockServer::start_async().await;
    let dir = TempDir::new().unwrap();
    let from = (T - 3600).to_string();
    let to = T.to_string();

    let first_page = data_source
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/charges")
                .header("authorization", "Bearer sk_test_123")
                .query_param("created[gt]", &from)
                .query_param("created[lte]", &to)
                .query_param("count", "2")
                .query_param("offset", "0");
            then.status(200).json_body(json!({"data": [
                {"currency": "usd", "amount": 1000, "fee": 59},
                {"currency": "usd", "amount": 500, "fee": 30}
            ]}));
        })
        .await;
    let second_page = data_source
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/charges")
                .query_param("offset", "2");
            then.status(200).json_body(json!({"data": [
                {"currency": "eur", "amount": 250, "fee": 12}
            ]}));
        })
        .await;
    let transfers = data_source
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/transfers")
                .query_param("date[gt]", &from)
                .query_param("date[lte]", &to)
                .query_param("offset", "0");
            then.status(200).json_body(json!({"data": []}));
        })
        .await;
    let submit = metrics
        .mock_async(|when, then| {
            when.method(POST)
                .path("/platform/v1/metrics")
                .header("x-license-key", "license")
                .json_body_partial(
                    json!({
                        "components": [{
                            "name": "Stripe",
                            "duration": 3600,
                            "metrics": {
                                "Component/Charges/Amount[usd]": {
                                    "min": 500.0,
                                    "max": 1000.0,
                                    "total": 1500.0,
                                    "count": 2,
                                    "sum_of_squares": 1250000.0
                                },
                                "Component/Charges/Fee[eur]": {
                                    "min": 12.0,
                                    "max": 12.0,
                                    "total": 12.0,
                                    "count": 1,
                                    "sum_of_squares": 144.0
                                }
                            }
                        }]
                    })
                    .to_string(),
                );
            then.status(200).json_body(json!({"status": "ok"}));
        })
        .await;

    let agent = Agent::from_settings(&settings(&data_source, &metrics, &dir)).unwrap();
    let summary = agent.run_at(T).await.unwrap();

    first_page.assert_async().await;
    second_page.assert_async().await;
    transfers.assert_async().await;
    submit.assert_async().await;
    assert_eq!(summary.committed, Some(T));
    assert_eq!(summary.metrics, 4);
    assert_eq!(file_store(&dir).get().await.unwrap(), Some(T));
}

#[tokio::test]
async fn next_run_starts_at_the_committed_watermark() {
    let data_source = MockServer::start_async().await;
    let metrics = MockServer::start_async().await;
    let dir = TempDir::new().unwrap();
    file_store(&dir).put(T).await.unwrap();

    let charges = data_source
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/charges")
                .query_param("created[gt]", T.to_string())
                .query_param("created[lte]", (T + 300).to_string());
            then.status(200).json_body(json!({"data": []}));
        })
        .await;
    data_source
        .mock_async(|when, then| {
            when.method(GET).path("/v1/transfers");
            then.status(200).json_body(json!({"data": []}));
        })
        .await;
    let submit = metrics
        .mock_async(|when, then| {
            when.method(POST)
                .path("/platform/v1/metrics")
                .json_body_partial(
                    json!({"components": [{"duration": 300, "metrics": {}}]}).to_string(),
                );
            then.status(200);
        })
        .await;

    let agent = Agent::from_settings(&settings(&data_source, &metrics, &dir)).unwrap();
    let summary = agent.run_at(T + 300).await.unwrap();

    charges.assert_async().await;
    submit.assert_async().await;
    assert_eq!(summary.previous_watermark, Some(T));
    assert_eq!(file_store(&dir).get().await.unwrap(), Some(T + 300));
}

#[tokio::test]
async fn rejected_submission_keeps_the_old_watermark() {
    let data_source = MockServer::start_async().await;
    let metrics = MockServer::start_async().await;
    let dir = TempDir::new().unwrap();
    file_store(&dir).put(T - 500).await.unwrap();

    data_source
        .mock_async(|when, then| {
            when.method(GET);
            then.status(200).json_body(json!({"data": []}));
        })
        .await;
    metrics
        .mock_async(|when, then| {
            when.method(POST).path("/platform/v1/metrics");
            then.status(500).body("backend unavailable");
        })
        .await;

    let agent = Agent::from_settings(&settings(&data_source, &metrics, &dir)).unwrap();
    let err = agent.run_at(T).await.unwrap_err();

    assert!(matches!(err, Error::Reporting(_)), "{err:?}");
    assert_eq!(file_store(&dir).get().await.unwrap(), Some(T - 500));
}

#[tokio::test]
async fn invalid_api_key_is_fatal_and_nothing_is_reported() {
    let data_source = MockServer::start_async().await;
    let metrics = MockServer::start_async().await;
    let dir = TempDir::new().unwrap();

    data_source
        .mock_async(|when, then| {
            when.method(GET).path("/v1/charges");
            then.status(401).json_body(json!({
                "error": {"message": "Invalid API Key provided: sk_test_***123"}
            }));
        })
        .await;
    let submit = metrics
        .mock_async(|when, then| {
            when.method(POST);
            then.status(200);
        })
        .await;

    let agent = Agent::from_settings(&settings(&data_source, &metrics, &dir)).unwrap();
    let err = agent.run_at(T).await.unwrap_err();

    assert!(err.is_fatal());
    submit.assert_hits_async(0).await;
    assert_eq!(file_store(&dir).get().await.unwrap(), None);
}

#[tokio::test]
async fn test_mode_reports_generated_records() {
    let data_source = MockServer::start_async().await;
    let metrics = MockServer::start_async().await;
    let dir = TempDir::new().unwrap();

    let submit = metrics
        .mock_async(|when, then| {
            when.method(POST).path("/platform/v1/metrics");
            then.status(200);
        })
        .await;

    let mut settings = settings(&data_source, &metrics, &dir);
    settings.test_mode = true;
    settings.data_source.page_size = 100;
    let summary = Agent::from_settings(&settings)
        .unwrap()
        .run_at(T)
        .await
        .unwrap();

    submit.assert_async().await;
    assert_eq!(summary.records.iter().map(|(_, n)| n).sum::<u64>(), 6);
    assert_eq!(summary.committed, Some(T));
}
