//! Shared HTTP transport for the data source, metrics backend and cache
//! clients: request timeouts and retry of transient failures.

use backon::{ExponentialBuilder, Retryable};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl TransportError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::Request(err) => err.status(),
            TransportError::Status { status, .. } => Some(*status),
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            TransportError::Status { body, .. } => Some(body),
            TransportError::Request(_) => None,
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            TransportError::Request(err) => {
                err.is_timeout() || err.is_connect() || retryable_status(err.status())
            }
            TransportError::Status { status, .. } => retryable_status(Some(*status)),
        }
    }
}

fn retryable_status(status: Option<StatusCode>) -> bool {
    match status {
        Some(code) => code.is_server_error() || code == StatusCode::TOO_MANY_REQUESTS,
        None => false,
    }
}

pub const USER_AGENT: &str = concat!("payments-metrics-agent/", env!("CARGO_PKG_VERSION"));

pub fn client(timeout: Duration) -> Result<reqwest::Client, TransportError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

/// Send the request built by `request`, rebuilding it for every attempt.
/// Non-success statuses come back as [`TransportError::Status`]; timeouts,
/// connection failures, 429 and 5xx are retried with `backoff`.
pub async fn send<F>(
    request: F,
    backoff: ExponentialBuilder,
    label: &'static str,
) -> Result<Response, TransportError>
where
    F: Fn() -> RequestBuilder,
{
    let attempts = AtomicUsize::new(0);

    (|| send_once(request()))
        .retry(backoff)
        .when(TransportError::is_transient)
        .notify(|err: &TransportError, delay: Duration| {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                attempt,
                retry_in = ?delay,
                error = %err,
                operation = label,
                "transient HTTP failure"
            );
        })
        .await
}

fn send_once(request: RequestBuilder) -> impl Future<Output = Result<Response, TransportError>> {
    async move {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn no_wait(max_times: usize) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
            .with_max_times(max_times)
    }

    #[test]
    fn retryable_status_codes() {
        assert!(retryable_status(Some(StatusCode::INTERNAL_SERVER_ERROR)));
        assert!(retryable_status(Some(StatusCode::TOO_MANY_REQUESTS)));
        assert!(retryable_status(Some(StatusCode::SERVICE_UNAVAILABLE)));
        assert!(!retryable_status(Some(StatusCode::FORBIDDEN)));
        assert!(!retryable_status(Some(StatusCode::BAD_REQUEST)));
        assert!(!retryable_status(None));
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_exhausted() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/flaky");
                then.status(503).body("try later");
            })
            .await;

        let client = client(Duration::from_secs(5)).unwrap();
        let url = server.url("/flaky");
        let err = send(|| client.get(&url), no_wait(2), "flaky")
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(err.body(), Some("try later"));
        assert_eq!(mock.hits_async().await, 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/denied");
                then.status(401).body("Invalid API Key provided");
            })
            .await;

        let client = client(Duration::from_secs(5)).unwrap();
        let url = server.url("/denied");
        let err = send(|| client.get(&url), no_wait(5), "denied")
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn built_client_carries_user_agent() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/ua").header("user-agent", USER_AGENT);
                then.status(200);
            })
            .await;

        let client = client(Duration::from_secs(5)).unwrap();
        let url = server.url("/ua");
        send(|| client.get(&url), no_wait(0), "ua").await.unwrap();

        mock.assert_async().await;
    }
}
