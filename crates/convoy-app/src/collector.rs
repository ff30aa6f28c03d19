//! HTTP transport for the remote report collector.
//!
//! Reports are `POST`ed as JSON to `{base}/api/report`; reachability is a `GET` of
//! `{base}/api/ping`. Both carry the configured bearer token. Responses are classified so the
//! submitter can route the queue file: 400 rejects the report, 429 throttles the client, and any
//! other non-success status or transport failure counts as a delivery error.

use std::time::Duration;

use async_trait::async_trait;
use convoy_config::CollectorConfig;
use convoy_core::Report;
use convoy_submit::{CollectorClient, CollectorError};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use tracing::debug;

use crate::error::{AppError, AppResult};

const REPORT_PATH: &str = "api/report";
const PING_PATH: &str = "api/ping";

/// Collector client speaking HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpCollectorClient {
    client: Client,
    report_url: Url,
    ping_url: Url,
    token: Option<String>,
}

impl HttpCollectorClient {
    /// Build a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidConfig`] for an unparsable base URL and [`AppError::Http`] when
    /// the TLS client cannot be constructed.
    pub fn new(config: &CollectorConfig) -> AppResult<Self> {
        let base = parse_base(&config.base_url)?;
        let join = |path: &str| {
            base.join(path).map_err(|_| AppError::InvalidConfig {
                field: "collector.base_url",
                reason: "invalid_url",
                value: Some(config.base_url.clone()),
            })
        };
        let report_url = join(REPORT_PATH)?;
        let ping_url = join(PING_PATH)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|source| AppError::Http {
                operation: "collector.client_build",
                url: config.base_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            report_url,
            ping_url,
            token: config.token.clone().filter(|token| !token.is_empty()),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl CollectorClient for HttpCollectorClient {
    async fn upload(&self, report: &Report) -> Result<(), CollectorError> {
        let response = self
            .authorize(self.client.post(self.report_url.clone()).json(report))
            .send()
            .await
            .map_err(CollectorError::unreachable)?;
        debug!(report = %report.id, status = %response.status(), "collector answered upload");
        classify(response).await
    }

    async fn ping(&self) -> Result<(), CollectorError> {
        let response = self
            .authorize(self.client.get(self.ping_url.clone()))
            .send()
            .await
            .map_err(CollectorError::unreachable)?;
        classify(response).await
    }
}

/// Parse the base URL, treating it as a directory so relative joins append.
fn parse_base(raw: &str) -> AppResult<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash).map_err(|_| AppError::InvalidConfig {
        field: "collector.base_url",
        reason: "invalid_url",
        value: Some(raw.to_string()),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::InvalidConfig {
            field: "collector.base_url",
            reason: "unsupported_scheme",
            value: Some(raw.to_string()),
        });
    }
    Ok(url)
}

async fn classify(response: Response) -> Result<(), CollectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::BAD_REQUEST => {
            let body = response.text().await.unwrap_or_default();
            let detail = Some(body.trim().to_string()).filter(|text| !text.is_empty());
            Err(CollectorError::Rejected {
                status: status.as_u16(),
                detail,
            })
        }
        StatusCode::TOO_MANY_REQUESTS => Err(CollectorError::Throttled),
        other => Err(CollectorError::Status {
            status: other.as_u16(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use httpmock::prelude::*;
    use serde_json::json;

    type TestResult<T> = anyhow::Result<T>;

    fn config(base_url: String, token: Option<&str>) -> CollectorConfig {
        CollectorConfig {
            base_url,
            token: token.map(str::to_string),
            timeout_secs: 5,
        }
    }

    #[test]
    fn base_url_must_be_http() {
        assert!(parse_base("https://collector.example.com/tenant").is_ok());
        assert!(matches!(
            parse_base("ftp://collector.example.com"),
            Err(AppError::InvalidConfig {
                reason: "unsupported_scheme",
                ..
            })
        ));
        assert!(parse_base("not a url").is_err());
    }

    #[test]
    fn urls_append_to_base_path() -> TestResult<()> {
        let client = HttpCollectorClient::new(&config("https://c.example.com/tenant".into(), None))?;
        assert_eq!(client.report_url.as_str(), "https://c.example.com/tenant/api/report");
        assert_eq!(client.ping_url.as_str(), "https://c.example.com/tenant/api/ping");
        Ok(())
    }

    #[tokio::test]
    async fn upload_posts_json_with_bearer_token() -> TestResult<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/report")
                .header("authorization", "Bearer s3cret");
            then.status(201);
        });
        let client = HttpCollectorClient::new(&config(server.base_url(), Some("s3cret")))?;

        client.upload(&Report::new(json!({ "serial": "SN-1" }))).await?;
        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn responses_are_classified() -> TestResult<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/report");
            then.status(400).body("serial missing");
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/ping");
            then.status(429);
        });
        let client = HttpCollectorClient::new(&config(server.base_url(), None))?;

        let rejected = client.upload(&Report::new(json!({ "a": 1 }))).await;
        assert!(matches!(
            rejected,
            Err(CollectorError::Rejected { status: 400, detail: Some(ref text) }) if text == "serial missing"
        ));
        assert!(matches!(client.ping().await, Err(CollectorError::Throttled)));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_collector_is_a_transport_failure() -> TestResult<()> {
        let client = HttpCollectorClient::new(&config("http://127.0.0.1:9".into(), None))?;
        assert!(matches!(
            client.ping().await,
            Err(CollectorError::Unreachable { .. })
        ));
        Ok(())
    }
}
