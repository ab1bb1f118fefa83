//! HTTP adapter for the recognition service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response, StatusCode};
use scanstream_core::{EventStreamSession, ScanTransport};
use scanstream_domain::{Result, ScanConfig, ScanError, UploadReceipt};
use serde::Deserialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::api::stream::{connect_stream, HttpEventStream};
use crate::http::HttpClient;

/// Wire shape of a successful upload response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    job_id: String,
    stream_location: String,
    token: Option<String>,
}

/// Wire shape of a 429 body carrying an explicit cooldown.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitBody {
    retry_after_seconds: Option<u64>,
}

/// Transport adapter speaking the recognition service's HTTP surface.
///
/// Uploads retry 5xx and connect failures with backoff; a 429 surfaces
/// immediately as [`ScanError::RateLimited`] so the orchestrator can defer
/// the payload through the rate-limit gate.
pub struct RecognitionClient {
    http: HttpClient,
    stream_http: HttpClient,
    base_url: String,
    device_id: String,
    stream_max_reconnects: usize,
}

impl RecognitionClient {
    /// Build a transport from the engine configuration.
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.api.timeout)
            .max_attempts(config.upload_max_attempts)
            .build()?;

        // Event streams outlive any sane whole-request deadline; only the
        // connection itself is bounded.
        let stream_http = HttpClient::builder()
            .no_timeout()
            .connect_timeout(config.api.timeout)
            .max_attempts(1)
            .build()?;

        Ok(Self {
            http,
            stream_http,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            device_id: config.api.device_id.clone(),
            stream_max_reconnects: config.stream_max_reconnects,
        })
    }

    fn absolute(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}/{}", self.base_url, location.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl ScanTransport for RecognitionClient {
    #[instrument(skip(self, payload), fields(bytes = payload.len(), %correlation_id))]
    async fn upload(&self, payload: &[u8], correlation_id: Uuid) -> Result<UploadReceipt> {
        let url = format!("{}/scans", self.base_url);
        let payload = payload.to_vec();

        let response = self
            .http
            .send_with(|| {
                let part = Part::bytes(payload.clone())
                    .file_name("capture.jpg")
                    .mime_str("image/jpeg")
                    .map_err(|err| ScanError::Config(err.to_string()))?;
                let form = Form::new().part("image", part);
                Ok(self
                    .http
                    .request(Method::POST, &url)
                    .header("X-Device-Id", &self.device_id)
                    .header("X-Correlation-Id", correlation_id.to_string())
                    .multipart(form))
            })
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_of(response).await;
            return Err(ScanError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(ScanError::Server { status: status.as_u16() });
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|err| ScanError::MalformedResponse(err.to_string()))?;

        debug!(job_id = %body.job_id, "upload accepted");
        Ok(UploadReceipt {
            job_id: body.job_id,
            stream_location: body.stream_location,
            token: body.token,
        })
    }

    async fn open_stream(
        &self,
        stream_location: &str,
        token: Option<&str>,
        correlation_id: Uuid,
    ) -> Result<Box<dyn EventStreamSession>> {
        let url = self.absolute(stream_location);
        let response = connect_stream(&self.stream_http, &url, token, correlation_id).await?;
        Ok(Box::new(HttpEventStream::new(
            self.stream_http.clone(),
            url,
            token.map(str::to_string),
            correlation_id,
            response,
            self.stream_max_reconnects,
        )))
    }

    async fn cleanup(&self, server_job_id: &str) -> Result<()> {
        let url = format!("{}/scans/{server_job_id}", self.base_url);
        let response = self.http.send(self.http.request(Method::DELETE, &url)).await?;

        let status = response.status();
        // 404 means the server already forgot the job.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(ScanError::Server { status: status.as_u16() })
    }
}

/// Extract the cooldown from a 429: `Retry-After` header first, then a
/// `retryAfterSeconds` body field. Absent both, the caller falls back to
/// its default window.
async fn retry_after_of(response: Response) -> Option<Duration> {
    if let Some(value) = response.headers().get(reqwest::header::RETRY_AFTER) {
        if let Some(seconds) = value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
            return Some(Duration::from_secs(seconds));
        }
    }
    let body: RateLimitBody = response.json().await.ok()?;
    body.retry_after_seconds.map(Duration::from_secs)
}
