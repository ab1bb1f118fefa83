//! HTTP client with built-in retry and timeout support.
//!
//! Retries are transparent for server errors (5xx) and connectivity-class
//! failures only. A 429 is never retried here; it is returned as a response
//! so the caller can route the payload through the rate-limit gate.

use std::time::Duration;

use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response};
use scanstream_common::BackoffStrategy;
use scanstream_domain::ScanError;
use tracing::debug;

use crate::errors::map_reqwest;

/// HTTP client wrapping reqwest with bounded retry.
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    timeout: Duration,
    max_attempts: usize,
    backoff: BackoffStrategy,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// The per-request deadline this client was built with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute the provided request builder with retry semantics.
    ///
    /// The builder must carry a clonable body; multipart uploads go through
    /// [`HttpClient::send_with`] instead.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, ScanError> {
        self.send_with(|| {
            builder.try_clone().ok_or_else(|| {
                ScanError::Config(
                    "request body cannot be cloned; buffer the body to enable retries".into(),
                )
            })
        })
        .await
    }

    /// Execute a request rebuilt per attempt, retrying 5xx and
    /// connectivity-class failures with backoff.
    pub async fn send_with<F>(&self, build: F) -> Result<Response, ScanError>
    where
        F: Fn() -> Result<RequestBuilder, ScanError>,
    {
        let attempts = self.max_attempts.max(1);

        for attempt in 0..attempts {
            let request = build()?.build().map_err(|err| map_reqwest(&err, self.timeout))?;
            let method = request.method().clone();
            let url = request.url().clone();
            debug!(attempt = attempt + 1, %method, %url, "sending HTTP request");

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt = attempt + 1, %method, %url, %status, "received HTTP response");

                    if status.is_server_error() && attempt + 1 < attempts {
                        self.sleep_with_backoff(attempt).await;
                        continue;
                    }

                    return Ok(response);
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, %method, %url, error = %err, "HTTP request failed");

                    let mapped = map_reqwest(&err, self.timeout);
                    if attempt + 1 < attempts && mapped.is_retryable() {
                        self.sleep_with_backoff(attempt).await;
                        continue;
                    }

                    return Err(mapped);
                }
            }
        }

        Err(ScanError::Connectivity("http client exhausted retries".into()))
    }

    async fn sleep_with_backoff(&self, attempt: usize) {
        let delay = self.backoff.delay_for(attempt as u32);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    max_attempts: usize,
    backoff: BackoffStrategy,
    user_agent: Option<String>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            connect_timeout: None,
            max_attempts: 3,
            backoff: BackoffStrategy::upload_default(),
            user_agent: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Remove the whole-request deadline. Long-lived event streams need
    /// this; pair it with [`HttpClientBuilder::connect_timeout`].
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Configure the total number of attempts (initial try + retries).
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<HttpClient, ScanError> {
        let mut builder = ReqwestClient::builder().no_proxy();

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(connect_timeout) = self.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        // Deadline reported in timeout errors.
        let deadline = self
            .timeout
            .or(self.connect_timeout)
            .unwrap_or(Duration::from_secs(30));

        let client = builder.build().map_err(|err| map_reqwest(&err, deadline))?;

        Ok(HttpClient {
            client,
            timeout: deadline,
            max_attempts: self.max_attempts.max(1),
            backoff: self.backoff,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use reqwest::StatusCode;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_with_defaults() -> HttpClient {
        HttpClient::builder()
            .backoff(BackoffStrategy::Fixed(Duration::from_millis(10)))
            .max_attempts(3)
            .build()
            .expect("http client")
    }

    #[tokio::test]
    async fn returns_successful_response_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                let current = attempts_clone.fetch_add(1, Ordering::SeqCst);
                if current < 2 {
                    ResponseTemplate::new(500)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .expect(3)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_rate_limiting() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response =
            client.send(client.request(Method::POST, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retries_on_network_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // release the port so that requests fail with ECONNREFUSED
        let url = format!("http://{addr}");

        let client = HttpClient::builder()
            .backoff(BackoffStrategy::Fixed(Duration::from_millis(5)))
            .max_attempts(2)
            .build()
            .expect("http client");

        let result = client.send(client.request(Method::GET, &url)).await;
        assert!(matches!(result, Err(ScanError::Connectivity(_))));
    }
}
