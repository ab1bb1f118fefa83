//! Long-lived event-stream session over HTTP.

use std::collections::VecDeque;

use async_trait::async_trait;
use reqwest::{Method, Response};
use scanstream_core::EventStreamSession;
use scanstream_domain::{Result, ScanError};
use tracing::{debug, warn};
use uuid::Uuid;

use scanstream_common::BackoffStrategy;

use crate::http::HttpClient;

/// Open the event-stream endpoint and verify the server accepted it.
pub(crate) async fn connect_stream(
    http: &HttpClient,
    url: &str,
    token: Option<&str>,
    correlation_id: Uuid,
) -> Result<Response> {
    let mut request = http
        .request(Method::GET, url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .header("X-Correlation-Id", correlation_id.to_string());
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = http.send(request).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ScanError::StreamConnection(format!(
            "stream open failed with status {status}"
        )));
    }
    debug!(%correlation_id, url, "event stream open");
    Ok(response)
}

/// One open event stream, line-buffered, with bounded reconnects.
///
/// A mid-stream transport failure triggers a reconnect with backoff up to
/// the configured cap; the partial line from the dead connection is
/// discarded so decoding restarts on a frame boundary. A clean close by the
/// server ends the session with `Ok(None)`.
pub(crate) struct HttpEventStream {
    http: HttpClient,
    url: String,
    token: Option<String>,
    correlation_id: Uuid,
    response: Option<Response>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    reconnects_left: usize,
    reconnect_attempt: u32,
    backoff: BackoffStrategy,
}

impl HttpEventStream {
    pub(crate) fn new(
        http: HttpClient,
        url: String,
        token: Option<String>,
        correlation_id: Uuid,
        response: Response,
        max_reconnects: usize,
    ) -> Self {
        Self {
            http,
            url,
            token,
            correlation_id,
            response: Some(response),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            reconnects_left: max_reconnects,
            reconnect_attempt: 0,
            backoff: BackoffStrategy::upload_default(),
        }
    }

    /// Split complete lines out of the byte buffer; a trailing fragment
    /// stays buffered until its newline arrives.
    fn drain_buffer(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]).into_owned();
            self.pending.push_back(line);
        }
    }

    /// Re-open the stream, spending the reconnect budget one attempt at a
    /// time with backoff between attempts. Surfaces a terminal
    /// [`ScanError::StreamConnection`] only once the budget is exhausted.
    async fn reconnect(&mut self) -> Result<()> {
        // Anything left from the dead connection is an incomplete frame.
        self.buffer.clear();

        let mut last_err = None;
        while self.reconnects_left > 0 {
            self.reconnects_left -= 1;

            let delay = self.backoff.delay_for(self.reconnect_attempt);
            self.reconnect_attempt += 1;
            tokio::time::sleep(delay).await;

            match connect_stream(&self.http, &self.url, self.token.as_deref(), self.correlation_id)
                .await
            {
                Ok(response) => {
                    self.response = Some(response);
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        correlation_id = %self.correlation_id,
                        error = %err,
                        remaining = self.reconnects_left,
                        "event stream reconnect attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }

        let detail = last_err
            .map_or_else(|| "reconnect budget exhausted".to_string(), |err| err.to_string());
        Err(ScanError::StreamConnection(format!("event stream lost: {detail}")))
    }
}

#[async_trait]
impl EventStreamSession for HttpEventStream {
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }

            let Some(response) = self.response.as_mut() else {
                return Ok(None);
            };

            match response.chunk().await {
                Ok(Some(chunk)) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.drain_buffer();
                }
                Ok(None) => {
                    // Clean end of stream.
                    self.response = None;
                }
                Err(err) => {
                    warn!(
                        correlation_id = %self.correlation_id,
                        error = %err,
                        "event stream dropped, reconnecting"
                    );
                    self.response = None;
                    self.reconnect().await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn session_against(server: &MockServer, max_reconnects: usize) -> HttpEventStream {
        let http = HttpClient::builder()
            .max_attempts(1)
            .backoff(BackoffStrategy::Fixed(Duration::from_millis(1)))
            .build()
            .expect("http client");
        let url = format!("{}/events", server.uri());
        let seed = connect_stream(&http, &format!("{}/seed", server.uri()), None, Uuid::new_v4())
            .await
            .expect("seed stream");
        let mut stream =
            HttpEventStream::new(http, url, None, Uuid::new_v4(), seed, max_reconnects);
        stream.backoff = BackoffStrategy::Fixed(Duration::from_millis(1));
        stream
    }

    async fn mount_seed(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/seed"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn reconnect_spends_budget_across_failed_attempts_until_success() {
        let server = MockServer::start().await;
        mount_seed(&server).await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_string("event: ping\ndata: {}\n\n"))
            .expect(1)
            .mount(&server)
            .await;

        let mut stream = session_against(&server, 3).await;
        stream.response = None; // the previous connection is gone

        stream.reconnect().await.expect("third attempt should connect");
        assert_eq!(stream.reconnects_left, 0);
        assert_eq!(stream.next_line().await.unwrap().as_deref(), Some("event: ping"));
    }

    #[tokio::test]
    async fn reconnect_fails_terminally_only_after_budget_is_exhausted() {
        let server = MockServer::start().await;
        mount_seed(&server).await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let mut stream = session_against(&server, 2).await;
        stream.response = None;

        let err = stream.reconnect().await.expect_err("budget of 2 should exhaust");
        assert!(matches!(err, ScanError::StreamConnection(_)));
        assert_eq!(stream.reconnects_left, 0);
    }

    #[tokio::test]
    async fn reconnect_discards_the_partial_line_from_the_dead_connection() {
        let server = MockServer::start().await;
        mount_seed(&server).await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_string("event: ping\ndata: {}\n\n"))
            .mount(&server)
            .await;

        let mut stream = session_against(&server, 1).await;
        stream.response = None;
        stream.buffer.extend_from_slice(b"data: {\"trunc");

        stream.reconnect().await.expect("reconnect");
        assert!(stream.buffer.is_empty());
        assert_eq!(stream.next_line().await.unwrap().as_deref(), Some("event: ping"));
    }
}
