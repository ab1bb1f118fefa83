//! Background reachability monitor.
//!
//! Polls a cheap endpoint on the recognition service and exposes the last
//! observed result through the [`ConnectivityProbe`] port. The probe read
//! is synchronous and lock-free, so the orchestrator can consult it on
//! every submission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::Method;
use scanstream_core::ConnectivityProbe;
use scanstream_domain::{Result, ScanError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::http::HttpClient;

/// Polls `health_url` and remembers whether the service answered.
pub struct ConnectivityMonitor {
    online: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    /// Start polling. The monitor assumes it is online until the first
    /// probe says otherwise, so startup submissions are not queued for no
    /// reason.
    pub fn start(health_url: String, interval: Duration) -> Result<Arc<Self>> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(5))
            .max_attempts(1)
            .build()
            .map_err(|e| ScanError::Config(e.to_string()))?;

        let online = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&online);

        let handle = tokio::spawn(async move {
            loop {
                // Any HTTP answer proves the network path; only transport
                // failures count as offline.
                let reachable = http.send(http.request(Method::GET, &health_url)).await.is_ok();
                let was = flag.swap(reachable, Ordering::SeqCst);
                if was != reachable {
                    info!(reachable, "connectivity changed");
                } else {
                    debug!(reachable, "connectivity probe");
                }
                tokio::time::sleep(interval).await;
            }
        });

        Ok(Arc::new(Self { online, handle: Mutex::new(Some(handle)) }))
    }

    /// Stop polling. The last observed state keeps being reported.
    pub fn stop(&self) {
        if let Some(handle) =
            self.handle.lock().unwrap_or_else(PoisonError::into_inner).take()
        {
            handle.abort();
        }
    }
}

impl ConnectivityProbe for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn reports_offline_when_probe_fails_then_recovers() {
        let server = MockServer::start().await;
        let monitor = ConnectivityMonitor::start(
            format!("{}/health", server.uri()),
            Duration::from_millis(20),
        )
        .unwrap();

        // No mock mounted yet: wiremock answers 404, which still proves the
        // network path works.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(monitor.is_online());

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(monitor.is_online());

        monitor.stop();
    }

    #[tokio::test]
    async fn reports_offline_when_nothing_listens() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let monitor =
            ConnectivityMonitor::start(format!("http://{addr}/health"), Duration::from_millis(20))
                .unwrap();

        let mut observed_offline = false;
        for _ in 0..50 {
            if !monitor.is_online() {
                observed_offline = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(observed_offline);
    }
}
