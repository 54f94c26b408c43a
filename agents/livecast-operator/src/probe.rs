//! Reachability of the Livecast API, told apart from a dead local network.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP client setup failed: {0}")]
    Client(String),
    #[error("health check returned HTTP {0}")]
    Status(u16),
    #[error("health check failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    /// The network works but the API does not answer properly.
    ServiceDown,
    NetworkDown,
}

impl Connectivity {
    /// Status reports can reach the API, or at least fail on its side.
    pub fn allows_reporting(&self) -> bool {
        !matches!(self, Connectivity::NetworkDown)
    }
}

pub struct HealthProbe {
    client: reqwest::Client,
    health_url: String,
    reference_url: Option<String>,
}

impl HealthProbe {
    /// `reference_url` is any well-known endpoint used to tell an API outage
    /// from a local network outage.
    pub fn new(
        api_url: &str,
        reference_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;
        Ok(Self {
            client,
            health_url: format!("{}/health", api_url.trim_end_matches('/')),
            reference_url,
        })
    }

    /// Time for one successful `HEAD /health`.
    pub async fn round_trip(&self) -> Result<Duration, ProbeError> {
        let started = Instant::now();
        let response = self
            .client
            .head(&self.health_url)
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status().as_u16()));
        }
        Ok(started.elapsed())
    }

    pub async fn check(&self) -> Connectivity {
        match self.client.head(&self.health_url).send().await {
            Ok(response) if response.status().is_success() => Connectivity::Online,
            Ok(response) => {
                tracing::debug!(status = response.status().as_u16(), "Health check failed");
                Connectivity::ServiceDown
            }
            Err(e) => {
                tracing::debug!(error = %e, "Health check unreachable");
                match &self.reference_url {
                    Some(reference) if self.client.head(reference).send().await.is_ok() => {
                        Connectivity::ServiceDown
                    }
                    _ => Connectivity::NetworkDown,
                }
            }
        }
    }
}

/// Polls a [`HealthProbe`] keeping at most one request in flight; starting
/// a poll aborts the previous one.
pub struct ConnectivityMonitor {
    probe: Arc<HealthProbe>,
    state: watch::Sender<Option<Connectivity>>,
    inflight: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<HealthProbe>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            probe,
            state,
            inflight: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<Connectivity> {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Connectivity>> {
        self.state.subscribe()
    }

    pub fn poll(&self) {
        let probe = Arc::clone(&self.probe);
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            let result = probe.check().await;
            state.send_if_modified(|current| {
                if *current == Some(result) {
                    return false;
                }
                tracing::info!(?result, "Connectivity changed");
                *current = Some(result);
                true
            });
        });
        if let Some(previous) = self.inflight.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn spawn_polling(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => monitor.poll(),
                }
            }
            if let Some(task) = monitor.inflight.lock().take() {
                task.abort();
            }
        })
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.inflight.get_mut().take() {
            task.abort();
        }
    }
}
