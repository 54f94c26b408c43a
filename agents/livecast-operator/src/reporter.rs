//! Pushes the camera's status to the API.
//!
//! Reports go through a `watch` channel so only the latest one matters;
//! a background task waits out the debounce window, PUTs the result and
//! repeats it as a keepalive while the camera is live.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::retry::{RetryExecutor, RetryPolicy, Retryable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    Connecting,
    Active,
    Inactive,
    Error,
}

impl CameraStatus {
    /// The server expects keepalives in these states.
    pub fn is_live(&self) -> bool {
        matches!(self, CameraStatus::Connecting | CameraStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamQualityReport {
    pub resolution: Option<String>,
    pub frame_rate: Option<u32>,
    pub bitrate: Option<u32>,
    pub codec: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: CameraStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_quality: Option<StreamQualityReport>,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("status rejected with HTTP {0}")]
    Rejected(u16),
    #[error("status request failed: {0}")]
    Transport(String),
    #[error("status report cancelled")]
    Cancelled,
}

impl Retryable for ReportError {
    fn is_permanent(&self) -> bool {
        match self {
            // Timeouts and throttling are worth another try
            ReportError::Rejected(code) => (400..500).contains(code) && *code != 408 && *code != 429,
            ReportError::Transport(_) => false,
            ReportError::Cancelled => true,
        }
    }

    fn cancelled() -> Self {
        ReportError::Cancelled
    }
}

/// Fire-and-forget status seam used by the connection manager.
pub trait StatusSink: Send + Sync + 'static {
    fn report(&self, status: CameraStatus, quality: Option<StreamQualityReport>);
}

#[async_trait]
pub trait StatusEndpoint: Send + Sync + 'static {
    async fn put_status(&self, report: &StatusReport) -> Result<(), ReportError>;
}

/// `PUT /api/events/{event}/cameras/{camera}/status` with a camera token.
pub struct HttpStatusEndpoint {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpStatusEndpoint {
    pub fn new(client: reqwest::Client, api_url: &str, event_id: &str, camera_id: &str, token: String) -> Self {
        Self {
            client,
            url: format!(
                "{}/api/events/{event_id}/cameras/{camera_id}/status",
                api_url.trim_end_matches('/')
            ),
            token,
        }
    }
}

#[async_trait]
impl StatusEndpoint for HttpStatusEndpoint {
    async fn put_status(&self, report: &StatusReport) -> Result<(), ReportError> {
        let response = self
            .client
            .put(&self.url)
            .bearer_auth(&self.token)
            .json(report)
            .send()
            .await
            .map_err(|e| ReportError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ReportError::Rejected(response.status().as_u16()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub debounce: Duration,
    pub keepalive: Duration,
    pub retry: RetryPolicy,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(750),
            keepalive: Duration::from_secs(10),
            retry: RetryPolicy::REPORT,
        }
    }
}

pub struct CameraStatusReporter {
    latest: watch::Sender<Option<StatusReport>>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CameraStatusReporter {
    pub fn spawn(endpoint: Arc<dyn StatusEndpoint>, config: ReporterConfig) -> Self {
        let (latest, rx) = watch::channel(None);
        let (paused, paused_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let worker = Worker {
            endpoint,
            retry: RetryExecutor::new("status_report", config.retry),
            config,
            cancel: cancel.clone(),
            last_sent: None,
        };
        let task = tokio::spawn(worker.run(rx, paused_rx));
        Self {
            latest,
            paused,
            cancel,
            task: Some(task),
        }
    }

    /// Queues `status`; replaces anything not yet sent.
    pub fn report(&self, status: CameraStatus, stream_quality: Option<StreamQualityReport>) {
        self.latest.send_replace(Some(StatusReport {
            status,
            stream_quality,
        }));
    }

    /// Suspends keepalives, e.g. while the local network is down. Status
    /// transitions are still sent. Resuming re-sends a live status at once.
    pub fn set_paused(&self, paused: bool) {
        self.paused.send_if_modified(|current| {
            let changed = *current != paused;
            *current = paused;
            changed
        });
    }

    /// Sends anything still pending once, then stops the worker.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Status reporter task failed");
            }
        }
    }
}

impl StatusSink for CameraStatusReporter {
    fn report(&self, status: CameraStatus, quality: Option<StreamQualityReport>) {
        CameraStatusReporter::report(self, status, quality);
    }
}

impl Drop for CameraStatusReporter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    endpoint: Arc<dyn StatusEndpoint>,
    retry: RetryExecutor,
    config: ReporterConfig,
    cancel: CancellationToken,
    last_sent: Option<StatusReport>,
}

impl Worker {
    async fn run(
        mut self,
        mut rx: watch::Receiver<Option<StatusReport>>,
        mut paused: watch::Receiver<bool>,
    ) {
        loop {
            let keepalive_due = !*paused.borrow()
                && self.last_sent.as_ref().is_some_and(|r| r.status.is_live());
            let keepalive = self.config.keepalive;

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.flush(&mut rx).await;
                    break;
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // Let rapid transitions settle, then send only the last one
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.flush(&mut rx).await;
                            break;
                        }
                        _ = tokio::time::sleep(self.config.debounce) => {}
                    }
                    let pending = rx.borrow_and_update().clone();
                    if let Some(report) = pending {
                        if self.last_sent.as_ref() != Some(&report) {
                            self.send(report).await;
                        }
                    }
                }
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let resumed = !*paused.borrow_and_update();
                    match self.last_sent.clone() {
                        Some(report) if resumed && report.status.is_live() => {
                            tracing::debug!("Keepalives resumed");
                            self.send(report).await;
                        }
                        _ => tracing::debug!(paused = !resumed, "Keepalive pause changed"),
                    }
                }
                _ = tokio::time::sleep(keepalive), if keepalive_due => {
                    if let Some(report) = self.last_sent.clone() {
                        tracing::trace!(status = ?report.status, "Status keepalive");
                        self.send(report).await;
                    }
                }
            }
        }
    }

    async fn flush(&mut self, rx: &mut watch::Receiver<Option<StatusReport>>) {
        let pending = rx.borrow_and_update().clone();
        if let Some(report) = pending {
            if self.last_sent.as_ref() != Some(&report) {
                if let Err(e) = self.endpoint.put_status(&report).await {
                    tracing::warn!(error = %e, status = ?report.status, "Final status report failed");
                }
            }
        }
    }

    async fn send(&mut self, report: StatusReport) {
        let endpoint = Arc::clone(&self.endpoint);
        let result = self
            .retry
            .run(&self.cancel, |_| {
                let endpoint = Arc::clone(&endpoint);
                let report = report.clone();
                async move { endpoint.put_status(&report).await }
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(status = ?report.status, "Status reported");
            }
            Err(e) => {
                // Swallowed; the next keepalive or transition tries again
                tracing::warn!(error = %e, status = ?report.status, "Status report dropped");
            }
        }
        // Recorded even on failure so keepalives keep trying
        self.last_sent = Some(report);
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct RecordingSink {
        pub reports: Mutex<Vec<(CameraStatus, Option<StreamQualityReport>)>>,
    }

    impl RecordingSink {
        pub fn statuses(&self) -> Vec<CameraStatus> {
            self.reports.lock().iter().map(|(s, _)| *s).collect()
        }
    }

    impl StatusSink for RecordingSink {
        fn report(&self, status: CameraStatus, quality: Option<StreamQualityReport>) {
            self.reports.lock().push((status, quality));
        }
    }
}
