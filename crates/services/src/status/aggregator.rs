use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bson::{DateTime, oid::ObjectId};
use dashmap::DashMap;
use livecast_config::AggregatorSettings;
use livecast_db::models::{CameraConnection, StreamStatus, SwitchEvent};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::channel::{StatusEventKind, StatusHub};
use crate::dao::DaoError;
use crate::store::{CameraStore, StatusStore};
use super::selector::SelectionPolicy;
use super::{AggregationError, health, selector};

/// Event channels with no subscribers and no traffic for this long are dropped.
const CHANNEL_IDLE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub sweep_interval: Duration,
    pub stale_after: Duration,
    pub min_switch_dwell: Duration,
    pub switch_history_len: usize,
    pub max_conflict_retries: u32,
    pub channel_idle: Duration,
}

impl From<&AggregatorSettings> for AggregatorConfig {
    fn from(settings: &AggregatorSettings) -> Self {
        Self {
            sweep_interval: Duration::from_secs(settings.sweep_interval_secs.max(1)),
            stale_after: Duration::from_secs(settings.stale_after_secs),
            min_switch_dwell: Duration::from_millis(settings.min_switch_dwell_ms),
            switch_history_len: settings.switch_history_len,
            max_conflict_retries: settings.max_conflict_retries,
            channel_idle: CHANNEL_IDLE,
        }
    }
}

/// Outcome of one recompute, before it is written.
#[derive(Debug, Clone)]
pub struct Derived {
    pub status: StreamStatus,
    pub switch: Option<SwitchEvent>,
    pub joined: Vec<ObjectId>,
    pub left: Vec<ObjectId>,
}

/// Builds the next status document from the event's camera rows.
pub fn derive_status(
    previous: &StreamStatus,
    cameras: &[CameraConnection],
    policy: &SelectionPolicy,
    history_len: usize,
    now: DateTime,
) -> Derived {
    let selection = selector::select(cameras, previous, policy, now);

    let mut active: Vec<ObjectId> = cameras
        .iter()
        .filter(|c| c.is_active())
        .filter_map(|c| c.id)
        .collect();
    active.sort();
    active.dedup();

    let joined: Vec<ObjectId> = active
        .iter()
        .filter(|id| !previous.active_cameras.contains(id))
        .copied()
        .collect();
    let left: Vec<ObjectId> = previous
        .active_cameras
        .iter()
        .filter(|id| active.binary_search(id).is_err())
        .copied()
        .collect();

    let current = selection
        .current
        .and_then(|id| cameras.iter().find(|c| c.id == Some(id)));

    let mut switch_history = previous.switch_history.clone();
    let mut last_switch_at = previous.last_switch_at;
    if let Some(switch) = &selection.switch {
        switch_history.push(switch.clone());
        let excess = switch_history.len().saturating_sub(history_len);
        switch_history.drain(..excess);
        last_switch_at = Some(switch.timestamp);
    }

    let status = StreamStatus {
        id: previous.id,
        event_id: previous.event_id,
        is_live: !active.is_empty(),
        active_camera_count: active.len() as u32,
        total_camera_count: cameras.len() as u32,
        current_active_camera: selection.current,
        active_cameras: active,
        pinned_camera: selection.pinned,
        stream_health: health::assess(current),
        last_switch_at,
        switch_history,
        revision: previous.revision + 1,
        updated_at: now,
    };

    Derived {
        status,
        switch: selection.switch,
        joined,
        left,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub stale: usize,
    pub recomputed: usize,
    pub pruned_channels: usize,
}

/// Folds camera rows into one `StreamStatus` per event.
pub struct StreamStatusAggregator {
    cameras: Arc<dyn CameraStore>,
    statuses: Arc<dyn StatusStore>,
    hub: Arc<StatusHub>,
    config: AggregatorConfig,
    locks: DashMap<ObjectId, Arc<Mutex<()>>>,
}

impl StreamStatusAggregator {
    pub fn new(
        cameras: Arc<dyn CameraStore>,
        statuses: Arc<dyn StatusStore>,
        hub: Arc<StatusHub>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            cameras,
            statuses,
            hub,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            min_dwell: self.config.min_switch_dwell,
        }
    }

    fn event_lock(&self, event_id: ObjectId) -> Arc<Mutex<()>> {
        self.locks.entry(event_id).or_default().clone()
    }

    /// Stored status, or the empty one if the event never went live.
    pub async fn status(&self, event_id: ObjectId) -> Result<StreamStatus, AggregationError> {
        Ok(self
            .statuses
            .get(event_id)
            .await?
            .unwrap_or_else(|| StreamStatus::empty(event_id)))
    }

    pub async fn recompute(&self, event_id: ObjectId) -> Result<StreamStatus, AggregationError> {
        self.recompute_at(event_id, DateTime::now()).await
    }

    pub async fn recompute_at(
        &self,
        event_id: ObjectId,
        now: DateTime,
    ) -> Result<StreamStatus, AggregationError> {
        let lock = self.event_lock(event_id);
        let _guard = lock.lock().await;
        self.write_status(event_id, None, now).await
    }

    /// Pins an active camera as the broadcast feed.
    pub async fn manual_switch(
        &self,
        event_id: ObjectId,
        camera_id: ObjectId,
    ) -> Result<StreamStatus, AggregationError> {
        let lock = self.event_lock(event_id);
        let _guard = lock.lock().await;

        let camera = self.cameras.find(event_id, camera_id).await?;
        if !camera.is_active() {
            return Err(AggregationError::CameraNotActive(camera_id));
        }
        tracing::info!(%event_id, %camera_id, "Director pinned camera");
        self.write_status(event_id, Some(camera_id), DateTime::now()).await
    }

    /// Read, derive, conditionally write. Retries when another writer got
    /// in between. Caller holds the event lock.
    async fn write_status(
        &self,
        event_id: ObjectId,
        pin: Option<ObjectId>,
        now: DateTime,
    ) -> Result<StreamStatus, AggregationError> {
        let policy = self.policy();
        for attempt in 0..=self.config.max_conflict_retries {
            let cameras = self.cameras.list_by_event(event_id).await?;
            let mut previous = self
                .statuses
                .get(event_id)
                .await?
                .unwrap_or_else(|| StreamStatus::empty(event_id));
            let expected = previous.revision;
            if pin.is_some() {
                previous.pinned_camera = pin;
            }

            let derived = derive_status(
                &previous,
                &cameras,
                &policy,
                self.config.switch_history_len,
                now,
            );

            match self.statuses.upsert(&derived.status, expected).await {
                Ok(()) => {
                    tracing::debug!(
                        %event_id,
                        revision = derived.status.revision,
                        active = derived.status.active_camera_count,
                        total = derived.status.total_camera_count,
                        "Stream status recomputed"
                    );
                    self.publish(&derived, &cameras);
                    return Ok(derived.status);
                }
                Err(DaoError::Conflict(reason)) => {
                    tracing::warn!(%event_id, attempt, %reason, "Status write conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AggregationError::ConcurrentWriteConflict)
    }

    fn publish(&self, derived: &Derived, cameras: &[CameraConnection]) {
        let event_id = derived.status.event_id;
        let find = |id: &ObjectId| cameras.iter().find(|c| c.id.as_ref() == Some(id));

        for id in &derived.joined {
            if let Some(camera) = find(id) {
                self.hub
                    .publish(event_id, StatusEventKind::CameraJoined, camera_payload(camera));
            }
        }
        for id in &derived.left {
            let payload = match find(id) {
                Some(camera) => camera_payload(camera),
                None => json!({ "cameraId": id.to_hex() }),
            };
            self.hub.publish(event_id, StatusEventKind::CameraLeft, payload);
        }
        if let Some(switch) = &derived.switch {
            tracing::info!(
                %event_id,
                to = %switch.to_camera,
                reason = ?switch.reason,
                "Active camera switched"
            );
            self.hub
                .publish(event_id, StatusEventKind::StreamSwitched, switch_payload(switch));
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, AggregationError> {
        self.sweep_at(DateTime::now()).await
    }

    /// Marks quiet cameras inactive and recomputes every affected or live
    /// event, which also applies switches deferred by the dwell.
    pub async fn sweep_at(&self, now: DateTime) -> Result<SweepReport, AggregationError> {
        let cutoff = DateTime::from_millis(
            now.timestamp_millis() - self.config.stale_after.as_millis() as i64,
        );
        let stale = self.cameras.mark_stale(cutoff, now).await?;
        for camera in &stale {
            tracing::info!(
                event_id = %camera.event_id,
                camera_id = %camera.camera_id,
                "Camera stopped reporting, marked inactive"
            );
        }

        let mut events: BTreeSet<ObjectId> = stale.iter().map(|c| c.event_id).collect();
        events.extend(self.statuses.live_event_ids().await?);

        let mut recomputed = 0;
        for event_id in events {
            match self.recompute_at(event_id, now).await {
                Ok(_) => recomputed += 1,
                Err(e) => tracing::error!(%event_id, error = %e, "Sweep recompute failed"),
            }
        }

        let pruned_channels = self.hub.prune_idle(self.config.channel_idle);
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        Ok(SweepReport {
            stale: stale.len(),
            recomputed,
            pruned_channels,
        })
    }

    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            tracing::info!(interval_secs = period.as_secs(), "Status sweeper started");
            loop {
                ticker.tick().await;
                match aggregator.sweep().await {
                    Ok(report) if report.stale > 0 => {
                        tracing::info!(?report, "Sweep finished");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Sweep failed"),
                }
            }
        })
    }
}

fn camera_payload(camera: &CameraConnection) -> serde_json::Value {
    json!({
        "cameraId": camera.id.map(|id| id.to_hex()),
        "participantId": camera.participant_id,
        "displayName": camera.display_name,
        "status": camera.status,
    })
}

fn switch_payload(switch: &SwitchEvent) -> serde_json::Value {
    json!({
        "fromCamera": switch.from_camera.map(|id| id.to_hex()),
        "toCamera": switch.to_camera.to_hex(),
        "reason": switch.reason,
        "timestamp": switch.timestamp.to_chrono().to_rfc3339(),
    })
}
