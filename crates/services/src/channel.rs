//! Per-event fan-out of status changes to SSE subscribers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bson::oid::ObjectId;
use dashmap::DashMap;
use livecast_config::ChannelSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Too many subscribers for this event (max {0})")]
    SubscriberOverflow(usize),
    #[error("Status stream closed")]
    StreamClosed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StatusEventKind {
    CameraJoined,
    CameraLeft,
    StreamSwitched,
    Heartbeat,
}

impl StatusEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CameraJoined => "camera-joined",
            Self::CameraLeft => "camera-left",
            Self::StreamSwitched => "stream-switched",
            Self::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusMessage {
    /// Position in the event's stream. Heartbeats carry none.
    #[serde(skip)]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: StatusEventKind,
    pub payload: serde_json::Value,
}

impl StatusMessage {
    pub fn heartbeat(payload: serde_json::Value) -> Self {
        Self {
            id: None,
            kind: StatusEventKind::Heartbeat,
            payload,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub max_subscribers: usize,
    pub backlog_len: usize,
    pub buffer: usize,
}

impl From<&ChannelSettings> for ChannelConfig {
    fn from(settings: &ChannelSettings) -> Self {
        Self {
            max_subscribers: settings.max_subscribers_per_event,
            backlog_len: settings.backlog_len,
            buffer: settings.buffer.max(1),
        }
    }
}

struct Backlog {
    next_id: u64,
    messages: VecDeque<StatusMessage>,
}

struct EventChannel {
    tx: broadcast::Sender<StatusMessage>,
    subscribers: AtomicUsize,
    backlog: Mutex<Backlog>,
    last_activity: Mutex<Instant>,
}

impl EventChannel {
    fn new(config: &ChannelConfig) -> Self {
        let (tx, _) = broadcast::channel(config.buffer);
        Self {
            tx,
            subscribers: AtomicUsize::new(0),
            backlog: Mutex::new(Backlog {
                next_id: 1,
                messages: VecDeque::with_capacity(config.backlog_len),
            }),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn try_reserve(&self, max: usize) -> bool {
        self.subscribers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }
}

/// Holds one broadcast channel per event. Messages get monotonic ids and
/// the last `backlog_len` are kept for `Last-Event-ID` resumption.
pub struct StatusHub {
    channels: DashMap<ObjectId, Arc<EventChannel>>,
    config: ChannelConfig,
}

impl StatusHub {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            channels: DashMap::new(),
            config,
        }
    }

    pub fn publish(
        &self,
        event_id: ObjectId,
        kind: StatusEventKind,
        payload: serde_json::Value,
    ) -> u64 {
        let channel = self
            .channels
            .entry(event_id)
            .or_insert_with(|| Arc::new(EventChannel::new(&self.config)))
            .clone();

        // Id assignment, backlog push and send happen under one lock so a
        // concurrent subscribe sees each message exactly once.
        let mut backlog = channel.backlog.lock();
        let id = backlog.next_id;
        backlog.next_id += 1;
        let message = StatusMessage {
            id: Some(id),
            kind,
            payload,
        };
        if self.config.backlog_len > 0 {
            if backlog.messages.len() == self.config.backlog_len {
                backlog.messages.pop_front();
            }
            backlog.messages.push_back(message.clone());
        }
        let delivered = channel.tx.send(message).unwrap_or(0);
        drop(backlog);
        channel.touch();

        tracing::debug!(%event_id, id, kind = kind.as_str(), delivered, "Status message published");
        id
    }

    /// Registers a subscriber. With `last_event_id`, backlog entries newer
    /// than it are replayed before live messages.
    pub fn subscribe(
        &self,
        event_id: ObjectId,
        last_event_id: Option<u64>,
    ) -> Result<Subscription, ChannelError> {
        let max = self.config.max_subscribers;
        let channel = {
            // Reserve while holding the entry so pruning can't drop the
            // channel between lookup and registration.
            let entry = self
                .channels
                .entry(event_id)
                .or_insert_with(|| Arc::new(EventChannel::new(&self.config)));
            if !entry.try_reserve(max) {
                tracing::warn!(%event_id, max, "Subscriber limit reached");
                return Err(ChannelError::SubscriberOverflow(max));
            }
            entry.value().clone()
        };

        let (rx, replay) = {
            let backlog = channel.backlog.lock();
            let replay: VecDeque<StatusMessage> = match last_event_id {
                Some(last) => backlog
                    .messages
                    .iter()
                    .filter(|m| m.id.is_some_and(|id| id > last))
                    .cloned()
                    .collect(),
                None => VecDeque::new(),
            };
            (channel.tx.subscribe(), replay)
        };
        channel.touch();

        tracing::debug!(
            %event_id,
            replayed = replay.len(),
            subscribers = channel.subscribers.load(Ordering::Acquire),
            "Status subscriber added"
        );

        Ok(Subscription {
            event_id,
            channel,
            rx,
            replay,
        })
    }

    pub fn subscriber_count(&self, event_id: &ObjectId) -> usize {
        self.channels
            .get(event_id)
            .map(|c| c.subscribers.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Drops channels with no subscribers and no traffic for `idle`.
    pub fn prune_idle(&self, idle: Duration) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, channel| {
            channel.subscribers.load(Ordering::Acquire) > 0
                || channel.last_activity.lock().elapsed() < idle
        });
        let pruned = before.saturating_sub(self.channels.len());
        if pruned > 0 {
            tracing::debug!(pruned, "Idle status channels pruned");
        }
        pruned
    }
}

/// A registered subscriber. Dropping it releases the slot.
pub struct Subscription {
    event_id: ObjectId,
    channel: Arc<EventChannel>,
    rx: broadcast::Receiver<StatusMessage>,
    replay: VecDeque<StatusMessage>,
}

impl Subscription {
    pub fn event_id(&self) -> ObjectId {
        self.event_id
    }

    /// Next message, replayed backlog first. A lagging receiver gets
    /// `StreamClosed` and is expected to reconnect.
    pub async fn next(&mut self) -> Result<StatusMessage, ChannelError> {
        if let Some(message) = self.replay.pop_front() {
            return Ok(message);
        }
        match self.rx.recv().await {
            Ok(message) => Ok(message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(event_id = %self.event_id, skipped, "Status subscriber lagged");
                Err(ChannelError::StreamClosed)
            }
            Err(broadcast::error::RecvError::Closed) => Err(ChannelError::StreamClosed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.subscribers.fetch_sub(1, Ordering::AcqRel);
        self.channel.touch();
        tracing::debug!(event_id = %self.event_id, "Status subscriber removed");
    }
}
