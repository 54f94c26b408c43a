//! Publisher session lifecycle for one camera operator.
//!
//! All state changes go through [`ConnectionState::reduce`]. Resources of a
//! connect attempt (local media, room session, event pump) live in one slot
//! tagged with a generation number; whoever bumps the generation owns the
//! cleanup, so every exit path releases them exactly once.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::media::{LocalMedia, LocalTrack, MediaAcquirer, MediaError, TrackKind};
use crate::network::NetworkQualitySampler;
use crate::reporter::{CameraStatus, StatusSink, StreamQualityReport};
use crate::retry::{RetryExecutor, RetryPolicy, Retryable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    PermissionDenied,
    DeviceNotFound,
    DeviceBusy,
    TransportUnreachable,
    TokenInvalid,
    Timeout,
    Unknown,
}

impl From<&MediaError> for FailureReason {
    fn from(err: &MediaError) -> Self {
        match err {
            MediaError::PermissionDenied => FailureReason::PermissionDenied,
            MediaError::DeviceNotFound => FailureReason::DeviceNotFound,
            MediaError::DeviceBusy => FailureReason::DeviceBusy,
            MediaError::Cancelled | MediaError::Other(_) => FailureReason::Unknown,
        }
    }
}

impl From<&TransportError> for FailureReason {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Unreachable(_) => FailureReason::TransportUnreachable,
            TransportError::Timeout => FailureReason::Timeout,
            TransportError::TokenInvalid => FailureReason::TokenInvalid,
            TransportError::Disconnected(reason) => reason.failure_reason(),
            TransportError::Cancelled => FailureReason::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    AcquiringMedia,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Failed(FailureReason),
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed(_))
    }

    /// A session is being set up or is up; `connect` is a no-op here.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConnectionState::AcquiringMedia
                | ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting
        )
    }

    /// Transitions that make no sense in the current state are ignored.
    pub fn reduce(self, transition: Transition) -> ConnectionState {
        use ConnectionState::*;

        match (self, transition) {
            (_, Transition::Fail(reason)) => Failed(reason),
            (Idle | Disconnected | Failed(_), Transition::Connect) => AcquiringMedia,
            (AcquiringMedia, Transition::MediaAcquired) => Connecting,
            (Connecting, Transition::Established) => Connected,
            (Connected, Transition::Reconnecting) => Reconnecting,
            (Reconnecting, Transition::Reconnected) => Connected,
            (AcquiringMedia | Connecting | Connected | Reconnecting, Transition::UserDisconnect) => {
                Disconnected
            }
            (Connecting | Connected | Reconnecting, Transition::TransportDisconnected(reason)) => {
                if reason == DisconnectReason::ClientInitiated {
                    Disconnected
                } else {
                    Failed(reason.failure_reason())
                }
            }
            (state, _) => state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connect,
    MediaAcquired,
    Established,
    Reconnecting,
    Reconnected,
    TransportDisconnected(DisconnectReason),
    UserDisconnect,
    Fail(FailureReason),
}

/// SFU disconnect reasons, numbered like the LiveKit signalling protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientInitiated,
    DuplicateIdentity,
    ServerShutdown,
    ParticipantRemoved,
    RoomDeleted,
    StateMismatch,
    JoinFailure,
    SignalClose,
    Unknown(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectCategory {
    Network,
    Auth,
    Unknown,
}

impl DisconnectReason {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => DisconnectReason::ClientInitiated,
            2 => DisconnectReason::DuplicateIdentity,
            3 => DisconnectReason::ServerShutdown,
            4 => DisconnectReason::ParticipantRemoved,
            5 => DisconnectReason::RoomDeleted,
            6 => DisconnectReason::StateMismatch,
            7 => DisconnectReason::JoinFailure,
            9 => DisconnectReason::SignalClose,
            other => DisconnectReason::Unknown(other),
        }
    }

    pub fn category(&self) -> DisconnectCategory {
        match self {
            DisconnectReason::DuplicateIdentity | DisconnectReason::ParticipantRemoved => {
                DisconnectCategory::Auth
            }
            DisconnectReason::ServerShutdown
            | DisconnectReason::StateMismatch
            | DisconnectReason::JoinFailure
            | DisconnectReason::SignalClose => DisconnectCategory::Network,
            DisconnectReason::ClientInitiated
            | DisconnectReason::RoomDeleted
            | DisconnectReason::Unknown(_) => DisconnectCategory::Unknown,
        }
    }

    pub fn failure_reason(&self) -> FailureReason {
        match self.category() {
            DisconnectCategory::Network => FailureReason::TransportUnreachable,
            DisconnectCategory::Auth => FailureReason::TokenInvalid,
            DisconnectCategory::Unknown => FailureReason::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Reconnecting,
    Reconnected,
    Disconnected(DisconnectReason),
    QualityChanged(ConnectionQuality),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("SFU unreachable: {0}")]
    Unreachable(String),
    #[error("SFU did not answer in time")]
    Timeout,
    #[error("room token rejected")]
    TokenInvalid,
    #[error("session dropped: {0:?}")]
    Disconnected(DisconnectReason),
    #[error("transport operation cancelled")]
    Cancelled,
}

impl Retryable for TransportError {
    fn is_permanent(&self) -> bool {
        matches!(self, TransportError::TokenInvalid | TransportError::Cancelled)
    }

    fn cancelled() -> Self {
        TransportError::Cancelled
    }
}

pub struct RoomConnection {
    pub session: Arc<dyn RoomSession>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait RoomTransport: Send + Sync + 'static {
    async fn connect(&self, token: &str, room: &str) -> Result<RoomConnection, TransportError>;
}

#[async_trait]
pub trait RoomSession: Send + Sync + 'static {
    async fn publish(&self, track: Arc<dyn LocalTrack>) -> Result<(), TransportError>;
    async fn set_muted(&self, kind: TrackKind, muted: bool) -> Result<(), TransportError>;
    async fn close(&self);
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Media(MediaError),
    #[error(transparent)]
    Transport(TransportError),
    #[error("connect cancelled")]
    Cancelled,
}

impl ConnectError {
    pub fn reason(&self) -> FailureReason {
        match self {
            ConnectError::Media(e) => e.into(),
            ConnectError::Transport(e) => e.into(),
            ConnectError::Cancelled => FailureReason::Unknown,
        }
    }
}

impl From<MediaError> for ConnectError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => ConnectError::Cancelled,
            other => ConnectError::Media(other),
        }
    }
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => ConnectError::Cancelled,
            other => ConnectError::Transport(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub connect: RetryPolicy,
    pub publish: RetryPolicy,
    /// Per handshake attempt.
    pub connect_timeout: Duration,
    pub codec: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect: RetryPolicy::CONNECT,
            publish: RetryPolicy::PUBLISH,
            connect_timeout: Duration::from_secs(15),
            codec: "VP8".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub state: ConnectionState,
    pub video_enabled: bool,
    pub audio_enabled: bool,
}

impl Snapshot {
    fn enabled(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Video => self.video_enabled,
            TrackKind::Audio => self.audio_enabled,
        }
    }

    fn set_enabled(&mut self, kind: TrackKind, enabled: bool) {
        match kind {
            TrackKind::Video => self.video_enabled = enabled,
            TrackKind::Audio => self.audio_enabled = enabled,
        }
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            video_enabled: true,
            audio_enabled: true,
        }
    }
}

#[derive(Default)]
struct Live {
    generation: u64,
    cancel: Option<CancellationToken>,
    media: Option<LocalMedia>,
    session: Option<Arc<dyn RoomSession>>,
    pump: Option<JoinHandle<()>>,
}

struct Resources {
    media: Option<LocalMedia>,
    session: Option<Arc<dyn RoomSession>>,
    pump: Option<JoinHandle<()>>,
}

impl Resources {
    fn take(live: &mut Live) -> Self {
        Self {
            media: live.media.take(),
            session: live.session.take(),
            pump: live.pump.take(),
        }
    }

    /// Stops local tracks now and hands the session close to the runtime,
    /// so the close completes even if the caller goes away.
    fn release_now(self) -> Option<JoinHandle<()>> {
        if let Some(pump) = self.pump {
            pump.abort();
        }
        if let Some(mut media) = self.media {
            media.release();
        }
        let session = self.session?;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(async move { session.close().await })),
            Err(_) => {
                tracing::warn!("No runtime to close the room session on");
                None
            }
        }
    }

    async fn release(self) {
        if let Some(close) = self.release_now() {
            let _ = close.await;
        }
    }
}

/// Owns the cleanup of one `connect` call until it settles. Dropping the
/// future early takes the same release path as a cancelled attempt.
struct AttemptGuard<'a> {
    shared: &'a Shared,
    generation: u64,
    pending: Option<Transition>,
    settled: bool,
}

impl<'a> AttemptGuard<'a> {
    fn new(shared: &'a Shared, generation: u64) -> Self {
        Self {
            shared,
            generation,
            pending: None,
            settled: false,
        }
    }

    async fn fail(mut self, error: &ConnectError) {
        if let Some(resources) = self.shared.detach(self.generation) {
            self.pending = Some(match error {
                ConnectError::Cancelled => Transition::UserDisconnect,
                other => Transition::Fail(other.reason()),
            });
            resources.release().await;
        }
        self.settle();
    }

    fn settle(&mut self) {
        self.settled = true;
        if let Some(transition) = self.pending.take() {
            self.shared.transition(transition);
        }
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.pending.is_some() {
            self.settle();
            return;
        }
        if let Some(resources) = self.shared.detach(self.generation) {
            tracing::info!("Connect abandoned, releasing");
            let _ = resources.release_now();
            self.shared.transition(Transition::UserDisconnect);
        }
    }
}

struct Shared {
    acquirer: MediaAcquirer,
    transport: Arc<dyn RoomTransport>,
    sampler: Arc<NetworkQualitySampler>,
    sink: Arc<dyn StatusSink>,
    config: ManagerConfig,
    authoritative: watch::Sender<Snapshot>,
    optimistic: watch::Sender<Snapshot>,
    quality: Mutex<Option<StreamQualityReport>>,
    live: Mutex<Live>,
}

impl Shared {
    fn publish_snapshot(&self, update: impl FnOnce(&mut Snapshot)) {
        self.authoritative.send_modify(update);
        let snapshot = *self.authoritative.borrow();
        self.optimistic.send_replace(snapshot);
    }

    /// Applies `transition` and emits the status report for the edge.
    fn transition(&self, transition: Transition) -> ConnectionState {
        let previous = self.authoritative.borrow().state;
        let next = previous.reduce(transition);
        if next == previous {
            return next;
        }

        self.publish_snapshot(|s| s.state = next);
        tracing::info!(from = ?previous, to = ?next, "Connection state changed");

        match next {
            ConnectionState::Connecting => self.sink.report(CameraStatus::Connecting, None),
            ConnectionState::Connected => {
                let quality = self.quality.lock().clone();
                self.sink.report(CameraStatus::Active, quality);
            }
            ConnectionState::Disconnected => self.sink.report(CameraStatus::Inactive, None),
            ConnectionState::Failed(_) => self.sink.report(CameraStatus::Error, None),
            _ => {}
        }
        next
    }

    /// Applies `transition` only while `generation` is still current.
    fn advance(&self, generation: u64, transition: Transition) -> Result<(), ConnectError> {
        let live = self.live.lock();
        if live.generation != generation {
            return Err(ConnectError::Cancelled);
        }
        self.transition(transition);
        Ok(())
    }

    /// Claims the attempt's resources and retires its generation.
    fn detach(&self, generation: u64) -> Option<Resources> {
        let mut live = self.live.lock();
        if live.generation != generation {
            return None;
        }
        live.generation += 1;
        if let Some(cancel) = live.cancel.take() {
            cancel.cancel();
        }
        Some(Resources::take(&mut live))
    }

    fn adopt_media(&self, generation: u64, media: LocalMedia) -> Result<(), ConnectError> {
        let mut live = self.live.lock();
        if live.generation != generation {
            // Dropping `media` stops the tracks
            return Err(ConnectError::Cancelled);
        }
        live.media = Some(media);
        self.publish_snapshot(|s| {
            s.video_enabled = true;
            s.audio_enabled = true;
        });
        self.transition(Transition::MediaAcquired);
        Ok(())
    }

    fn adopt_session(&self, generation: u64, session: &Arc<dyn RoomSession>) -> bool {
        let mut live = self.live.lock();
        if live.generation != generation {
            return false;
        }
        live.session = Some(Arc::clone(session));
        true
    }

    fn adopt_pump(&self, generation: u64, pump: JoinHandle<()>) -> Result<(), ConnectError> {
        let mut live = self.live.lock();
        if live.generation != generation {
            pump.abort();
            return Err(ConnectError::Cancelled);
        }
        live.pump = Some(pump);
        self.transition(Transition::Established);
        Ok(())
    }

    fn tracks(&self) -> Option<(Arc<dyn RoomSession>, [Arc<dyn LocalTrack>; 2])> {
        let live = self.live.lock();
        let media = live.media.as_ref()?;
        let session = live.session.clone()?;
        Some((session, [Arc::clone(media.video()), Arc::clone(media.audio())]))
    }
}

async fn pump_events(shared: Weak<Shared>, generation: u64, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        tracing::debug!(?event, "Transport event");

        match event {
            TransportEvent::Reconnecting => {
                if shared.advance(generation, Transition::Reconnecting).is_err() {
                    break;
                }
            }
            TransportEvent::Reconnected => {
                // Same local tracks are offered again
                if let Some((session, tracks)) = shared.tracks() {
                    for track in tracks {
                        if let Err(e) = session.publish(track).await {
                            tracing::warn!(error = %e, "Republishing track after reconnect failed");
                        }
                    }
                }
                if shared.advance(generation, Transition::Reconnected).is_err() {
                    break;
                }
                shared.sampler.sample().await;
            }
            TransportEvent::QualityChanged(quality) => {
                tracing::debug!(?quality, "Connection quality changed");
                shared.sampler.sample().await;
            }
            TransportEvent::Disconnected(reason) => {
                tracing::warn!(?reason, category = ?reason.category(), "Transport disconnected");
                if let Some(mut resources) = shared.detach(generation) {
                    // This task is the pump; let it finish on its own
                    resources.pump.take();
                    resources.release().await;
                    shared.transition(Transition::TransportDisconnected(reason));
                }
                break;
            }
        }
    }
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        acquirer: MediaAcquirer,
        transport: Arc<dyn RoomTransport>,
        sampler: Arc<NetworkQualitySampler>,
        sink: Arc<dyn StatusSink>,
        config: ManagerConfig,
    ) -> Self {
        let (authoritative, _) = watch::channel(Snapshot::default());
        let (optimistic, _) = watch::channel(Snapshot::default());
        Self {
            shared: Arc::new(Shared {
                acquirer,
                transport,
                sampler,
                sink,
                config,
                authoritative,
                optimistic,
                quality: Mutex::new(None),
                live: Mutex::new(Live::default()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.authoritative.borrow().state
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.shared.authoritative.borrow()
    }

    /// What the UI should show; may run ahead of [`Self::snapshot`] while a
    /// mute is being confirmed.
    pub fn optimistic_state(&self) -> Snapshot {
        *self.shared.optimistic.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.authoritative.subscribe()
    }

    pub fn subscribe_optimistic(&self) -> watch::Receiver<Snapshot> {
        self.shared.optimistic.subscribe()
    }

    /// Joins `room` and publishes one video and one audio track.
    ///
    /// Returns `Ok(())` without doing anything while a session is already
    /// being set up or running. On failure everything acquired so far is
    /// released before the state becomes `Failed`.
    pub async fn connect(&self, token: &str, room: &str) -> Result<(), ConnectError> {
        let (generation, cancel) = {
            let mut live = self.shared.live.lock();
            if self.state().is_busy() {
                tracing::debug!(state = ?self.state(), "Connect ignored, session already active");
                return Ok(());
            }
            live.generation += 1;
            let cancel = CancellationToken::new();
            live.cancel = Some(cancel.clone());
            self.shared.transition(Transition::Connect);
            (live.generation, cancel)
        };

        tracing::info!(room, "Connecting");
        let mut guard = AttemptGuard::new(&self.shared, generation);
        let result = self.establish(generation, &cancel, token, room).await;

        match &result {
            Ok(()) => guard.settle(),
            Err(e) => {
                guard.fail(e).await;
                match e {
                    ConnectError::Cancelled => tracing::info!("Connect cancelled"),
                    other => tracing::warn!(error = %other, reason = ?other.reason(), "Connect failed"),
                }
            }
        }
        result
    }

    async fn establish(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        token: &str,
        room: &str,
    ) -> Result<(), ConnectError> {
        let shared = &self.shared;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
            _ = shared.sampler.sample() => {}
        }
        let settings = shared.sampler.recommended();

        let media = shared.acquirer.acquire(settings, cancel).await?;
        let video = Arc::clone(media.video());
        let audio = Arc::clone(media.audio());
        shared.adopt_media(generation, media)?;

        let timeout = shared.config.connect_timeout;
        let connection = RetryExecutor::new("room_connect", shared.config.connect)
            .run(cancel, |attempt| {
                let transport = Arc::clone(&shared.transport);
                async move {
                    tracing::debug!(attempt = attempt + 1, "Room handshake");
                    tokio::time::timeout(timeout, transport.connect(token, room))
                        .await
                        .map_err(|_| TransportError::Timeout)?
                }
            })
            .await?;

        let RoomConnection { session, events } = connection;
        if !shared.adopt_session(generation, &session) {
            session.close().await;
            return Err(ConnectError::Cancelled);
        }

        let publisher = RetryExecutor::new("track_publish", shared.config.publish);
        for track in [video, audio] {
            publisher
                .run(cancel, |_| {
                    let session = Arc::clone(&session);
                    let track = Arc::clone(&track);
                    async move { session.publish(track).await }
                })
                .await?;
        }

        *shared.quality.lock() = Some(StreamQualityReport {
            resolution: Some(settings.resolution()),
            frame_rate: Some(settings.frame_rate),
            bitrate: Some(settings.bitrate),
            codec: Some(shared.config.codec.clone()),
        });

        let pump = tokio::spawn(pump_events(Arc::downgrade(shared), generation, events));
        shared.adopt_pump(generation, pump)?;
        tracing::info!(room, resolution = %settings.resolution(), "Connected");
        Ok(())
    }

    /// Leaves the room. An in-flight `connect` is cancelled and its
    /// resources released.
    pub async fn disconnect(&self) {
        let (cancel, resources) = {
            let mut live = self.shared.live.lock();
            if !self.state().is_busy() {
                return;
            }
            live.generation += 1;
            (live.cancel.take(), Resources::take(&mut live))
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        resources.release().await;
        self.shared.transition(Transition::UserDisconnect);
        tracing::info!("Disconnected");
    }

    pub async fn toggle_video(&self) -> bool {
        self.toggle(TrackKind::Video).await
    }

    pub async fn toggle_audio(&self) -> bool {
        self.toggle(TrackKind::Audio).await
    }

    /// Flips the track locally and signals the mute to the room. Returns the
    /// confirmed enabled flag.
    async fn toggle(&self, kind: TrackKind) -> bool {
        let (track, session) = {
            let live = self.shared.live.lock();
            let Some(media) = live.media.as_ref() else {
                return self.snapshot().enabled(kind);
            };
            let track = match kind {
                TrackKind::Video => Arc::clone(media.video()),
                TrackKind::Audio => Arc::clone(media.audio()),
            };
            (track, live.session.clone())
        };

        let current = self.snapshot().enabled(kind);
        let target = !current;
        self.shared.optimistic.send_modify(|s| s.set_enabled(kind, target));
        track.set_enabled(target);

        let confirmed = match session {
            Some(session) => match session.set_muted(kind, !target).await {
                Ok(()) => target,
                Err(e) => {
                    tracing::warn!(error = %e, ?kind, "Mute signal failed, reverting");
                    track.set_enabled(current);
                    current
                }
            },
            None => target,
        };
        self.shared.publish_snapshot(|s| s.set_enabled(kind, confirmed));
        confirmed
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let (cancel, resources) = {
            let mut live = self.shared.live.lock();
            live.generation += 1;
            (live.cancel.take(), Resources::take(&mut live))
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        let _ = resources.release_now();
    }
}
