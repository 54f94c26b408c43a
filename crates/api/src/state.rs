use livecast_config::Settings;
use livecast_services::{
    CameraStore, ChannelConfig, MemoryCameraStore, MemoryStatusStore, StatusHub, StatusStore,
    StreamStatusAggregator, TokenVerifier,
    dao::{CameraDao, StreamStatusDao},
};
use mongodb::Database;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub cameras: Arc<dyn CameraStore>,
    pub statuses: Arc<dyn StatusStore>,
    pub hub: Arc<StatusHub>,
    pub aggregator: Arc<StreamStatusAggregator>,
    pub verifier: Arc<TokenVerifier>,
}

impl AppState {
    /// State backed by MongoDB collections.
    pub fn new(db: Database, settings: Settings) -> Self {
        let cameras: Arc<dyn CameraStore> = Arc::new(CameraDao::new(&db));
        let statuses: Arc<dyn StatusStore> = Arc::new(StreamStatusDao::new(&db));
        Self::with_stores(settings, cameras, statuses)
    }

    /// State kept entirely in process. Used by tests and single-node demos.
    pub fn in_memory(settings: Settings) -> Self {
        Self::with_stores(
            settings,
            Arc::new(MemoryCameraStore::new()),
            Arc::new(MemoryStatusStore::new()),
        )
    }

    pub fn with_stores(
        settings: Settings,
        cameras: Arc<dyn CameraStore>,
        statuses: Arc<dyn StatusStore>,
    ) -> Self {
        let hub = Arc::new(StatusHub::new(ChannelConfig::from(&settings.channel)));
        let aggregator = Arc::new(StreamStatusAggregator::new(
            Arc::clone(&cameras),
            Arc::clone(&statuses),
            Arc::clone(&hub),
            (&settings.aggregator).into(),
        ));
        let verifier = Arc::new(TokenVerifier::new(&settings.auth));

        Self {
            settings,
            cameras,
            statuses,
            hub,
            aggregator,
            verifier,
        }
    }
}
