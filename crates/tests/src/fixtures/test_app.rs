use jsonwebtoken::{EncodingKey, Header, encode};
use livecast_api::{build_router, state::AppState};
use livecast_config::{
    AggregatorSettings, AppSettings, AuthSettings, ChannelSettings, DatabaseSettings, LogSettings,
    Settings, StorageBackend, StorageSettings,
};
use livecast_db::indexes::ensure_indexes;
use mongodb::Database;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// A running API server on a random local port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub base_url: String,
    pub state: AppState,
    pub settings: Settings,
    pub client: reqwest::Client,
    db: Option<Database>,
}

impl TestApp {
    /// Spawn a server backed by the in-memory stores.
    pub async fn spawn() -> Self {
        Self::spawn_with_settings(|_| {}).await
    }

    /// Spawn an in-memory server after letting `mutator` adjust the settings.
    pub async fn spawn_with_settings(mutator: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = test_settings();
        mutator(&mut settings);
        let state = AppState::in_memory(settings.clone());
        Self::serve(state, settings, None).await
    }

    /// Spawn a server connected to MongoDB, one database per test.
    ///
    /// Requires a running MongoDB at localhost:27019.
    /// Set LIVECAST__DATABASE__URL to override the connection string.
    pub async fn spawn_mongo() -> Self {
        let mut settings = test_settings();
        settings.storage.backend = StorageBackend::Mongo;
        settings.database.name = format!("livecast_test_{}", uuid::Uuid::new_v4().simple());
        if let Ok(url) = std::env::var("LIVECAST__DATABASE__URL") {
            settings.database.url = url;
        }

        let db = livecast_db::connect(&settings)
            .await
            .expect("Failed to connect to MongoDB");
        ensure_indexes(&db).await.expect("Failed to create indexes");

        let state = AppState::new(db.clone(), settings.clone());
        Self::serve(state, settings, Some(db)).await
    }

    async fn serve(state: AppState, settings: Settings, db: Option<Database>) -> Self {
        let app = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            base_url: format!("http://{}", addr),
            state,
            settings,
            client: reqwest::Client::new(),
            db,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Camera token as the participation service would issue it.
    pub fn mint_token(&self, participant_id: &str, event_id: &str, role: &str) -> String {
        self.mint_token_expiring(participant_id, event_id, role, 3600)
    }

    pub fn mint_token_expiring(
        &self,
        participant_id: &str,
        event_id: &str,
        role: &str,
        ttl_secs: i64,
    ) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = serde_json::json!({
            "sub": participant_id,
            "event_id": event_id,
            "role": role,
            "iat": now,
            "exp": now + ttl_secs,
            "iss": self.settings.auth.issuer,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.settings.auth.jwt_secret.as_bytes()),
        )
        .expect("Failed to mint token")
    }

    pub fn auth_get(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(token)
    }

    pub fn auth_post(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(token)
    }

    pub fn auth_put(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.client.put(self.url(path)).bearer_auth(token)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(db) = self.db.take() {
            // Best effort cleanup: drop the test database
            tokio::spawn(async move {
                let _ = db.drop().await;
            });
        }
    }
}

pub fn test_settings() -> Settings {
    Settings {
        app: AppSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec![],
        },
        database: DatabaseSettings {
            url: "mongodb://localhost:27019".to_string(),
            name: "livecast_test".to_string(),
            max_pool_size: Some(5),
            min_pool_size: Some(1),
        },
        storage: StorageSettings {
            backend: StorageBackend::Memory,
        },
        auth: AuthSettings {
            jwt_secret: "test-secret-key-for-camera-tokens".to_string(),
            issuer: "livecast".to_string(),
        },
        aggregator: AggregatorSettings {
            sweep_interval_secs: 10,
            stale_after_secs: 30,
            min_switch_dwell_ms: 0,
            switch_history_len: 10,
            max_conflict_retries: 3,
        },
        channel: ChannelSettings {
            heartbeat_secs: 15,
            max_subscribers_per_event: 8,
            backlog_len: 64,
            buffer: 64,
        },
        log: LogSettings { json: false },
    }
}
