use livecast_api::{build_router, state::AppState};
use livecast_config::{Settings, StorageBackend};
use livecast_db::{connect, indexes::ensure_indexes};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str =
    "livecast_api=debug,livecast_services=debug,livecast_db=debug,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (silently ignore if missing)
    dotenvy::dotenv().ok();

    // Load config before tracing so the log format can come from it
    let settings = Settings::load()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());
    if settings.log.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Livecast API on {}:{}", settings.app.host, settings.app.port);
    info!(
        backend = ?settings.storage.backend,
        sweep_secs = settings.aggregator.sweep_interval_secs,
        stale_secs = settings.aggregator.stale_after_secs,
        dwell_ms = settings.aggregator.min_switch_dwell_ms,
        "Aggregator config"
    );

    let app_state = match settings.storage.backend {
        StorageBackend::Mongo => {
            let db = connect(&settings).await?;
            ensure_indexes(&db).await?;
            AppState::new(db, settings.clone())
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage; state is lost on restart");
            AppState::in_memory(settings.clone())
        }
    };

    // Detects cameras that vanished without reporting
    let _sweeper = app_state.aggregator.spawn_sweeper();

    let app = build_router(app_state);

    let addr = format!("{}:{}", settings.app.host, settings.app.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
