use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use livecast_operator::client::{ApiClient, DeviceInfo};
use livecast_operator::config::OperatorConfig;
use livecast_operator::network::{NetworkInfoSource, ProbeNetworkInfo, StaticNetworkInfo};
use livecast_operator::probe::{Connectivity, ConnectivityMonitor, HealthProbe};
use livecast_operator::{
    CameraStatus, CameraStatusReporter, EffectiveType, NetworkQuality, NetworkQualitySampler,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "livecast-operator", version, about = "Livecast camera operator agent")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, env = "LIVECAST_API_URL")]
    api_url: Option<String>,
    /// Camera token issued for the event
    #[arg(long, global = true, env = "LIVECAST_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[arg(long = "event", global = true)]
    event_id: Option<String>,
    #[arg(long = "camera", global = true)]
    camera_id: Option<String>,
    /// Assume this network class instead of probing
    #[arg(long, global = true)]
    network: Option<EffectiveType>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check API reachability and the network class
    Probe,
    /// Register a camera for the event and print its id
    Join {
        #[arg(long)]
        name: Option<String>,
    },
    /// Send a single status update for a camera
    Report {
        #[arg(value_enum)]
        status: StatusArg,
    },
    /// Print the event's stream status
    Status,
    /// Join and keep the camera registered until Ctrl-C. Status only:
    /// media is published by the app embedding the connection manager
    Run {
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Connecting,
    Active,
    Inactive,
    Error,
}

impl From<StatusArg> for CameraStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Connecting => CameraStatus::Connecting,
            StatusArg::Active => CameraStatus::Active,
            StatusArg::Inactive => CameraStatus::Inactive,
            StatusArg::Error => CameraStatus::Error,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "livecast_operator=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = OperatorConfig::load(cli.config.as_deref())?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    config.token = cli.token.or(config.token);
    config.event_id = cli.event_id.or(config.event_id);
    config.camera_id = cli.camera_id.or(config.camera_id);
    config.network = cli.network.or(config.network);

    match cli.command {
        Command::Probe => probe(&config).await,
        Command::Join { name } => {
            let client = ApiClient::new(&config.api_url, config.require_token()?);
            let name = name.or_else(|| config.display_name.clone());
            let camera = client
                .join(config.require_event()?, name.as_deref(), &DeviceInfo::local())
                .await?;
            println!("{}", camera.id);
            Ok(())
        }
        Command::Report { status } => {
            let client = ApiClient::new(&config.api_url, config.require_token()?);
            let camera_id = config.camera_id.as_deref().context("no camera; pass --camera")?;
            let endpoint = Arc::new(client.status_endpoint(config.require_event()?, camera_id));
            let reporter = CameraStatusReporter::spawn(endpoint, config.reporter());
            reporter.report(status.into(), None);
            reporter.shutdown().await;
            Ok(())
        }
        Command::Status => {
            let client = ApiClient::new(&config.api_url, config.token.clone().unwrap_or_default());
            let status = client.status(config.require_event()?).await?;
            println!(
                "live={} active={}/{} current={} health={}",
                status.is_live,
                status.active_camera_count,
                status.total_camera_count,
                status.current_active_camera.as_deref().unwrap_or("-"),
                status.stream_health
            );
            Ok(())
        }
        Command::Run { name } => run(&config, name).await,
    }
}

fn sampler_for(config: &OperatorConfig, probe: Arc<HealthProbe>) -> Arc<NetworkQualitySampler> {
    let source: Arc<dyn NetworkInfoSource> = match config.network {
        Some(effective_type) => Arc::new(StaticNetworkInfo(NetworkQuality {
            effective_type,
            save_data: config.save_data,
            ..NetworkQuality::default()
        })),
        None => Arc::new(ProbeNetworkInfo::new(probe, config.save_data)),
    };
    Arc::new(NetworkQualitySampler::new(source))
}

fn health_probe(config: &OperatorConfig) -> anyhow::Result<Arc<HealthProbe>> {
    Ok(Arc::new(HealthProbe::new(
        &config.api_url,
        config.reference_url.clone(),
        Duration::from_secs(config.probe_timeout_secs),
    )?))
}

async fn probe(config: &OperatorConfig) -> anyhow::Result<()> {
    let probe = health_probe(config)?;
    let connectivity = probe.check().await;
    let sampler = sampler_for(config, probe);
    let quality = sampler.sample().await;
    let settings = sampler.recommended();
    println!(
        "connectivity={connectivity:?} network={} rtt={} capture={}@{}fps {}kbps",
        quality.effective_type,
        quality.rtt.map(|ms| format!("{ms}ms")).unwrap_or_else(|| "-".to_string()),
        settings.resolution(),
        settings.frame_rate,
        settings.bitrate
    );
    Ok(())
}

async fn run(config: &OperatorConfig, name: Option<String>) -> anyhow::Result<()> {
    let event_id = config.require_event()?;
    let client = ApiClient::new(&config.api_url, config.require_token()?);
    let probe = health_probe(config)?;
    let sampler = sampler_for(config, Arc::clone(&probe));
    let cancel = CancellationToken::new();

    let name = name.or_else(|| config.display_name.clone());
    let camera = client.join(event_id, name.as_deref(), &DeviceInfo::local()).await?;
    let reporter = CameraStatusReporter::spawn(
        Arc::new(client.status_endpoint(event_id, &camera.id)),
        config.reporter(),
    );
    reporter.report(CameraStatus::Connecting, None);

    let quality = sampler.sample().await;
    let settings = sampler.recommended();
    tracing::info!(
        camera_id = %camera.id,
        network = %quality.effective_type,
        recommended = %settings.resolution(),
        "Camera registered, sending status keepalives only"
    );

    let every = Duration::from_secs(config.probe_interval_secs.max(1));
    let monitor = Arc::new(ConnectivityMonitor::new(probe));
    let mut connectivity = monitor.subscribe();
    let polling = monitor.spawn_polling(every, cancel.clone());
    let sampling = sampler.spawn_monitor(every, cancel.clone());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "Ctrl-C handler failed");
                }
                break;
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(state) = *connectivity.borrow_and_update() else {
                    continue;
                };
                match state {
                    Connectivity::Online => tracing::info!("Livecast API reachable"),
                    Connectivity::ServiceDown => {
                        tracing::warn!("Livecast API not answering, reports will keep retrying")
                    }
                    Connectivity::NetworkDown => {
                        tracing::warn!("Local network down, holding keepalives")
                    }
                }
                reporter.set_paused(!state.allows_reporting());
            }
        }
    }
    tracing::info!("Shutting down");

    cancel.cancel();
    let _ = tokio::join!(polling, sampling);
    reporter.set_paused(false);
    reporter.report(CameraStatus::Inactive, None);
    reporter.shutdown().await;
    Ok(())
}
