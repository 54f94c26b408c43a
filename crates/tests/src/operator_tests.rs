use std::sync::Arc;
use std::time::Duration;

use crate::fixtures::seed::new_event_id;
use crate::fixtures::test_app::TestApp;
use livecast_operator::client::{ApiClient, ClientError, DeviceInfo};
use livecast_operator::network::ProbeNetworkInfo;
use livecast_operator::probe::{Connectivity, ConnectivityMonitor, HealthProbe};
use livecast_operator::reporter::{ReportError, ReporterConfig, StatusEndpoint, StatusReport};
use livecast_operator::{
    CameraStatus, CameraStatusReporter, CaptureSettings, EffectiveType, NetworkQualitySampler,
    RetryPolicy, Retryable, StreamQualityReport,
};

fn fast_reporter() -> ReporterConfig {
    ReporterConfig {
        debounce: Duration::from_millis(50),
        keepalive: Duration::from_secs(10),
        retry: RetryPolicy::REPORT,
    }
}

async fn wait_until_live(client: &ApiClient, event_id: &str, live: bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = client.status(event_id).await.unwrap();
        if status.is_live == live {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "Event never became live={live}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

#[tokio::test]
async fn client_joins_and_reads_status() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let client = ApiClient::new(&app.base_url, app.mint_token("op-1", &event_id, "operator"));

    let camera = client
        .join(&event_id, Some("Balcony"), &DeviceInfo::local())
        .await
        .unwrap();
    assert_eq!(camera.status, CameraStatus::Connecting);
    assert_eq!(camera.participant_id, "op-1");
    assert_eq!(camera.event_id, event_id);

    let status = client.status(&event_id).await.unwrap();
    assert!(!status.is_live);
    assert_eq!(status.total_camera_count, 1);
    assert_eq!(status.stream_health, "unknown");
}

#[tokio::test]
async fn client_surfaces_api_errors() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let client = ApiClient::new(&app.base_url, app.mint_token("op-1", &new_event_id(), "operator"));

    let err = client
        .join(&event_id, None, &DeviceInfo::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 403, .. }));
}

#[tokio::test]
async fn reporter_drives_the_event_live_and_back() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let client = ApiClient::new(&app.base_url, app.mint_token("op-1", &event_id, "operator"));
    let camera = client.join(&event_id, Some("Cam"), &DeviceInfo::local()).await.unwrap();

    let reporter = CameraStatusReporter::spawn(
        Arc::new(client.status_endpoint(&event_id, &camera.id)),
        fast_reporter(),
    );
    let hd = CaptureSettings::HD;
    reporter.report(CameraStatus::Connecting, None);
    reporter.report(
        CameraStatus::Active,
        Some(StreamQualityReport {
            resolution: Some(hd.resolution()),
            frame_rate: Some(hd.frame_rate),
            bitrate: Some(hd.bitrate),
            codec: Some("VP8".to_string()),
        }),
    );
    wait_until_live(&client, &event_id, true).await;

    let status = client.status(&event_id).await.unwrap();
    assert_eq!(status.current_active_camera.as_deref(), Some(camera.id.as_str()));
    assert_eq!(status.stream_health, "excellent");

    reporter.report(CameraStatus::Inactive, None);
    reporter.shutdown().await;

    let status = client.status(&event_id).await.unwrap();
    assert!(!status.is_live);
    assert_eq!(status.active_camera_count, 0);
}

#[tokio::test]
async fn foreign_camera_report_is_permanent_failure() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let owner = app.join_camera(&event_id, "op-1", "Cam").await;
    let intruder = ApiClient::new(&app.base_url, app.mint_token("op-2", &event_id, "operator"));

    let err = intruder
        .status_endpoint(&event_id, &owner.id)
        .put_status(&StatusReport {
            status: CameraStatus::Inactive,
            stream_quality: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ReportError::Rejected(403)));
    assert!(err.is_permanent());
}

#[tokio::test]
async fn probe_tells_outage_kinds_apart() {
    let app = TestApp::spawn().await;
    let timeout = Duration::from_secs(2);

    let online = HealthProbe::new(&app.base_url, None, timeout).unwrap();
    assert_eq!(online.check().await, Connectivity::Online);
    assert!(online.round_trip().await.is_ok());

    let dead = closed_port_url();
    let no_network = HealthProbe::new(&dead, None, timeout).unwrap();
    assert_eq!(no_network.check().await, Connectivity::NetworkDown);

    let service_down = HealthProbe::new(&dead, Some(app.url("/health")), timeout).unwrap();
    assert_eq!(service_down.check().await, Connectivity::ServiceDown);
}

#[tokio::test]
async fn monitor_publishes_connectivity() {
    let app = TestApp::spawn().await;
    let probe = Arc::new(HealthProbe::new(&app.base_url, None, Duration::from_secs(2)).unwrap());
    let monitor = ConnectivityMonitor::new(probe);
    let mut rx = monitor.subscribe();

    monitor.poll();
    let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .map(|s| *s)
        .unwrap();
    assert_eq!(state, Some(Connectivity::Online));
    assert_eq!(monitor.current(), Some(Connectivity::Online));
}

#[tokio::test]
async fn local_api_classifies_as_fast_network() {
    let app = TestApp::spawn().await;
    let probe = Arc::new(HealthProbe::new(&app.base_url, None, Duration::from_secs(2)).unwrap());
    let sampler = NetworkQualitySampler::new(Arc::new(ProbeNetworkInfo::new(probe, false)));

    let quality = sampler.sample().await;
    assert_eq!(quality.effective_type, EffectiveType::FourG);
    assert!(quality.rtt.is_some());
    assert_eq!(sampler.recommended(), CaptureSettings::HD);
}

#[tokio::test]
async fn registered_camera_without_media_never_goes_live() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let client = ApiClient::new(&app.base_url, app.mint_token("op-1", &event_id, "operator"));
    let camera = client.join(&event_id, Some("Hold"), &DeviceInfo::local()).await.unwrap();

    let reporter = CameraStatusReporter::spawn(
        Arc::new(client.status_endpoint(&event_id, &camera.id)),
        fast_reporter(),
    );
    reporter.report(CameraStatus::Connecting, None);
    reporter.set_paused(true);
    reporter.set_paused(false);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = client.status(&event_id).await.unwrap();
    assert!(!status.is_live);
    assert_eq!(status.total_camera_count, 1);
    assert_eq!(status.active_camera_count, 0);

    reporter.report(CameraStatus::Inactive, None);
    reporter.shutdown().await;
}
