use bson::{DateTime, oid::ObjectId};
use crate::fixtures::seed::new_event_id;
use crate::fixtures::test_app::TestApp;
use serde_json::{Value, json};

fn seconds_from_now(secs: i64) -> DateTime {
    DateTime::from_millis(DateTime::now().timestamp_millis() + secs * 1000)
}

#[tokio::test]
async fn unknown_event_is_not_live() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();

    let status = app.event_status(&event_id).await;
    assert_eq!(status["eventId"], event_id.as_str());
    assert_eq!(status["isLive"], false);
    assert_eq!(status["activeCameraCount"], 0);
    assert!(status["currentActiveCamera"].is_null());
    assert_eq!(status["streamHealth"], "unknown");
}

#[tokio::test]
async fn status_is_never_cached() {
    let app = TestApp::spawn().await;

    let resp = app
        .client
        .get(app.url(&format!("/api/events/{}/status", new_event_id())))
        .send()
        .await
        .unwrap();

    let headers = resp.headers();
    assert_eq!(headers["cache-control"], "no-store, no-cache, must-revalidate");
    assert_eq!(headers["pragma"], "no-cache");
    assert_eq!(headers["expires"], "0");
}

#[tokio::test]
async fn health_answers_head() {
    let app = TestApp::spawn().await;

    let resp = app.client.head(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let body: Value = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn silent_camera_is_swept() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let first = app.go_live(&event_id, "op-1").await;
    let _second = app.go_live(&event_id, "op-2").await;
    assert_eq!(app.event_status(&event_id).await["activeCameraCount"], 2);

    // Nobody reports for longer than the stale window
    let report = app.state.aggregator.sweep_at(seconds_from_now(31)).await.unwrap();
    assert_eq!(report.stale, 2);

    let status = app.event_status(&event_id).await;
    assert_eq!(status["activeCameraCount"], 0);
    assert_eq!(status["isLive"], false);
    assert!(status["currentActiveCamera"].is_null());

    let cameras: Vec<Value> = app
        .client
        .get(app.url(&format!("/api/events/{event_id}/cameras")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let swept = cameras.iter().find(|c| c["id"] == first.id.as_str()).unwrap();
    assert_eq!(swept["status"], "inactive");
    assert!(swept["disconnectedAt"].is_string());
}

#[tokio::test]
async fn sweep_drops_only_the_quiet_camera() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let eid = ObjectId::parse_str(&event_id).unwrap();
    let _first = app.go_live(&event_id, "op-1").await;

    let report = app.state.aggregator.sweep_at(seconds_from_now(5)).await.unwrap();
    assert_eq!(report.stale, 0);
    assert!(report.recomputed >= 1);

    let status = app.state.aggregator.status(eid).await.unwrap();
    assert!(status.is_live);
    assert_eq!(status.active_camera_count, 1);
}

#[tokio::test]
async fn director_can_pin_a_camera() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let first = app.go_live(&event_id, "op-1").await;
    let _second = app.go_live(&event_id, "op-2").await;
    let director = app.mint_token("director-1", &event_id, "director");

    let resp = app
        .auth_post(&format!("/api/events/{event_id}/switch"), &director)
        .json(&json!({ "cameraId": first.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["currentActiveCamera"], first.id.as_str());
    assert_eq!(body["pinnedCamera"], first.id.as_str());

    // A newer camera does not override the pin
    let third = app.go_live(&event_id, "op-3").await;
    let status = app.event_status(&event_id).await;
    assert_eq!(status["currentActiveCamera"], first.id.as_str());
    assert_ne!(status["currentActiveCamera"], third.id.as_str());

    let switches: Vec<Value> = app
        .client
        .get(app.url(&format!("/api/events/{event_id}/switches")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(switches.iter().any(|s| s["reason"] == "manual_switch"));
}

#[tokio::test]
async fn operators_cannot_switch() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let camera = app.go_live(&event_id, "op-1").await;

    let resp = app
        .auth_post(&format!("/api/events/{event_id}/switch"), &camera.token)
        .json(&json!({ "cameraId": camera.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);
}

#[tokio::test]
async fn switching_to_inactive_camera_is_rejected() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let idle = app.join_camera(&event_id, "op-1", "Idle").await;
    let _live = app.go_live(&event_id, "op-2").await;
    let director = app.mint_token("director-1", &event_id, "director");

    let resp = app
        .auth_post(&format!("/api/events/{event_id}/switch"), &director)
        .json(&json!({ "cameraId": idle.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}
