use crate::fixtures::seed::{hd_quality, new_event_id};
use crate::fixtures::test_app::TestApp;
use serde_json::{Value, json};

#[tokio::test]
async fn join_then_active_makes_event_live() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();

    let camera = app.join_camera(&event_id, "op-1", "Stage left").await;
    let status = app.event_status(&event_id).await;
    assert_eq!(status["isLive"], false);
    assert_eq!(status["totalCameraCount"], 1);

    let resp = app
        .report(&event_id, &camera, json!({ "status": "active", "streamQuality": hd_quality() }))
        .await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "active");
    assert_eq!(body["streamQuality"], hd_quality());

    let status = app.event_status(&event_id).await;
    assert_eq!(status["isLive"], true);
    assert_eq!(status["activeCameraCount"], 1);
    assert_eq!(status["currentActiveCamera"], camera.id.as_str());
    assert_eq!(status["activeCameras"], json!([camera.id]));
    assert_eq!(status["streamHealth"], "excellent");
}

#[tokio::test]
async fn later_joiner_becomes_current() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();

    let first = app.go_live(&event_id, "op-1").await;
    let second = app.go_live(&event_id, "op-2").await;

    let status = app.event_status(&event_id).await;
    assert_eq!(status["activeCameraCount"], 2);
    assert_eq!(status["currentActiveCamera"], second.id.as_str());
    assert!(status["lastSwitchAt"].is_string());

    let switches: Vec<Value> = app
        .client
        .get(app.url(&format!("/api/events/{event_id}/switches")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let last = switches.last().unwrap();
    assert_eq!(last["fromCamera"], first.id.as_str());
    assert_eq!(last["toCamera"], second.id.as_str());
    assert_eq!(last["reason"], "new_connection");
}

#[tokio::test]
async fn current_camera_leaving_switches_back() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();

    let first = app.go_live(&event_id, "op-1").await;
    let second = app.go_live(&event_id, "op-2").await;

    let resp = app.report(&event_id, &second, json!({ "status": "inactive" })).await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["disconnectedAt"].is_string());

    let status = app.event_status(&event_id).await;
    assert_eq!(status["activeCameraCount"], 1);
    assert_eq!(status["currentActiveCamera"], first.id.as_str());
    assert_eq!(status["totalCameraCount"], 2);
}

#[tokio::test]
async fn repeated_report_is_idempotent() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let camera = app.go_live(&event_id, "op-1").await;

    let before = app.event_status(&event_id).await;
    let resp = app
        .report(&event_id, &camera, json!({ "status": "active", "streamQuality": hd_quality() }))
        .await;
    assert_eq!(resp.status().as_u16(), 200);
    let after = app.event_status(&event_id).await;

    assert_eq!(after["activeCameraCount"], before["activeCameraCount"]);
    assert_eq!(after["currentActiveCamera"], before["currentActiveCamera"]);
    assert_eq!(after["lastSwitchAt"], before["lastSwitchAt"]);

    let cameras: Vec<Value> = app
        .client
        .get(app.url(&format!("/api/events/{event_id}/cameras")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cameras.len(), 1);
}

#[tokio::test]
async fn report_keeps_quality_when_omitted() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let camera = app.go_live(&event_id, "op-1").await;

    let resp = app.report(&event_id, &camera, json!({ "status": "active" })).await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["streamQuality"], hd_quality());
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let camera = app.join_camera(&event_id, "op-1", "Cam").await;

    let resp = app
        .auth_put(&format!("/api/events/{event_id}/cameras/not-an-id/status"), &camera.token)
        .json(&json!({ "status": "active" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "bad_request");

    let resp = app
        .client
        .get(app.url("/api/events/xyz/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn unknown_camera_is_not_found() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let token = app.mint_token("op-1", &event_id, "operator");

    let resp = app
        .auth_put(
            &format!("/api/events/{event_id}/cameras/{}/status", new_event_id()),
            &token,
        )
        .json(&json!({ "status": "active" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn join_requires_a_valid_token() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let path = format!("/api/events/{event_id}/cameras");

    let resp = app
        .client
        .post(app.url(&path))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let resp = app
        .auth_post(&path, "not.a.jwt")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let expired = app.mint_token_expiring("op-1", &event_id, "operator", -600);
    let resp = app.auth_post(&path, &expired).json(&json!({})).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}

#[tokio::test]
async fn token_for_another_event_is_forbidden() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let token = app.mint_token("op-1", &new_event_id(), "operator");

    let resp = app
        .auth_post(&format!("/api/events/{event_id}/cameras"), &token)
        .json(&json!({ "displayName": "Cam" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);
}

#[tokio::test]
async fn cannot_report_for_someone_elses_camera() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let camera = app.join_camera(&event_id, "op-1", "Cam").await;
    let intruder = app.mint_token("op-2", &event_id, "operator");

    let resp = app
        .auth_put(&format!("/api/events/{event_id}/cameras/{}/status", camera.id), &intruder)
        .json(&json!({ "status": "inactive" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    let status = app.event_status(&event_id).await;
    assert_eq!(status["totalCameraCount"], 1);
}

#[tokio::test]
async fn invalid_join_body_is_rejected() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let token = app.mint_token("op-1", &event_id, "operator");

    let resp = app
        .auth_post(&format!("/api/events/{event_id}/cameras"), &token)
        .json(&json!({ "displayName": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "validation");
}
