//! Same flows against the MongoDB stores. Run with
//! `cargo test -p livecast-tests -- --ignored` and a MongoDB on :27019.

use crate::fixtures::seed::new_event_id;
use crate::fixtures::test_app::TestApp;
use serde_json::json;

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn mongo_backed_event_goes_live_and_is_swept() {
    let app = TestApp::spawn_mongo().await;
    let event_id = new_event_id();

    let first = app.go_live(&event_id, "op-1").await;
    let second = app.go_live(&event_id, "op-2").await;

    let status = app.event_status(&event_id).await;
    assert_eq!(status["activeCameraCount"], 2);
    assert_eq!(status["currentActiveCamera"], second.id.as_str());

    let resp = app.report(&event_id, &second, json!({ "status": "error" })).await;
    assert_eq!(resp.status().as_u16(), 200);
    let status = app.event_status(&event_id).await;
    assert_eq!(status["currentActiveCamera"], first.id.as_str());

    let later = bson::DateTime::from_millis(bson::DateTime::now().timestamp_millis() + 31_000);
    let report = app.state.aggregator.sweep_at(later).await.unwrap();
    assert_eq!(report.stale, 1);

    let status = app.event_status(&event_id).await;
    assert_eq!(status["isLive"], false);
}
