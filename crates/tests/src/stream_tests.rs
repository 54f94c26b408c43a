use std::time::Duration;

use bson::oid::ObjectId;
use crate::fixtures::seed::new_event_id;
use crate::fixtures::test_app::TestApp;
use serde_json::Value;

/// One decoded server-sent event.
#[derive(Debug)]
struct Frame {
    id: Option<u64>,
    data: Value,
}

impl Frame {
    fn kind(&self) -> &str {
        self.data["type"].as_str().unwrap_or_default()
    }
}

struct SseReader {
    resp: reqwest::Response,
    buf: String,
}

impl SseReader {
    async fn open(app: &TestApp, event_id: &str, last_event_id: Option<u64>) -> reqwest::Response {
        let mut req = app.client.get(app.url(&format!("/api/events/{event_id}/stream")));
        if let Some(id) = last_event_id {
            req = req.header("Last-Event-ID", id.to_string());
        }
        req.send().await.expect("Stream request failed")
    }

    async fn connect(app: &TestApp, event_id: &str, last_event_id: Option<u64>) -> Self {
        let resp = Self::open(app, event_id, last_event_id).await;
        assert_eq!(resp.status().as_u16(), 200);
        assert!(
            resp.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );
        Self {
            resp,
            buf: String::new(),
        }
    }

    async fn next_frame(&mut self) -> Frame {
        loop {
            if let Some(end) = self.buf.find("\n\n") {
                let raw: String = self.buf.drain(..end + 2).collect();
                if let Some(frame) = parse_frame(&raw) {
                    return frame;
                }
                continue;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.resp.chunk())
                .await
                .expect("Timed out waiting for an event")
                .expect("Stream failed")
                .expect("Stream ended");
            self.buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Next frame that is not a heartbeat.
    async fn next_event(&mut self) -> Frame {
        loop {
            let frame = self.next_frame().await;
            if frame.kind() != "heartbeat" {
                return frame;
            }
        }
    }
}

fn parse_frame(raw: &str) -> Option<Frame> {
    let mut id = None;
    let mut data = String::new();
    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("id:") {
            id = value.trim().parse().ok();
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim_start());
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(Frame {
        id,
        data: serde_json::from_str(&data).ok()?,
    })
}

#[tokio::test]
async fn stream_opens_with_current_status() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let camera = app.go_live(&event_id, "op-1").await;

    let mut reader = SseReader::connect(&app, &event_id, None).await;
    let first = reader.next_frame().await;

    assert_eq!(first.kind(), "heartbeat");
    assert!(first.id.is_none());
    assert_eq!(first.data["payload"]["isLive"], true);
    assert_eq!(first.data["payload"]["currentActiveCamera"], camera.id.as_str());
}

#[tokio::test]
async fn camera_changes_are_pushed() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let mut reader = SseReader::connect(&app, &event_id, None).await;

    let camera = app.go_live(&event_id, "op-1").await;

    let joined = reader.next_event().await;
    assert_eq!(joined.kind(), "camera-joined");
    assert_eq!(joined.data["payload"]["cameraId"], camera.id.as_str());
    assert_eq!(joined.data["payload"]["status"], "active");

    let switched = reader.next_event().await;
    assert_eq!(switched.kind(), "stream-switched");
    assert_eq!(switched.data["payload"]["toCamera"], camera.id.as_str());
    assert_eq!(switched.data["payload"]["reason"], "new_connection");
    assert!(switched.id > joined.id);

    app.report(&event_id, &camera, serde_json::json!({ "status": "inactive" }))
        .await;
    let left = reader.next_event().await;
    assert_eq!(left.kind(), "camera-left");
    assert_eq!(left.data["payload"]["cameraId"], camera.id.as_str());
}

#[tokio::test]
async fn reconnect_resumes_after_last_event_id() {
    let app = TestApp::spawn().await;
    let event_id = new_event_id();
    let mut reader = SseReader::connect(&app, &event_id, None).await;

    let _camera = app.go_live(&event_id, "op-1").await;
    let joined = reader.next_event().await;
    let switched = reader.next_event().await;
    drop(reader);

    let mut resumed = SseReader::connect(&app, &event_id, joined.id).await;
    let replayed = resumed.next_event().await;

    assert_eq!(replayed.id, switched.id);
    assert_eq!(replayed.kind(), "stream-switched");
}

#[tokio::test]
async fn subscribers_per_event_are_capped() {
    let app = TestApp::spawn_with_settings(|s| s.channel.max_subscribers_per_event = 2).await;
    let event_id = new_event_id();

    let _a = SseReader::connect(&app, &event_id, None).await;
    let _b = SseReader::connect(&app, &event_id, None).await;
    let rejected = SseReader::open(&app, &event_id, None).await;
    assert_eq!(rejected.status().as_u16(), 503);

    // Other events are unaffected
    let _other = SseReader::connect(&app, &new_event_id(), None).await;
}

#[tokio::test]
async fn closed_streams_release_their_slot() {
    let app = TestApp::spawn_with_settings(|s| s.channel.heartbeat_secs = 1).await;
    let event_id = new_event_id();
    let eid = ObjectId::parse_str(&event_id).unwrap();

    let reader = SseReader::connect(&app, &event_id, None).await;
    assert_eq!(app.state.hub.subscriber_count(&eid), 1);
    drop(reader);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while app.state.hub.subscriber_count(&eid) > 0 {
        assert!(tokio::time::Instant::now() < deadline, "Subscriber was never released");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
