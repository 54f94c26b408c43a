use bson::oid::ObjectId;
use serde_json::{Value, json};

use super::test_app::TestApp;

/// A camera registered through the API, with the token that owns it.
pub struct SeededCamera {
    pub id: String,
    pub participant_id: String,
    pub token: String,
}

pub fn new_event_id() -> String {
    ObjectId::new().to_hex()
}

pub fn hd_quality() -> Value {
    json!({
        "resolution": "1280x720",
        "frameRate": 30,
        "bitrate": 2500,
        "codec": "VP8",
    })
}

impl TestApp {
    /// Join `event_id` as `participant_id` and return the new camera.
    pub async fn join_camera(&self, event_id: &str, participant_id: &str, name: &str) -> SeededCamera {
        let token = self.mint_token(participant_id, event_id, "operator");
        let resp = self
            .auth_post(&format!("/api/events/{event_id}/cameras"), &token)
            .json(&json!({
                "displayName": name,
                "deviceInfo": { "platform": "linux", "browser": "chrome" },
            }))
            .send()
            .await
            .expect("Join request failed");

        assert_eq!(resp.status().as_u16(), 201, "Join failed");
        let body: Value = resp.json().await.expect("Failed to parse join response");

        SeededCamera {
            id: body["id"].as_str().unwrap().to_string(),
            participant_id: participant_id.to_string(),
            token,
        }
    }

    pub async fn report(&self, event_id: &str, camera: &SeededCamera, body: Value) -> reqwest::Response {
        self.auth_put(
            &format!("/api/events/{event_id}/cameras/{}/status", camera.id),
            &camera.token,
        )
        .json(&body)
        .send()
        .await
        .expect("Status request failed")
    }

    /// Join and immediately go active with HD quality.
    pub async fn go_live(&self, event_id: &str, participant_id: &str) -> SeededCamera {
        let camera = self.join_camera(event_id, participant_id, participant_id).await;
        let resp = self
            .report(event_id, &camera, json!({ "status": "active", "streamQuality": hd_quality() }))
            .await;
        assert_eq!(resp.status().as_u16(), 200, "Going live failed");
        camera
    }

    pub async fn event_status(&self, event_id: &str) -> Value {
        let resp = self
            .client
            .get(self.url(&format!("/api/events/{event_id}/status")))
            .send()
            .await
            .expect("Status request failed");
        assert_eq!(resp.status().as_u16(), 200);
        resp.json().await.expect("Failed to parse status")
    }
}
