use livecast_db::models::{CameraConnection, StreamHealth};

const EXCELLENT_KBPS: u32 = 2000;
const EXCELLENT_FPS: u32 = 24;
const GOOD_KBPS: u32 = 1000;
const POOR_KBPS: u32 = 400;

/// Health of the broadcast, judged on the current camera's last report.
pub fn assess(current: Option<&CameraConnection>) -> StreamHealth {
    let Some(quality) = current.and_then(|c| c.stream_quality.as_ref()) else {
        return StreamHealth::Unknown;
    };
    let Some(bitrate) = quality.bitrate else {
        return StreamHealth::Unknown;
    };

    let frame_rate = quality.frame_rate.unwrap_or(0);
    if bitrate >= EXCELLENT_KBPS && frame_rate >= EXCELLENT_FPS {
        StreamHealth::Excellent
    } else if bitrate >= GOOD_KBPS {
        StreamHealth::Good
    } else if bitrate >= POOR_KBPS {
        StreamHealth::Poor
    } else {
        StreamHealth::Critical
    }
}
