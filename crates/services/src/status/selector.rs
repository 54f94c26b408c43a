//! Picks the camera whose feed is broadcast.
//!
//! The latest active joiner wins; equal join times go to the greatest
//! connection id. A director pin overrides the policy while the pinned
//! camera stays active.

use std::time::Duration;

use bson::{DateTime, oid::ObjectId};
use livecast_db::models::{CameraConnection, StreamStatus, SwitchEvent, SwitchReason};

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionPolicy {
    /// Minimum time between two `new_connection` switches. Zero disables it.
    pub min_dwell: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub current: Option<ObjectId>,
    pub pinned: Option<ObjectId>,
    /// Set when the broadcast moves to a different operator.
    pub switch: Option<SwitchEvent>,
}

/// Latest `joined_at` among `active`, ties to the greatest id.
pub fn latest_joined<'a>(active: &[&'a CameraConnection]) -> Option<&'a CameraConnection> {
    active
        .iter()
        .copied()
        .max_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)))
}

pub fn select(
    cameras: &[CameraConnection],
    previous: &StreamStatus,
    policy: &SelectionPolicy,
    now: DateTime,
) -> Selection {
    let active: Vec<&CameraConnection> = cameras.iter().filter(|c| c.is_active()).collect();
    let is_active = |id: ObjectId| active.iter().any(|c| c.id == Some(id));
    let find = |id: ObjectId| cameras.iter().find(|c| c.id == Some(id));
    let prev = previous.current_active_camera;

    let pinned = previous.pinned_camera.filter(|&p| is_active(p));
    if let Some(pin) = pinned {
        let switch = (prev != Some(pin)).then(|| SwitchEvent {
            timestamp: now,
            from_camera: prev,
            to_camera: pin,
            reason: SwitchReason::ManualSwitch,
        });
        return Selection {
            current: Some(pin),
            pinned,
            switch,
        };
    }

    let Some(candidate) = latest_joined(&active) else {
        return Selection {
            current: None,
            pinned: None,
            switch: None,
        };
    };
    let Some(candidate_id) = candidate.id else {
        return Selection {
            current: prev.filter(|&p| is_active(p)),
            pinned: None,
            switch: None,
        };
    };

    let Some(prev_id) = prev else {
        return Selection {
            current: Some(candidate_id),
            pinned: None,
            switch: Some(SwitchEvent {
                timestamp: now,
                from_camera: None,
                to_camera: candidate_id,
                reason: SwitchReason::NewConnection,
            }),
        };
    };

    if prev_id == candidate_id {
        return Selection {
            current: Some(prev_id),
            pinned: None,
            switch: None,
        };
    }

    // A rejoin by the same operator moves the reference without a switch.
    let same_operator = find(prev_id).is_some_and(|p| p.participant_id == candidate.participant_id);
    if same_operator {
        return Selection {
            current: Some(candidate_id),
            pinned: None,
            switch: None,
        };
    }

    let prev_still_active = is_active(prev_id);
    if prev_still_active && dwell_pending(previous.last_switch_at, policy, now) {
        return Selection {
            current: Some(prev_id),
            pinned: None,
            switch: None,
        };
    }

    let reason = if prev_still_active {
        SwitchReason::NewConnection
    } else {
        SwitchReason::Disconnection
    };
    Selection {
        current: Some(candidate_id),
        pinned: None,
        switch: Some(SwitchEvent {
            timestamp: now,
            from_camera: Some(prev_id),
            to_camera: candidate_id,
            reason,
        }),
    }
}

fn dwell_pending(
    last_switch_at: Option<DateTime>,
    policy: &SelectionPolicy,
    now: DateTime,
) -> bool {
    if policy.min_dwell.is_zero() {
        return false;
    }
    let Some(last) = last_switch_at else {
        return false;
    };
    let elapsed_ms = now.timestamp_millis() - last.timestamp_millis();
    elapsed_ms < policy.min_dwell.as_millis() as i64
}
