use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, Sse},
};
use bson::oid::ObjectId;
use futures::Stream;
use livecast_services::{ChannelError, StatusMessage, Subscription};
use tokio::time::{Interval, MissedTickBehavior};

use crate::{error::ApiError, state::AppState};
use super::{parse_id, status::to_response};

const LAST_EVENT_ID: &str = "last-event-id";
const MAX_HEARTBEAT: Duration = Duration::from_secs(30);

enum Next {
    Message(Result<StatusMessage, ChannelError>),
    Heartbeat,
}

struct Feed {
    state: AppState,
    event_id: ObjectId,
    subscription: Subscription,
    heartbeat: Interval,
}

fn to_event(message: &StatusMessage) -> Option<Event> {
    let event = match Event::default().json_data(message) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode status message");
            return None;
        }
    };
    Some(match message.id {
        Some(id) => event.id(id.to_string()),
        None => event,
    })
}

async fn heartbeat(feed: &Feed) -> StatusMessage {
    let payload = match feed.state.aggregator.status(feed.event_id).await {
        Ok(status) => serde_json::to_value(to_response(&status)).unwrap_or_default(),
        Err(e) => {
            tracing::warn!(event_id = %feed.event_id, error = %e, "Heartbeat without status");
            serde_json::Value::Null
        }
    };
    StatusMessage::heartbeat(payload)
}

/// Server-sent status events. The first frame is a heartbeat carrying the
/// current status; `Last-Event-ID` resumes from the replay backlog.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let eid = parse_id(&event_id, "event_id")?;
    let last_event_id = headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let subscription = state.hub.subscribe(eid, last_event_id)?;
    let period = Duration::from_secs(state.settings.channel.heartbeat_secs)
        .clamp(Duration::from_secs(1), MAX_HEARTBEAT);
    let mut heartbeat_timer = tokio::time::interval(period);
    heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(event_id = %eid, ?last_event_id, "Status stream opened");

    let feed = Feed {
        state,
        event_id: eid,
        subscription,
        heartbeat: heartbeat_timer,
    };

    let stream = futures::stream::unfold(feed, |mut feed| async move {
        loop {
            let next = tokio::select! {
                biased;
                next = feed.subscription.next() => Next::Message(next),
                _ = feed.heartbeat.tick() => Next::Heartbeat,
            };
            let message = match next {
                Next::Message(Ok(message)) => message,
                Next::Message(Err(e)) => {
                    // Client reconnects with Last-Event-ID.
                    tracing::debug!(event_id = %feed.event_id, error = %e, "Status stream ended");
                    return None;
                }
                Next::Heartbeat => heartbeat(&feed).await,
            };
            if let Some(event) = to_event(&message) {
                return Some((Ok(event), feed));
            }
        }
    });

    Ok(Sse::new(stream))
}
