use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};

use sensor_api::{MeasurementEvent, TopicKey};
use sensor_engine::CloseReason;

use super::AppState;

// ═══════════════════════════════════════════════════════════════
//  WebSocket: GET /api/measurements/stream?sensor=
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct StreamParams {
    sensor: Option<String>,
}

pub(crate) async fn handle_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let filter = TopicKey::from_sensor(params.sensor.as_deref());
    ws.on_upgrade(move |socket| stream_connection(socket, state, filter))
}

/// Text frame sent for every broadcast event.
#[derive(Serialize)]
struct WsMeasurements<'a> {
    r#type: &'static str,
    #[serde(flatten)]
    event: &'a MeasurementEvent,
}

fn close_frame(reason: CloseReason) -> Message {
    let code = match reason {
        CloseReason::Evicted => close_code::AGAIN,
        CloseReason::Unsubscribed => close_code::NORMAL,
        CloseReason::Shutdown => close_code::AWAY,
    };
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.as_str().into(),
    }))
}

// ═══════════════════════════════════════════════════════════════
//  Connection handler
// ═══════════════════════════════════════════════════════════════

async fn stream_connection(mut socket: WebSocket, state: AppState, filter: TopicKey) {
    let mut sub = match state.broker.subscribe(filter.clone()).await {
        Ok(sub) => sub,
        Err(e) => {
            tracing::warn!(filter = %filter, error = %e, "stream refused");
            let _ = socket.send(close_frame(CloseReason::Shutdown)).await;
            return;
        }
    };
    tracing::info!(subscriber = sub.id(), filter = %filter, "stream client connected");

    let heartbeat = state.stream.heartbeat();
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;

            _ = state.shutdown.cancelled() => break Some(CloseReason::Shutdown),

            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break None,
                // Client frames carry nothing for us; pongs are handled by the socket.
                Some(Ok(_)) => {}
            },

            event = sub.recv() => match event {
                Some(event) => {
                    let frame = WsMeasurements {
                        r#type: "measurements",
                        event: &event,
                    };
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break None;
                    }
                }
                None => break Some(sub.close_reason().await),
            },

            _ = ticker.tick() => {
                if socket.send(Message::Ping(Default::default())).await.is_err() {
                    break None;
                }
            }
        }
    };

    if let Some(reason) = reason {
        let _ = socket.send(close_frame(reason)).await;
    }
    tracing::info!(
        subscriber = sub.id(),
        filter = %filter,
        reason = reason.map(|r| r.as_str()).unwrap_or("client gone"),
        "stream client disconnected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_api::MeasurementValue;

    #[test]
    fn frame_flattens_event() {
        let event = MeasurementEvent {
            sensor_id: Some("s1".into()),
            sensor_name: None,
            ts_ms: 1_000,
            persisted: true,
            values: vec![MeasurementValue {
                measurement: "temperature".into(),
                parameter: None,
                value: 21.5,
                unit: Some("C".into()),
            }],
        };
        let json = serde_json::to_value(WsMeasurements {
            r#type: "measurements",
            event: &event,
        })
        .unwrap();
        assert_eq!(json["type"], "measurements");
        assert_eq!(json["sensor_id"], "s1");
        assert_eq!(json["persisted"], true);
        assert_eq!(json["values"][0]["value"], 21.5);
        assert!(json.get("sensor_name").is_none());
    }

    #[test]
    fn eviction_closes_with_try_again() {
        let Message::Close(Some(frame)) = close_frame(CloseReason::Evicted) else {
            panic!("expected close frame");
        };
        assert_eq!(frame.code, close_code::AGAIN);
        assert_eq!(frame.reason.as_str(), "slow consumer dropped");
    }
}
