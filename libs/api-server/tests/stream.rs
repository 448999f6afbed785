use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use sensor_api::MeasurementValue;
use sensor_api_server::{AppState, StreamConfig, router};
use sensor_engine::{Engine, EngineConfig, IngestRequest, SystemClock};
use storage_memory::MemoryStorage;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve() -> (SocketAddr, Engine, CancellationToken) {
    let token = CancellationToken::new();
    let storage = Arc::new(MemoryStorage::default());
    let engine = Engine::bootstrap(
        &EngineConfig::default(),
        storage.clone(),
        storage,
        Arc::new(SystemClock),
        token.clone(),
    )
    .await
    .unwrap();
    let stream = StreamConfig { heartbeat_ms: 60_000 };
    let app = router(AppState::from_engine(&engine, stream, token.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = token.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .unwrap();
    });
    (addr, engine, token)
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{addr}/api/measurements/stream{query}");
    let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    client
}

fn reading(sensor: &str, value: f64) -> IngestRequest {
    IngestRequest {
        sensor_id: Some(sensor.into()),
        sensor_name: None,
        ts_ms: None,
        values: vec![MeasurementValue {
            measurement: "temperature".into(),
            parameter: None,
            value,
            unit: Some("C".into()),
        }],
    }
}

/// Next data frame, skipping pings.
async fn next_frame(client: &mut Client, wait: Duration) -> Option<Message> {
    loop {
        match tokio::time::timeout(wait, client.next()).await {
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(Some(Ok(msg))) => return Some(msg),
            Ok(Some(Err(e))) => panic!("websocket error: {e}"),
            Ok(None) | Err(_) => return None,
        }
    }
}

/// Publish until the stream shows the first event. Registration finishes
/// after the upgrade, so early events may be missed.
async fn first_event(engine: &Engine, client: &mut Client, sensor: &str) -> Value {
    for attempt in 0..100 {
        engine.ingestor().ingest(reading(sensor, attempt as f64)).await.unwrap();
        if let Some(msg) = next_frame(client, Duration::from_millis(50)).await {
            let Message::Text(text) = msg else {
                panic!("expected text frame, got {msg:?}");
            };
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
    panic!("no event reached the stream");
}

#[tokio::test]
async fn stream_delivers_events_and_closes_on_shutdown() {
    let (addr, engine, token) = serve().await;
    let mut client = connect(addr, "?sensor=s1").await;

    let frame = first_event(&engine, &mut client, "s1").await;
    assert_eq!(frame["type"], "measurements");
    assert_eq!(frame["sensor_id"], "s1");
    assert_eq!(frame["values"][0]["measurement"], "temperature");
    assert_eq!(frame["values"][0]["unit"], "C");
    assert!(frame["persisted"].is_boolean());

    token.cancel();
    let msg = next_frame(&mut client, Duration::from_secs(2)).await;
    let Some(Message::Close(Some(close))) = msg else {
        panic!("expected close frame, got {msg:?}");
    };
    assert_eq!(u16::from(close.code), 1001);
    assert_eq!(close.reason.as_str(), "server shutting down");

    engine.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn client_close_frees_the_stream_for_new_clients() {
    let (addr, engine, token) = serve().await;

    let mut first = connect(addr, "?sensor=s1").await;
    first_event(&engine, &mut first, "s1").await;
    first.send(Message::Close(None)).await.unwrap();
    drop(first);

    let mut second = connect(addr, "?sensor=s1").await;
    let frame = first_event(&engine, &mut second, "s1").await;
    assert_eq!(frame["sensor_id"], "s1");

    token.cancel();
    engine.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn stream_only_carries_the_filtered_sensor() {
    let (addr, engine, token) = serve().await;
    let mut client = connect(addr, "?sensor=s1").await;
    first_event(&engine, &mut client, "s1").await;

    // Drain anything still buffered from the warm-up.
    while next_frame(&mut client, Duration::from_millis(50)).await.is_some() {}

    engine.ingestor().ingest(reading("s2", 1.0)).await.unwrap();
    engine.ingestor().ingest(reading("s1", 2.0)).await.unwrap();
    let Some(Message::Text(text)) = next_frame(&mut client, Duration::from_secs(2)).await else {
        panic!("expected a text frame");
    };
    let frame: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(frame["sensor_id"], "s1");
    assert_eq!(frame["values"][0]["value"], 2.0);

    token.cancel();
    engine.shutdown(Duration::from_secs(1)).await;
}
