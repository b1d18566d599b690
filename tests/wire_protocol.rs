use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use reservd::engine::{Engine, EngineSettings};
use reservd::limits::MAX_LINE_LEN;
use reservd::mail::LogMailer;
use reservd::notify::NotifyHub;
use reservd::store::Store;
use reservd::wire::{self, Reply};

const H: i64 = 3_600_000;
const EVENT_DATE: i64 = 1_900_000_000_000;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("reservd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let store = Arc::new(Store::open(dir.join("reservd.wal")).unwrap());
    let engine = Arc::new(Engine::new(
        store,
        Arc::new(LogMailer),
        Arc::new(NotifyHub::new()),
        EngineSettings::default(),
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });

    addr
}

struct Client {
    conn: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            conn: Framed::new(socket, LinesCodec::new()),
        }
    }

    async fn send_line(&mut self, line: String) {
        self.conn.send(line).await.unwrap();
    }

    async fn recv(&mut self) -> Option<Reply> {
        let line = tokio::time::timeout(Duration::from_secs(5), self.conn.next())
            .await
            .ok()??
            .ok()?;
        Some(serde_json::from_str(&line).unwrap())
    }

    async fn call(&mut self, request: Value) -> Reply {
        self.send_line(request.to_string()).await;
        self.recv().await.expect("connection closed")
    }

    async fn ok(&mut self, request: Value) -> Value {
        match self.call(request).await {
            Reply::Ok { data } => data,
            other => panic!("expected ok, got {other:?}"),
        }
    }

    async fn error_kind(&mut self, request: Value) -> String {
        match self.call(request).await {
            Reply::Error { kind, .. } => kind,
            other => panic!("expected error, got {other:?}"),
        }
    }
}

/// Organizer 1, provider 2, service 10 (60..=180 min, 24h deadline), event 20.
async fn seed(client: &mut Client) {
    client
        .ok(json!({"op": "put_user", "user": {"id": 1, "email": "organizer@example.com", "role": "organizer"}}))
        .await;
    client
        .ok(json!({"op": "put_user", "user": {"id": 2, "email": "provider@example.com", "role": "provider"}}))
        .await;
    client
        .ok(json!({
            "op": "put_service",
            "info": {
                "id": 10, "title": "string quartet", "category_id": 7, "provider_id": 2,
                "available": true, "visible": true, "deleted": false
            },
            "terms": {
                "min_duration": 60, "max_duration": 180,
                "reservation_deadline": 1440, "cancellation_deadline": 0
            }
        }))
        .await;
    client
        .ok(json!({"op": "put_event", "event": {"id": 20, "date": EVENT_DATE, "budget": {"items": []}}}))
        .await;
}

fn reserve(start: i64) -> Value {
    json!({
        "op": "reserve",
        "service_id": 10,
        "request": {"event_id": 20, "organizer_id": 1, "start_time": start}
    })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn ping() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;
    assert_eq!(client.ok(json!({"op": "ping"})).await, json!("pong"));
}

#[tokio::test]
async fn reserve_round_trip() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;
    seed(&mut client).await;

    let start = EVENT_DATE - 2 * H;
    let data = client.ok(reserve(start)).await;
    assert_eq!(data["service_id"], 10);
    assert_eq!(data["provider_id"], 2);
    assert_eq!(data["provider_email"], "provider@example.com");
    assert_eq!(data["start_time"], start);
    assert_eq!(data["end_time"], Value::Null);

    assert_eq!(client.error_kind(reserve(start)).await, "TIME_SLOT_ALREADY_BOOKED");
    assert_eq!(
        client.error_kind(reserve(EVENT_DATE - 25 * H)).await,
        "TIMING_CONSTRAINT_VIOLATION"
    );

    let slots = client.ok(json!({"op": "timeslots", "service_id": 10})).await;
    let slots = slots.as_array().unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0]["span"]["start"], start);
    assert_eq!(slots[0]["span"]["end"], start + H);
}

#[tokio::test]
async fn not_found_errors() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;
    seed(&mut client).await;

    let missing_service = json!({
        "op": "reserve",
        "service_id": 404,
        "request": {"event_id": 20, "organizer_id": 1, "start_time": EVENT_DATE - H}
    });
    assert_eq!(client.error_kind(missing_service).await, "SERVICE_NOT_FOUND");

    let missing_event = json!({
        "op": "reserve",
        "service_id": 10,
        "request": {"event_id": 404, "organizer_id": 1, "start_time": EVENT_DATE - H}
    });
    assert_eq!(client.error_kind(missing_event).await, "EVENT_NOT_FOUND");

    let missing_organizer = json!({
        "op": "reserve",
        "service_id": 10,
        "request": {"event_id": 20, "organizer_id": 404, "start_time": EVENT_DATE - H}
    });
    assert_eq!(client.error_kind(missing_organizer).await, "USER_NOT_FOUND");

    assert_eq!(
        client.error_kind(json!({"op": "calendar", "provider_id": 1})).await,
        "USER_NOT_FOUND"
    );
}

#[tokio::test]
async fn calendar_lists_provider_bookings() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;
    seed(&mut client).await;

    client.ok(reserve(EVENT_DATE - 2 * H)).await;
    client.ok(reserve(EVENT_DATE - 5 * H)).await;

    let calendar = client.ok(json!({"op": "calendar", "provider_id": 2})).await;
    let starts: Vec<i64> = calendar
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["start"].as_i64().unwrap())
        .collect();
    assert_eq!(starts, vec![EVENT_DATE - 5 * H, EVENT_DATE - 2 * H]);
    assert_eq!(calendar[0]["service_title"], "string quartet");
}

#[tokio::test]
async fn malformed_lines_keep_connection_open() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    client.send_line("not json".into()).await;
    assert!(matches!(client.recv().await, Some(Reply::Error { ref kind, .. }) if kind == "BAD_REQUEST"));

    assert_eq!(client.error_kind(json!({"op": "teleport"})).await, "BAD_REQUEST");
    assert_eq!(
        client.error_kind(json!({"op": "put_user", "user": {"id": 1, "email": "", "role": "admin"}})).await,
        "BAD_REQUEST"
    );

    assert_eq!(client.ok(json!({"op": "ping"})).await, json!("pong"));
}

#[tokio::test]
async fn oversized_line_closes_connection() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    client.send_line("x".repeat(MAX_LINE_LEN + 1)).await;
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn listen_receives_notices() {
    let addr = start_test_server().await;
    let mut writer = Client::connect(addr).await;
    let mut listener = Client::connect(addr).await;
    seed(&mut writer).await;

    listener.ok(json!({"op": "listen", "service_id": 10})).await;

    let start = EVENT_DATE - 2 * H;
    writer.ok(reserve(start)).await;

    match listener.recv().await {
        Some(Reply::Notice { notice }) => {
            assert_eq!(notice.service_id, 10);
            assert_eq!(notice.event_id, 20);
            assert_eq!((notice.start, notice.end), (start, start + H));
        }
        other => panic!("expected notice, got {other:?}"),
    }

    // A rejected attempt produces no notice.
    writer.error_kind(reserve(start)).await;

    listener.ok(json!({"op": "unlisten", "service_id": 10})).await;
    writer.ok(reserve(EVENT_DATE - 4 * H)).await;

    // Only the ping reply comes back; no notice after unlisten.
    assert_eq!(listener.ok(json!({"op": "ping"})).await, json!("pong"));
}

#[tokio::test]
async fn listen_is_scoped_to_service() {
    let addr = start_test_server().await;
    let mut writer = Client::connect(addr).await;
    let mut listener = Client::connect(addr).await;
    seed(&mut writer).await;

    listener.ok(json!({"op": "listen", "service_id": 11})).await;
    writer.ok(reserve(EVENT_DATE - 2 * H)).await;

    assert_eq!(listener.ok(json!({"op": "ping"})).await, json!("pong"));
}
