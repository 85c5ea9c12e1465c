use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use courtside::engine::{Engine, EngineConfig};
use courtside::server;
use courtside::store::{InMemoryStore, WalStore};

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server(engine: Arc<Engine>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = server::process_connection(socket, engine).await;
            });
        }
    });

    addr
}

fn memory_engine() -> Arc<Engine> {
    Arc::new(Engine::new(Arc::new(InMemoryStore::new()), EngineConfig::default()))
}

struct Client(Framed<TcpStream, LinesCodec>);

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Client(Framed::new(socket, LinesCodec::new()))
    }

    async fn call(&mut self, request: Value) -> Value {
        self.call_raw(&request.to_string()).await
    }

    async fn call_raw(&mut self, line: &str) -> Value {
        self.0.send(line.to_string()).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), self.0.next())
            .await
            .expect("server did not answer")
            .expect("connection closed")
            .unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    /// Next line the server pushes without a request, e.g. a watched event.
    async fn next_line(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.0.next())
            .await
            .expect("no event arrived")
            .expect("connection closed")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn data(&mut self, request: Value) -> Value {
        let resp = self.call(request).await;
        assert_eq!(resp["ok"], true, "{resp}");
        resp["data"].clone()
    }

    /// Create a club with one court; returns (group_id, resource_id).
    async fn club_with_court(&mut self) -> (String, String) {
        let group = self
            .data(json!({ "op": "create_group", "name": "Riverside", "open_time": "06:00", "close_time": "23:00" }))
            .await;
        let group_id = group["id"].as_str().unwrap().to_string();
        let court = self
            .data(json!({ "op": "create_resource", "group_id": group_id, "name": "Court 1" }))
            .await;
        (group_id, court["id"].as_str().unwrap().to_string())
    }
}

fn booking(group_id: &str, resource_id: &str, start: &str, hours: i64) -> Value {
    json!({
        "op": "create_reservation",
        "resource_id": resource_id,
        "group_id": group_id,
        "date": "2026-06-01",
        "start_time": start,
        "duration_hours": hours,
        "requester_id": "player-7",
    })
}

fn error_kind(resp: &Value) -> &str {
    assert_eq!(resp["ok"], false, "{resp}");
    resp["error"]["kind"].as_str().unwrap()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn book_and_cancel_over_tcp() {
    let addr = start_test_server(memory_engine()).await;
    let mut client = Client::connect(addr).await;
    let (group_id, court_id) = client.club_with_court().await;

    let r = client.data(booking(&group_id, &court_id, "23:00", 2)).await;
    assert_eq!(r["status"], "Booked");
    assert_eq!(r["end_time"], "01:00");
    assert_eq!(r["date"], "2026-06-01");
    let id = r["id"].as_str().unwrap().to_string();

    let free = client.data(json!({ "op": "available_resources" })).await;
    assert!(free.as_array().unwrap().is_empty());

    let cancelled = client.data(json!({ "op": "cancel_reservation", "reservation_id": id })).await;
    assert_eq!(cancelled["status"], "Cancelled");

    let again = client.call(json!({ "op": "cancel_reservation", "reservation_id": id })).await;
    assert_eq!(error_kind(&again), "already_cancelled");
    assert_eq!(again["error"]["status"], 409);

    let fetched = client.data(json!({ "op": "get_reservation", "reservation_id": id })).await;
    assert_eq!(fetched["status"], "Cancelled");
}

#[tokio::test]
async fn error_kinds_over_tcp() {
    let addr = start_test_server(memory_engine()).await;
    let mut client = Client::connect(addr).await;
    let (group_id, court_id) = client.club_with_court().await;

    let resp = client.call(booking(&group_id, &court_id, "7pm", 1)).await;
    assert_eq!(error_kind(&resp), "validation");

    let resp = client.call(booking("no-such-club", &court_id, "19:00", 1)).await;
    assert_eq!(error_kind(&resp), "not_found");

    let other = client.data(json!({ "op": "create_group", "name": "Hilltop" })).await;
    let resp = client.call(booking(other["id"].as_str().unwrap(), &court_id, "19:00", 1)).await;
    assert_eq!(error_kind(&resp), "mismatch");
    assert_eq!(resp["error"]["status"], 422);

    client.data(booking(&group_id, &court_id, "19:00", 2)).await;
    let resp = client.call(booking(&group_id, &court_id, "20:00", 1)).await;
    assert_eq!(error_kind(&resp), "conflict");
    let resp = client.call(booking(&group_id, &court_id, "08:00", 1)).await;
    assert_eq!(error_kind(&resp), "resource_unavailable");

    let resp = client.call_raw("this is not json").await;
    assert_eq!(error_kind(&resp), "validation");

    // Connection stays usable after errors.
    let list = client
        .data(json!({ "op": "list_reservations", "requester_id": "player-7" }))
        .await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_clients_book_once() {
    let addr = start_test_server(memory_engine()).await;
    let (group_id, court_id) = Client::connect(addr).await.club_with_court().await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let (g, c) = (group_id.clone(), court_id.clone());
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            client.call(booking(&g, &c, "18:00", 1)).await
        }));
    }
    let mut booked = 0;
    for h in handles {
        let resp = h.await.unwrap();
        if resp["ok"] == true {
            booked += 1;
        } else {
            let kind = error_kind(&resp);
            assert!(kind == "resource_unavailable" || kind == "conflict", "{resp}");
        }
    }
    assert_eq!(booked, 1);
}

#[tokio::test]
async fn watcher_receives_booking_events() {
    let addr = start_test_server(memory_engine()).await;
    let mut booker = Client::connect(addr).await;
    let (group_id, court_id) = booker.club_with_court().await;
    let other = booker
        .data(json!({ "op": "create_resource", "group_id": group_id, "name": "Court 2" }))
        .await;

    let mut watcher = Client::connect(addr).await;
    let ack = watcher.data(json!({ "op": "watch", "resource_id": court_id })).await;
    assert_eq!(ack["added"], true);

    // Events for courts not watched are not forwarded.
    booker.data(booking(&group_id, other["id"].as_str().unwrap(), "09:00", 1)).await;
    let r = booker.data(booking(&group_id, &court_id, "18:00", 1)).await;
    let id = r["id"].as_str().unwrap().to_string();
    booker.data(json!({ "op": "cancel_reservation", "reservation_id": id })).await;

    let booked = watcher.next_line().await;
    assert_eq!(booked, json!({ "event": "booked", "reservation_id": id, "resource_id": court_id }));
    let cancelled = watcher.next_line().await;
    assert_eq!(cancelled["event"], "cancelled");
    assert_eq!(cancelled["reservation_id"], id.as_str());

    // Requests still work on a watching connection, and unwatch stops delivery.
    let removed = watcher.data(json!({ "op": "unwatch", "resource_id": court_id })).await;
    assert_eq!(removed["removed"], true);
    booker.data(booking(&group_id, &court_id, "20:00", 1)).await;
    let fetched = watcher.data(json!({ "op": "get_resource", "resource_id": court_id })).await;
    assert_eq!(fetched["status"], "Reserved");
}

#[tokio::test]
async fn browse_clubs_over_tcp() {
    let addr = start_test_server(memory_engine()).await;
    let mut client = Client::connect(addr).await;
    let (group_id, court_id) = client.club_with_court().await;
    client.data(json!({ "op": "create_group", "name": "Hilltop" })).await;

    let club = client.data(json!({ "op": "get_group", "group_id": group_id })).await;
    assert_eq!(club["name"], "Riverside");
    let groups = client.data(json!({ "op": "list_groups" })).await;
    assert_eq!(groups[0]["name"], "Hilltop");
    assert_eq!(groups[1]["name"], "Riverside");

    let courts = client.data(json!({ "op": "list_resources", "group_id": group_id })).await;
    assert_eq!(courts.as_array().unwrap().len(), 1);

    let found = client.data(json!({ "op": "search_resources", "name": "River" })).await;
    assert_eq!(found.as_array().unwrap().len(), 1);
    assert_eq!(found[0]["id"], group_id.as_str());
    assert_eq!(found[0]["resources"][0]["id"], court_id.as_str());

    let resp = client.call(json!({ "op": "search_resources", "name": "   " })).await;
    assert_eq!(error_kind(&resp), "validation");
}

#[tokio::test]
async fn wal_backed_server_keeps_bookings() {
    let dir = std::env::temp_dir().join(format!("courtside_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("courtside.wal");

    let engine = Arc::new(Engine::new(
        Arc::new(WalStore::open(&path, 1000).unwrap()),
        EngineConfig::default(),
    ));
    let addr = start_test_server(engine).await;
    let mut client = Client::connect(addr).await;
    let (group_id, court_id) = client.club_with_court().await;
    let r = client.data(booking(&group_id, &court_id, "10:00", 1)).await;
    let id: Ulid = r["id"].as_str().unwrap().parse().unwrap();

    let reopened = Engine::new(Arc::new(WalStore::open(&path, 1000).unwrap()), EngineConfig::default());
    let stored = reopened.get_reservation(id).await.unwrap();
    assert_eq!(stored.resource_id, court_id);
    assert_eq!(stored.end_time, "11:00");

    let _ = std::fs::remove_dir_all(&dir);
}
