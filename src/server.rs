use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{
    CreateReservation, Engine, EngineError, ErrorKind, GroupSearch, NewGroup, ReservationFilter,
};
use crate::limits::{MAX_LINE_LEN, MAX_WATCHES};
use crate::notify::{NotifyHub, ReservationEvent};
use crate::observability::REQUESTS_TOTAL;

/// Events buffered per connection before forwarders wait on the writer.
const EVENT_BUFFER: usize = 256;

/// One request line. The `op` field selects the operation; remaining fields
/// are its arguments.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateGroup(NewGroup),
    CreateResource { group_id: String, name: String },
    CreateReservation(CreateReservation),
    CancelReservation { reservation_id: String },
    GetReservation { reservation_id: String },
    ListReservations(ReservationFilter),
    GetGroup { group_id: String },
    GetResource { resource_id: String },
    ListGroups,
    ListResources { group_id: Option<String> },
    SearchResources(GroupSearch),
    AvailableResources,
    DeadLetters,
    /// Start forwarding a resource's events on this connection.
    Watch { resource_id: String },
    Unwatch { resource_id: String },
}

impl Request {
    fn op(&self) -> &'static str {
        match self {
            Request::CreateGroup(_) => "create_group",
            Request::CreateResource { .. } => "create_resource",
            Request::CreateReservation(_) => "create_reservation",
            Request::CancelReservation { .. } => "cancel_reservation",
            Request::GetReservation { .. } => "get_reservation",
            Request::ListReservations(_) => "list_reservations",
            Request::GetGroup { .. } => "get_group",
            Request::GetResource { .. } => "get_resource",
            Request::ListGroups => "list_groups",
            Request::ListResources { .. } => "list_resources",
            Request::SearchResources(_) => "search_resources",
            Request::AvailableResources => "available_resources",
            Request::DeadLetters => "dead_letters",
            Request::Watch { .. } => "watch",
            Request::Unwatch { .. } => "unwatch",
        }
    }
}

/// Status code attached to error responses, HTTP-style.
pub fn status_code(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Validation => 400,
        ErrorKind::NotFound => 404,
        ErrorKind::Mismatch => 422,
        ErrorKind::Conflict
        | ErrorKind::ResourceUnavailable
        | ErrorKind::IdConflict
        | ErrorKind::AlreadyCancelled => 409,
        ErrorKind::Storage => 503,
    }
}

fn ok(data: impl serde::Serialize) -> Value {
    match serde_json::to_value(data) {
        Ok(data) => json!({ "ok": true, "data": data }),
        Err(e) => err(&EngineError::Storage(format!("response encoding failed: {e}"))),
    }
}

fn err(e: &EngineError) -> Value {
    let kind = e.kind();
    json!({
        "ok": false,
        "error": {
            "kind": kind.as_str(),
            "message": e.to_string(),
            "status": status_code(kind),
        }
    })
}

fn parse_id(raw: &str) -> Result<Ulid, EngineError> {
    Ulid::from_string(raw.trim())
        .map_err(|_| EngineError::Validation(format!("reservation_id {raw:?} is not a valid id")))
}

/// Event subscriptions held by one connection. Each watched resource has a
/// forwarder task moving events from the hub into the connection's channel.
pub struct Watches {
    tx: mpsc::Sender<ReservationEvent>,
    tasks: HashMap<String, JoinHandle<()>>,
}

impl Watches {
    pub fn new() -> (Self, mpsc::Receiver<ReservationEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (Self { tx, tasks: HashMap::new() }, rx)
    }

    /// Subscribe before returning, so every event sent after this call is
    /// forwarded. Returns false if the resource was already watched.
    fn watch(&mut self, hub: &NotifyHub, resource_id: &str) -> Result<bool, EngineError> {
        if self.tasks.contains_key(resource_id) {
            return Ok(false);
        }
        if self.tasks.len() >= MAX_WATCHES {
            return Err(EngineError::Validation(format!(
                "at most {MAX_WATCHES} watches per connection"
            )));
        }
        let mut rx = hub.subscribe(resource_id);
        let tx = self.tx.clone();
        let id = resource_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("watcher of {id} fell behind, {n} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.insert(resource_id.to_string(), task);
        Ok(true)
    }

    fn unwatch(&mut self, resource_id: &str) -> bool {
        match self.tasks.remove(resource_id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Watches {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}

async fn dispatch(
    engine: &Engine,
    watches: &mut Watches,
    req: Request,
) -> Result<Value, EngineError> {
    Ok(match req {
        Request::CreateGroup(new) => ok(engine.create_group(new).await?),
        Request::CreateResource { group_id, name } => {
            ok(engine.create_resource(&group_id, name).await?)
        }
        Request::CreateReservation(req) => ok(engine.create_reservation(req).await?),
        Request::CancelReservation { reservation_id } => {
            ok(engine.cancel_reservation(parse_id(&reservation_id)?).await?)
        }
        Request::GetReservation { reservation_id } => {
            ok(engine.get_reservation(parse_id(&reservation_id)?).await?)
        }
        Request::ListReservations(filter) => ok(engine.list_reservations(&filter).await?),
        Request::GetGroup { group_id } => ok(engine.get_group(&group_id).await?),
        Request::GetResource { resource_id } => ok(engine.get_resource(&resource_id).await?),
        Request::ListGroups => ok(engine.list_groups().await?),
        Request::ListResources { group_id } => {
            ok(engine.list_resources(group_id.as_deref()).await?)
        }
        Request::SearchResources(search) => ok(engine.search_resources(&search).await?),
        Request::AvailableResources => ok(engine.available_resources().await?),
        Request::DeadLetters => ok(engine.dead_letters()),
        Request::Watch { resource_id } => {
            engine.get_resource(&resource_id).await?;
            let added = watches.watch(&engine.notify, &resource_id)?;
            ok(json!({ "resource_id": resource_id, "added": added }))
        }
        Request::Unwatch { resource_id } => {
            let removed = watches.unwatch(&resource_id);
            ok(json!({ "resource_id": resource_id, "removed": removed }))
        }
    })
}

/// Handle one request line and build its response.
pub async fn handle_line(engine: &Engine, watches: &mut Watches, line: &str) -> Value {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "400").increment(1);
            return err(&EngineError::Validation(format!("malformed request: {e}")));
        }
    };
    let op = req.op();
    let (response, status) = match dispatch(engine, watches, req).await {
        Ok(v) => (v, 200),
        Err(e) => {
            debug!("{op} failed: {e}");
            let status = status_code(e.kind());
            (err(&e), status)
        }
    };
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status.to_string()).increment(1);
    response
}

/// Serve newline-delimited JSON requests until the peer disconnects.
///
/// Requests on one connection are answered in order. Events for watched
/// resources are written as their own lines, tagged by `event` rather than
/// `ok`, between responses.
pub async fn process_connection<S>(socket: S, engine: Arc<Engine>) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (mut watches, mut events) = Watches::new();

    loop {
        let line = tokio::select! {
            frame = framed.next() => match frame {
                None => break,
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => handle_line(&engine, &mut watches, &line).await,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!("request line exceeds {MAX_LINE_LEN} bytes");
                    err(&EngineError::Validation("request line too long".into()))
                }
                Some(Err(e)) => return Err(e),
            },
            Some(event) = events.recv() => match serde_json::to_value(&event) {
                Ok(v) => v,
                Err(e) => {
                    warn!("dropping unencodable event: {e}");
                    continue;
                }
            },
        };
        framed.send(line.to_string()).await?;
    }
    Ok(())
}
