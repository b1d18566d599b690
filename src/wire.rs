//! Newline-delimited JSON request/response protocol.
//!
//! Each request line is a JSON object tagged by `op`; each reply line is a
//! JSON object tagged by `type`. Notices for `listen`ed services are pushed
//! as `{"type":"notice",...}` lines between replies.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::engine::{Engine, ReservationError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Reserve {
        service_id: ServiceId,
        request: ReservationRequest,
    },
    Timeslots {
        service_id: ServiceId,
    },
    Calendar {
        provider_id: UserId,
    },
    PutUser {
        user: User,
    },
    PutService {
        info: MerchandiseInfo,
        terms: ServiceTerms,
    },
    PutProduct {
        product: Product,
    },
    PutEvent {
        event: Event,
    },
    Listen {
        service_id: ServiceId,
    },
    Unlisten {
        service_id: ServiceId,
    },
}

impl Request {
    /// Short label for metrics.
    pub fn op(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Reserve { .. } => "reserve",
            Request::Timeslots { .. } => "timeslots",
            Request::Calendar { .. } => "calendar",
            Request::PutUser { .. } => "put_user",
            Request::PutService { .. } => "put_service",
            Request::PutProduct { .. } => "put_product",
            Request::PutEvent { .. } => "put_event",
            Request::Listen { .. } => "listen",
            Request::Unlisten { .. } => "unlisten",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ok { data: serde_json::Value },
    Error { kind: String, message: String },
    Notice { notice: ReservationNotice },
}

impl Reply {
    fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Reply::Ok { data },
            Err(e) => Reply::error("INTERNAL", e.to_string()),
        }
    }

    fn error(kind: &str, message: impl Into<String>) -> Self {
        Reply::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

impl From<ReservationError> for Reply {
    fn from(e: ReservationError) -> Self {
        Reply::error(e.kind().code(), e.to_string())
    }
}

impl From<StoreError> for Reply {
    fn from(e: StoreError) -> Self {
        let kind = match e {
            StoreError::Invalid(_) | StoreError::LimitExceeded(_) => "BAD_REQUEST",
            StoreError::NotFound(..) | StoreError::WalError(_) => "STORE_ERROR",
        };
        Reply::error(kind, e.to_string())
    }
}

#[derive(Debug)]
pub enum WireError {
    Codec(LinesCodecError),
    Encode(serde_json::Error),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Codec(e) => write!(f, "codec error: {e}"),
            WireError::Encode(e) => write!(f, "encode error: {e}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<LinesCodecError> for WireError {
    fn from(e: LinesCodecError) -> Self {
        WireError::Codec(e)
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Encode(e)
    }
}

type Connection = Framed<TcpStream, LinesCodec>;

struct Listeners {
    tasks: HashMap<ServiceId, JoinHandle<()>>,
    tx: mpsc::Sender<ReservationNotice>,
}

impl Listeners {
    fn listen(&mut self, engine: &Engine, service_id: ServiceId) {
        let mut rx = engine.notify.subscribe(service_id);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notice) => {
                        if tx.send(notice).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(service_id, "listener lagged, skipped {skipped} notices");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.tasks.insert(service_id, task) {
            previous.abort();
        }
    }

    fn unlisten(&mut self, service_id: ServiceId) {
        if let Some(task) = self.tasks.remove(&service_id) {
            task.abort();
        }
    }
}

impl Drop for Listeners {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), WireError> {
    let mut conn = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (tx, mut notices) = mpsc::channel(256);
    let mut listeners = Listeners {
        tasks: HashMap::new(),
        tx,
    };

    loop {
        tokio::select! {
            line = conn.next() => {
                let line = match line {
                    Some(line) => line?,
                    None => return Ok(()),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = match serde_json::from_str::<Request>(&line) {
                    Ok(request) => {
                        metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => request.op())
                            .increment(1);
                        handle_request(&engine, request, &mut listeners).await
                    }
                    Err(e) => Reply::error("BAD_REQUEST", e.to_string()),
                };
                send(&mut conn, &reply).await?;
            }
            Some(notice) = notices.recv() => {
                send(&mut conn, &Reply::Notice { notice }).await?;
            }
        }
    }
}

async fn send(conn: &mut Connection, reply: &Reply) -> Result<(), WireError> {
    conn.send(serde_json::to_string(reply)?).await?;
    Ok(())
}

async fn handle_request(engine: &Engine, request: Request, listeners: &mut Listeners) -> Reply {
    let store = engine.store();
    match request {
        Request::Ping => Reply::ok("pong"),
        Request::Reserve {
            service_id,
            request,
        } => match engine.reserve(service_id, request).await {
            Ok(response) => Reply::ok(response),
            Err(e) => e.into(),
        },
        Request::Timeslots { service_id } => match engine.service_timeslots(service_id).await {
            Ok(slots) => Reply::ok(slots),
            Err(e) => e.into(),
        },
        Request::Calendar { provider_id } => match engine.provider_calendar(provider_id).await {
            Ok(entries) => Reply::ok(entries),
            Err(e) => e.into(),
        },
        Request::PutUser { user } => store_reply(store.put_user(user).await),
        Request::PutService { info, terms } => store_reply(store.put_service(info, terms).await),
        Request::PutProduct { product } => store_reply(store.put_product(product).await),
        Request::PutEvent { event } => store_reply(store.put_event(event).await),
        Request::Listen { service_id } => {
            listeners.listen(engine, service_id);
            Reply::ok(serde_json::Value::Null)
        }
        Request::Unlisten { service_id } => {
            listeners.unlisten(service_id);
            Reply::ok(serde_json::Value::Null)
        }
    }
}

fn store_reply(result: Result<(), StoreError>) -> Reply {
    match result {
        Ok(()) => Reply::ok(serde_json::Value::Null),
        Err(e) => e.into(),
    }
}
